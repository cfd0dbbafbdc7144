//! Background resource-usage sampling
//!
//! While a trial runs, one task snapshots the stats of every running
//! container at a fixed interval. Records are handed to the owner through a
//! channel and collected when the sampler is stopped.

use crate::models::SampleRecord;
use crate::observability::HarnessMetrics;
use crate::runtime::ContainerRuntime;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration of one sampling session
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Label stored on every record, e.g. `flink_q3`
    pub case_label: String,
    pub interval: Duration,
    /// How long `stop` waits for the task before aborting it
    pub stop_grace: Duration,
}

/// Handle to a running sampling task
pub struct StatsSampler {
    stop_tx: watch::Sender<bool>,
    /// Taken by the first `stop`
    handle: Option<JoinHandle<()>>,
    records_rx: mpsc::UnboundedReceiver<SampleRecord>,
    stop_grace: Duration,
    case_label: String,
}

impl StatsSampler {
    /// Spawn the sampling task
    pub fn start(
        runtime: Arc<dyn ContainerRuntime>,
        config: SamplerConfig,
        metrics: HarnessMetrics,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (records_tx, records_rx) = mpsc::unbounded_channel();

        info!(
            case = %config.case_label,
            interval_ms = config.interval.as_millis() as u64,
            "Starting stats sampler"
        );

        let task = SampleLoop {
            runtime,
            case_label: config.case_label.clone(),
            interval: config.interval,
            records_tx,
            metrics,
        };
        let handle = tokio::spawn(task.run(stop_rx));

        Self {
            stop_tx,
            handle: Some(handle),
            records_rx,
            stop_grace: config.stop_grace,
            case_label: config.case_label,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the task, wait for it to exit, and return every record taken
    ///
    /// Calling `stop` again returns an empty list.
    pub async fn stop(&mut self) -> Vec<SampleRecord> {
        // The receiver is gone only if the task already exited
        let _ = self.stop_tx.send(true);

        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(self.stop_grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(case = %self.case_label, error = %e, "Stats sampler task failed")
                }
                Err(_) => {
                    warn!(
                        case = %self.case_label,
                        grace_secs = self.stop_grace.as_secs(),
                        "Stats sampler did not stop in time, aborting"
                    );
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }

        let mut records = Vec::new();
        while let Ok(record) = self.records_rx.try_recv() {
            records.push(record);
        }

        debug!(case = %self.case_label, records = records.len(), "Stats sampler stopped");
        records
    }
}

struct SampleLoop {
    runtime: Arc<dyn ContainerRuntime>,
    case_label: String,
    interval: Duration,
    records_tx: mpsc::UnboundedSender<SampleRecord>,
    metrics: HarnessMetrics,
}

impl SampleLoop {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let mut cycles = 0u64;

        loop {
            if *stop_rx.borrow() {
                break;
            }

            self.sample_all().await;
            cycles += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(case = %self.case_label, cycles, "Stats sampling loop exited");
    }

    async fn sample_all(&self) {
        let containers = match self.runtime.list_running().await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "Failed to list running containers");
                self.metrics.inc_stats_sample_errors();
                return;
            }
        };

        for container in containers {
            match self.runtime.stats(&container.id).await {
                Ok(stats) => {
                    let record = SampleRecord {
                        timestamp: Utc::now(),
                        case: self.case_label.clone(),
                        container_id: container.id,
                        container_name: container.name,
                        stats,
                    };
                    self.metrics.inc_stats_samples();
                    if self.records_tx.send(record).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    // Usually the container exited between list and sample
                    debug!(
                        container_id = %container.id,
                        name = %container.name,
                        error = %e,
                        "Failed to sample container stats"
                    );
                    self.metrics.inc_stats_sample_errors();
                }
            }
        }
    }
}
