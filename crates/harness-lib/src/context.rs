//! Shared state handed to every component of a benchmark run

use crate::broker::MessageBroker;
use crate::error::{HarnessError, Result};
use crate::models::ManagedResource;
use crate::observability::{HarnessMetrics, StructuredLogger};
use crate::probe::{probe, ReadinessCheck};
use crate::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, RunOutput};
use crate::settings::BenchSettings;
use crate::tracker::ResourceTracker;
use std::sync::Arc;
use tracing::{debug, info};

/// Log lines kept from a run-to-completion container
const RUN_LOG_TAIL: usize = 100;

/// Runtime connection, broker, tracker and settings of one run
#[derive(Clone)]
pub struct BenchContext {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub broker: Arc<dyn MessageBroker>,
    pub tracker: Arc<ResourceTracker>,
    pub settings: Arc<BenchSettings>,
    pub http: reqwest::Client,
    pub metrics: HarnessMetrics,
    pub logger: StructuredLogger,
}

impl BenchContext {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        broker: Arc<dyn MessageBroker>,
        settings: BenchSettings,
        metrics: HarnessMetrics,
        logger: StructuredLogger,
    ) -> Self {
        let tracker = Arc::new(ResourceTracker::new(
            runtime.clone(),
            settings.stop_grace(),
        ));
        Self {
            runtime,
            broker,
            tracker,
            settings: Arc::new(settings),
            http: reqwest::Client::new(),
            metrics,
            logger,
        }
    }

    pub fn network(&self) -> &str {
        &self.settings.network_name
    }

    /// Pull, create, track and start a long-running container
    pub async fn launch(&self, spec: ContainerSpec) -> Result<String> {
        self.runtime.ensure_image(&spec.image).await?;
        let id = self.runtime.create_container(&spec).await?;
        self.tracker.track(ManagedResource::container(&id, &spec.name));
        self.runtime.start_container(&id).await?;

        info!(name = %spec.name, image = %spec.image, container_id = %id, "Started container");
        Ok(id)
    }

    /// Run a container until it exits, capture its logs, then remove it
    ///
    /// The container stays tracked while it runs so an interrupt still
    /// reaches it. Waiting is bounded by the query timeout.
    pub async fn run_to_completion(&self, spec: ContainerSpec) -> Result<RunOutput> {
        let id = self.launch(spec.clone()).await?;
        let timeout = self.settings.query_timeout();

        let waited = tokio::time::timeout(timeout, self.runtime.wait_container(&id)).await;

        let exit_code = match waited {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                self.tracker.release(&[id]).await;
                return Err(e.into());
            }
            Err(_) => {
                self.tracker.release(&[id]).await;
                return Err(HarnessError::Timeout {
                    operation: spec.name,
                    secs: timeout.as_secs(),
                });
            }
        };

        let logs = match self.runtime.logs(&id, RUN_LOG_TAIL).await {
            Ok(logs) => logs,
            Err(e) => {
                debug!(name = %spec.name, error = %e, "Failed to capture logs");
                String::new()
            }
        };
        self.tracker.release(&[id]).await;

        info!(name = %spec.name, exit_code, "Container finished");
        Ok(RunOutput { exit_code, logs })
    }

    /// Execute a command in a running container, bounded by the query timeout
    pub async fn exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput> {
        let timeout = self.settings.query_timeout();
        match tokio::time::timeout(timeout, self.runtime.exec(container_id, cmd)).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(HarnessError::Timeout {
                operation: cmd.join(" "),
                secs: timeout.as_secs(),
            }),
        }
    }

    /// Probe a readiness check to completion and convert the outcome
    pub async fn await_ready(&self, check: &ReadinessCheck) -> Result<u32> {
        let signal = check.signal(self.runtime.clone(), self.http.clone())?;
        info!(
            target = %check.target,
            max_attempts = check.max_attempts,
            "Waiting for readiness"
        );

        let outcome = probe(
            signal.as_ref(),
            check.interval,
            check.attempt_timeout,
            check.max_attempts,
        )
        .await;

        self.metrics
            .add_probe_attempts(&check.target, outcome.attempts());
        if outcome.is_healthy() {
            info!(target = %check.target, attempts = outcome.attempts(), "Ready");
        } else {
            self.metrics.inc_probe_failures(&check.target);
            self.logger
                .log_probe_failed(&check.target, outcome.label(), outcome.attempts());
        }
        outcome.into_result(&check.target)
    }
}
