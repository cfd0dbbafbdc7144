//! Observability infrastructure for the benchmark harness
//!
//! Provides:
//! - Prometheus counters for trials, probes, drained records, sampling and cleanup
//! - Structured JSON logging of run events with tracing

use crate::models::TestResult;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::{info, warn};

/// Buckets for trial durations (in seconds)
const TRIAL_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0];

/// Harness metrics held in a registry owned by the run
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct HarnessMetrics {
    registry: Registry,
    trials: IntCounterVec,
    trial_duration_seconds: HistogramVec,
    probe_attempts: IntCounterVec,
    probe_failures: IntCounterVec,
    drained_records: IntCounterVec,
    stats_samples: IntCounter,
    stats_sample_errors: IntCounter,
    cleanup_failures: IntCounter,
}

impl HarnessMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("nexmark_harness".to_string()), None)?;

        let trials = IntCounterVec::new(
            Opts::new("trials_total", "Trials run, by platform and outcome"),
            &["platform", "outcome"],
        )?;
        let trial_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "trial_duration_seconds",
                "Measured query execution time of successful trials",
            )
            .buckets(TRIAL_BUCKETS.to_vec()),
            &["platform"],
        )?;
        let probe_attempts = IntCounterVec::new(
            Opts::new("probe_attempts_total", "Readiness observations made"),
            &["target"],
        )?;
        let probe_failures = IntCounterVec::new(
            Opts::new(
                "probe_failures_total",
                "Readiness probes ending unhealthy, exited or timed out",
            ),
            &["target"],
        )?;
        let drained_records = IntCounterVec::new(
            Opts::new("drained_records_total", "Records read from output topics"),
            &["platform"],
        )?;
        let stats_samples = IntCounter::new("stats_samples_total", "Usage snapshots recorded")?;
        let stats_sample_errors = IntCounter::new(
            "stats_sample_errors_total",
            "Usage snapshots that could not be taken",
        )?;
        let cleanup_failures = IntCounter::new(
            "cleanup_failures_total",
            "Resources left for the prune pass",
        )?;

        registry.register(Box::new(trials.clone()))?;
        registry.register(Box::new(trial_duration_seconds.clone()))?;
        registry.register(Box::new(probe_attempts.clone()))?;
        registry.register(Box::new(probe_failures.clone()))?;
        registry.register(Box::new(drained_records.clone()))?;
        registry.register(Box::new(stats_samples.clone()))?;
        registry.register(Box::new(stats_sample_errors.clone()))?;
        registry.register(Box::new(cleanup_failures.clone()))?;

        Ok(Self {
            registry,
            trials,
            trial_duration_seconds,
            probe_attempts,
            probe_failures,
            drained_records,
            stats_samples,
            stats_sample_errors,
            cleanup_failures,
        })
    }

    /// Record the outcome of one trial
    pub fn observe_trial(&self, result: &TestResult) {
        let outcome = if result.is_success() { "success" } else { "error" };
        self.trials
            .with_label_values(&[result.platform.as_str(), outcome])
            .inc();
        if result.is_success() {
            self.trial_duration_seconds
                .with_label_values(&[result.platform.as_str()])
                .observe(result.execution_time);
            self.drained_records
                .with_label_values(&[result.platform.as_str()])
                .inc_by(result.output_size);
        }
    }

    pub fn add_probe_attempts(&self, target: &str, attempts: u32) {
        self.probe_attempts
            .with_label_values(&[target])
            .inc_by(u64::from(attempts));
    }

    pub fn inc_probe_failures(&self, target: &str) {
        self.probe_failures.with_label_values(&[target]).inc();
    }

    pub fn inc_stats_samples(&self) {
        self.stats_samples.inc();
    }

    pub fn inc_stats_sample_errors(&self) {
        self.stats_sample_errors.inc();
    }

    pub fn add_cleanup_failures(&self, count: usize) {
        self.cleanup_failures.inc_by(count as u64);
    }

    /// Render every metric in the Prometheus text exposition format
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for run events
///
/// Every event carries a fixed `event` field and the run id so a run's
/// JSON log can be filtered without parsing messages.
#[derive(Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn log_run_started(&self, cases: &[String], platforms: &[String]) {
        info!(
            event = "run_started",
            run_id = %self.run_id,
            cases = %cases.join(","),
            platforms = %platforms.join(","),
            "Benchmark run started"
        );
    }

    pub fn log_infrastructure_ready(&self, case: &str, elapsed_secs: f64) {
        info!(
            event = "infrastructure_ready",
            run_id = %self.run_id,
            case = %case,
            elapsed_secs = elapsed_secs,
            "Shared infrastructure ready"
        );
    }

    pub fn log_trial_started(&self, case: &str, platform: &str) {
        info!(
            event = "trial_started",
            run_id = %self.run_id,
            case = %case,
            platform = %platform,
            "Trial started"
        );
    }

    pub fn log_trial_finished(&self, result: &TestResult) {
        match &result.error {
            None => info!(
                event = "trial_finished",
                run_id = %self.run_id,
                case = %result.case,
                platform = %result.platform,
                execution_time = result.execution_time,
                output_size = result.output_size,
                "Trial finished"
            ),
            Some(error) => warn!(
                event = "trial_finished",
                run_id = %self.run_id,
                case = %result.case,
                platform = %result.platform,
                error = %error,
                "Trial failed"
            ),
        }
    }

    pub fn log_probe_failed(&self, target: &str, outcome: &str, attempts: u32) {
        warn!(
            event = "probe_failed",
            run_id = %self.run_id,
            target = %target,
            outcome = %outcome,
            attempts = attempts,
            "Readiness probe failed"
        );
    }

    pub fn log_cleanup_complete(&self, disposed: usize, failures: usize) {
        info!(
            event = "cleanup_complete",
            run_id = %self.run_id,
            disposed = disposed,
            failures = failures,
            "Cleanup complete"
        );
    }

    pub fn log_run_interrupted(&self, signal: &str) {
        warn!(
            event = "run_interrupted",
            run_id = %self.run_id,
            signal = %signal,
            "Run interrupted, cleaning up"
        );
    }
}
