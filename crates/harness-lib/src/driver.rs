//! Benchmark driver
//!
//! Iterates cases, provisions the shared infrastructure of each case, runs
//! every requested platform against it and tears everything down before the
//! next case. Trials run strictly one after another.

use crate::context::BenchContext;
use crate::engine::{self, Engine, PLATFORMS};
use crate::error::{HarnessError, Result};
use crate::infra::{self, Workload};
use crate::models::TestResult;
use crate::runner::run_trial;
use crate::tracker::CleanupReport;
use tokio::time::Instant;
use tracing::{error, info};

/// What one run covers
#[derive(Debug, Clone)]
pub struct BenchmarkPlan {
    pub cases: Vec<String>,
    pub platforms: Vec<String>,
    pub workload: Workload,
}

impl BenchmarkPlan {
    /// Resolve every platform name, failing on the first unknown one
    fn engines(&self) -> Result<Vec<Box<dyn Engine>>> {
        self.platforms
            .iter()
            .map(|name| {
                engine::from_name(name).ok_or_else(|| {
                    HarnessError::Config(format!(
                        "unknown platform '{}', expected one of: {}",
                        name,
                        PLATFORMS.join(", ")
                    ))
                })
            })
            .collect()
    }
}

pub struct BenchmarkDriver {
    ctx: BenchContext,
}

impl BenchmarkDriver {
    pub fn new(ctx: BenchContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &BenchContext {
        &self.ctx
    }

    /// Run every (case, platform) trial of the plan
    ///
    /// Trial failures are part of the returned results. Only an
    /// infrastructure failure aborts the run, after a full cleanup.
    pub async fn run(&self, plan: &BenchmarkPlan) -> Result<Vec<TestResult>> {
        let engines = plan.engines()?;
        self.ctx.logger.log_run_started(&plan.cases, &plan.platforms);

        let mut results = Vec::with_capacity(plan.cases.len() * engines.len());
        for case in &plan.cases {
            info!(case = %case, "Starting case");
            let started = Instant::now();

            if let Err(e) = infra::provision(&self.ctx, plan.workload).await {
                error!(case = %case, error = %e, "Failed to provision infrastructure");
                self.cleanup().await;
                return Err(e);
            }
            self.ctx
                .logger
                .log_infrastructure_ready(case, started.elapsed().as_secs_f64());

            for engine in &engines {
                results.push(run_trial(&self.ctx, engine.as_ref(), case).await);
            }

            self.cleanup().await;
        }

        Ok(results)
    }

    /// Tear down everything still tracked
    ///
    /// Safe to call at any point, including after the run future was dropped
    /// by an interrupt.
    pub async fn cleanup(&self) -> CleanupReport {
        let report = self.ctx.tracker.cleanup().await;
        let failures = report.failures();
        self.ctx.metrics.add_cleanup_failures(failures);
        self.ctx
            .logger
            .log_cleanup_complete(report.entries.len(), failures);
        report
    }
}
