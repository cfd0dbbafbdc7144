//! One (case, platform) trial
//!
//! Every engine goes through the same sequence: create the case topic, start
//! the engine, wait for readiness, submit the query, drain the output topic,
//! then tear the engine down. Errors never escape; they become the trial's
//! result.

use crate::broker::{drain_output, DrainConfig};
use crate::context::BenchContext;
use crate::engine::Engine;
use crate::error::{HarnessError, Result};
use crate::models::{ResourceKind, TestResult};
use crate::sampler::{SamplerConfig, StatsSampler};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Measured part of a successful trial
#[derive(Debug, Clone, Copy, PartialEq)]
struct Measurement {
    elapsed: Duration,
    records: u64,
}

/// Run one trial of `case` on `engine`
pub async fn run_trial<E: Engine + ?Sized>(
    ctx: &BenchContext,
    engine: &E,
    case: &str,
) -> TestResult {
    let platform = engine.platform();
    ctx.logger.log_trial_started(case, platform);

    if let Some(reason) = engine.unsupported_reason(case, &ctx.settings) {
        warn!(case, platform, "Case not supported by platform, skipping");
        let unsupported = HarnessError::Unsupported(reason);
        return finish(ctx, TestResult::failure(case, platform, unsupported, None));
    }

    let mut sampler = StatsSampler::start(
        ctx.runtime.clone(),
        SamplerConfig {
            case_label: format!("{}_{}", platform, case),
            interval: ctx.settings.stats_interval(),
            stop_grace: ctx.settings.stats_stop_grace(),
        },
        ctx.metrics.clone(),
    );

    let preexisting: HashSet<String> = ctx.tracker.tracked().into_iter().map(|r| r.id).collect();
    let case_topic = ctx.settings.case_topic(case);

    let outcome = execute(ctx, engine, case, &case_topic).await;
    let stats = sampler.stop().await;

    teardown(ctx, engine, &preexisting, case_topic).await;

    let result = match outcome {
        Ok(measurement) => TestResult::success(
            case,
            platform,
            measurement.elapsed,
            measurement.records,
            stats,
        ),
        Err(e) => {
            error!(case, platform, error = %e, "Trial failed");
            TestResult::failure(case, platform, e, Some(stats))
        }
    };
    finish(ctx, result)
}

fn finish(ctx: &BenchContext, result: TestResult) -> TestResult {
    ctx.metrics.observe_trial(&result);
    ctx.logger.log_trial_finished(&result);
    result
}

async fn execute<E: Engine + ?Sized>(
    ctx: &BenchContext,
    engine: &E,
    case: &str,
    case_topic: &str,
) -> Result<Measurement> {
    ctx.broker
        .create_topics(&[case_topic.to_string()], ctx.settings.kafka_partitions)
        .await?;

    let handle = engine.start(ctx).await?;
    for check in engine.readiness_checks(&handle, &ctx.settings) {
        ctx.await_ready(&check).await?;
    }

    let started = Instant::now();
    engine.submit_query(ctx, case, &handle).await?;

    let mut output = ctx.broker.subscribe(case_topic).await?;
    let drain_config = DrainConfig {
        poll_timeout: ctx.settings.drain_poll_timeout(),
        max_empty_polls: ctx.settings.drain_max_empty_polls,
        max_initial_empty_polls: ctx.settings.drain_max_initial_empty_polls,
    };
    let drained = drain_output(output.as_mut(), &drain_config).await?;

    // The last poll waited a full timeout for output that never came
    let elapsed = started.elapsed().saturating_sub(drain_config.poll_timeout);

    if drained.never_produced {
        warn!(
            case,
            platform = engine.platform(),
            polls = drained.polls,
            topic = case_topic,
            "Query produced no output"
        );
    }

    info!(
        case,
        platform = engine.platform(),
        records = drained.records,
        polls = drained.polls,
        elapsed_secs = elapsed.as_secs_f64(),
        "Output drained"
    );
    Ok(Measurement {
        elapsed,
        records: drained.records,
    })
}

/// Release every container the trial created and drop its topics
async fn teardown<E: Engine + ?Sized>(
    ctx: &BenchContext,
    engine: &E,
    preexisting: &HashSet<String>,
    case_topic: String,
) {
    let created: Vec<String> = ctx
        .tracker
        .tracked()
        .into_iter()
        .filter(|r| r.kind == ResourceKind::Container && !preexisting.contains(&r.id))
        .map(|r| r.id)
        .collect();

    if !created.is_empty() {
        let report = ctx.tracker.release(&created).await;
        ctx.metrics.add_cleanup_failures(report.failures());
    }

    let mut topics = vec![case_topic];
    topics.extend(engine.extra_topics(&ctx.settings));
    if let Err(e) = ctx.broker.delete_topics(&topics).await {
        warn!(topics = %topics.join(","), error = %e, "Failed to delete topics");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context_with;
    use crate::engine::{FlinkEngine, KsqldbEngine, TimeplusEngine};
    use crate::models::ManagedResource;
    use crate::runtime::HealthState;
    use crate::settings::BenchSettings;
    use crate::testing::{MockBroker, MockRuntime};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_flink_q3_end_to_end() {
        // Flink readiness asks its REST API for the taskmanager count
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/overview")
            .with_status(200)
            .with_body(r#"{"taskmanagers":1}"#)
            .create_async()
            .await;
        let port: u16 = server
            .host_with_port()
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap();

        let runtime = Arc::new(MockRuntime::new());
        let broker = Arc::new(MockBroker::new());
        broker.script(
            "NEXMARK_Q3",
            vec![(Duration::from_secs(2), 42), (Duration::from_secs(5), 0)],
        );
        let settings = BenchSettings {
            flink_port: port,
            drain_max_empty_polls: 1,
            ..Default::default()
        };
        let ctx = context_with(runtime.clone(), broker.clone(), settings);
        // Shared infrastructure survives the trial
        ctx.tracker.track(ManagedResource::container("kafka-id", "kafka"));

        let result = run_trial(&ctx, &FlinkEngine, "q3").await;

        assert!(result.is_success(), "unexpected error: {:?}", result.error);
        assert_eq!(result.case, "q3");
        assert_eq!(result.platform, "flink");
        assert_eq!(result.output_size, 42);
        assert!(
            (1.9..2.6).contains(&result.execution_time),
            "execution_time = {}",
            result.execution_time
        );
        assert!(result.stats.is_some());

        assert_eq!(broker.created(), vec!["NEXMARK_Q3"]);
        assert_eq!(broker.deleted(), vec!["NEXMARK_Q3"]);
        let remaining = ctx.tracker.tracked();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "kafka-id");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_case_provisions_nothing() {
        let runtime = Arc::new(MockRuntime::new());
        let broker = Arc::new(MockBroker::new());
        let ctx = context_with(runtime.clone(), broker.clone(), BenchSettings::default());

        let result = run_trial(&ctx, &KsqldbEngine, "q5").await;

        assert_eq!(result.error.as_deref(), Some("Unsupported case: q5"));
        assert_eq!(result.execution_time, 0.0);
        assert_eq!(result.output_size, 0);
        assert_eq!(runtime.call_count(), 0);
        assert!(broker.created().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_engine_fails_trial_and_cleans_up() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.set_start_health("timeplus", HealthState::Unhealthy);
        let broker = Arc::new(MockBroker::new());
        let ctx = context_with(runtime.clone(), broker.clone(), BenchSettings::default());

        let result = run_trial(&ctx, &TimeplusEngine, "q1").await;

        let error = result.error.unwrap();
        assert!(error.starts_with("timeplus not ready: unhealthy"), "{}", error);
        assert_eq!(result.output_size, 0);
        assert!(ctx.tracker.is_empty());
        assert_eq!(runtime.container_count(), 0);
        assert_eq!(broker.deleted(), vec!["NEXMARK_Q1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_failure_deletes_extra_topics() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.set_exec_result(1, "line 1:1: mismatched input");
        let broker = Arc::new(MockBroker::new());
        let ctx = context_with(runtime.clone(), broker.clone(), BenchSettings::default());

        let result = run_trial(&ctx, &KsqldbEngine, "q2").await;

        assert!(result
            .error
            .unwrap()
            .starts_with("query q2 failed with exit code 1"));
        assert_eq!(broker.deleted(), vec!["NEXMARK_Q2", "PROCESSING_STREAM"]);
        assert!(ctx.tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_without_output_is_empty_success() {
        let runtime = Arc::new(MockRuntime::new());
        let broker = Arc::new(MockBroker::new());
        let settings = BenchSettings {
            drain_max_initial_empty_polls: 2,
            ..Default::default()
        };
        let ctx = context_with(runtime.clone(), broker.clone(), settings);

        let result = run_trial(&ctx, &TimeplusEngine, "q1").await;

        assert!(result.is_success(), "unexpected error: {:?}", result.error);
        assert_eq!(result.output_size, 0);
        assert_eq!(broker.deleted(), vec!["NEXMARK_Q1"]);
        assert!(ctx.tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_topic_creation_failure_is_trial_error() {
        let runtime = Arc::new(MockRuntime::new());
        let broker = Arc::new(MockBroker::new());
        broker.fail_create();
        let ctx = context_with(runtime.clone(), broker.clone(), BenchSettings::default());

        let result = run_trial(&ctx, &TimeplusEngine, "q1").await;

        assert!(!result.is_success());
        assert_eq!(runtime.container_count(), 0);
    }
}
