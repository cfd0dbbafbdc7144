//! Shared infrastructure of one case: network, broker, input data

use crate::context::BenchContext;
use crate::error::{HarnessError, Result};
use crate::models::ManagedResource;
use crate::probe::ReadinessCheck;
use crate::runtime::{ContainerSpec, HealthCheckSpec};
use crate::settings::BenchSettings;
use std::time::Duration;
use tracing::info;

const BROKER_NAME: &str = "kafka";
const GENERATOR_NAME: &str = "generate_data";

/// Size and pace of the synthetic event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    /// Total number of events generated
    pub data_size: u64,
    /// Events per second across all generators
    pub event_rate: u64,
}

/// Provision everything the engines of a case share
///
/// Creates the network, starts the broker and waits for it, creates the base
/// topics and runs the data generator to completion. Every failure here is
/// fatal to the run; the caller is responsible for cleanup.
pub async fn provision(ctx: &BenchContext, workload: Workload) -> Result<()> {
    let settings = &ctx.settings;
    info!(
        data_size = workload.data_size,
        event_rate = workload.event_rate,
        "Provisioning shared infrastructure"
    );

    let network_id = ctx
        .runtime
        .create_network(ctx.network())
        .await
        .map_err(|e| HarnessError::Infrastructure(format!("network: {}", e)))?;
    ctx.tracker
        .track(ManagedResource::network(network_id, ctx.network()));

    let broker_id = ctx
        .launch(broker_spec(settings))
        .await
        .map_err(|e| HarnessError::Infrastructure(format!("broker: {}", e)))?;

    let check = ReadinessCheck::container_health(
        BROKER_NAME,
        broker_id,
        settings.health_check_interval(),
        settings.health_max_attempts,
    );
    ctx.await_ready(&check)
        .await
        .map_err(|e| HarnessError::Infrastructure(e.to_string()))?;

    info!(secs = settings.broker_settle_secs, "Waiting for broker to settle");
    tokio::time::sleep(settings.broker_settle()).await;

    ctx.broker
        .create_topics(&settings.base_topics, settings.kafka_partitions)
        .await
        .map_err(|e| HarnessError::Infrastructure(e.to_string()))?;

    let output = ctx
        .run_to_completion(generator_spec(settings, workload))
        .await
        .map_err(|e| HarnessError::Infrastructure(format!("data generation: {}", e)))?;
    if output.exit_code != 0 {
        return Err(HarnessError::Infrastructure(format!(
            "data generation exited with code {}: {}",
            output.exit_code,
            output.logs.trim_end()
        )));
    }

    info!("Shared infrastructure ready");
    Ok(())
}

fn broker_spec(settings: &BenchSettings) -> ContainerSpec {
    ContainerSpec::new(BROKER_NAME, &settings.kafka_image)
        .cmd([
            "redpanda".to_string(),
            "start".to_string(),
            "--kafka-addr".to_string(),
            "internal://0.0.0.0:9092,external://0.0.0.0:19092".to_string(),
            "--advertise-kafka-addr".to_string(),
            "internal://kafka:9092,external://localhost:19092".to_string(),
            "--pandaproxy-addr".to_string(),
            "internal://0.0.0.0:8082,external://0.0.0.0:18082".to_string(),
            "--advertise-pandaproxy-addr".to_string(),
            "internal://kafka:8082,external://localhost:18082".to_string(),
            "--schema-registry-addr".to_string(),
            "internal://0.0.0.0:8081,external://0.0.0.0:18081".to_string(),
            "--rpc-addr".to_string(),
            "kafka:33145".to_string(),
            "--advertise-rpc-addr".to_string(),
            "kafka:33145".to_string(),
            "--smp".to_string(),
            "1".to_string(),
            "--memory".to_string(),
            settings.kafka_memory.clone(),
            "--mode".to_string(),
            "dev-container".to_string(),
            "--default-log-level=info".to_string(),
        ])
        .port(18081, 18081)
        .port(18082, 18082)
        .port(19092, 19092)
        .port(19644, 19644)
        .network(&settings.network_name)
        .healthcheck(HealthCheckSpec {
            test: vec![
                "CMD-SHELL".to_string(),
                "rpk cluster health | grep -E 'Healthy:.+true' || exit 1".to_string(),
            ],
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(settings.health_check_timeout_secs),
            retries: settings.health_check_retries,
            start_period: Duration::from_secs(5),
        })
}

fn generator_spec(settings: &BenchSettings, workload: Workload) -> ContainerSpec {
    let topic = |suffix: &str| {
        settings
            .base_topics
            .iter()
            .find(|t| t.ends_with(suffix))
            .cloned()
            .unwrap_or_else(|| format!("nexmark-{}", suffix))
    };

    ContainerSpec::new(GENERATOR_NAME, &settings.generator_image)
        .cmd([
            format!("--max-events={}", workload.data_size),
            format!("--num-event-generators={}", settings.num_generators),
            format!("--event-rate={}", workload.event_rate),
        ])
        .env("KAFKA_HOST", &settings.kafka_internal_servers)
        .env("AUCTION_TOPIC", topic("auction"))
        .env("BID_TOPIC", topic("bid"))
        .env("PERSON_TOPIC", topic("person"))
        .env("NUM_PARTITIONS", settings.kafka_partitions)
        .env("SEPARATE_TOPICS", "true")
        .network(&settings.network_name)
}
