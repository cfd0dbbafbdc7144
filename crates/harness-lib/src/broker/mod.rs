//! Message broker boundary and output draining
//!
//! Engines write their query results to a Kafka topic. The runner measures
//! completion by draining that topic until it goes quiet.

mod kafka;

pub use kafka::KafkaBroker;

use crate::error::BrokerError;
use crate::runtime::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Topic administration and subscription
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Create topics; topics that already exist are not an error
    async fn create_topics(&self, topics: &[String], partitions: i32) -> Result<(), BrokerError>;

    /// Delete topics; topics that do not exist are not an error
    async fn delete_topics(&self, topics: &[String]) -> Result<(), BrokerError>;

    /// Subscribe from the earliest offset without committing
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn OutputSource>, BrokerError>;
}

/// A subscribed topic that can be polled in batches
#[async_trait]
pub trait OutputSource: Send {
    /// Wait up to `timeout` for messages and return how many arrived
    async fn poll_batch(&mut self, timeout: Duration) -> Result<usize, BrokerError>;
}

/// Bounds of one drain
#[derive(Debug, Clone)]
pub struct DrainConfig {
    pub poll_timeout: Duration,
    /// Consecutive empty polls after data that end the drain
    pub max_empty_polls: u32,
    /// Empty polls tolerated before the first record arrives
    pub max_initial_empty_polls: u32,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(5),
            max_empty_polls: 3,
            max_initial_empty_polls: 60,
        }
    }
}

/// What a drain observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub records: u64,
    pub polls: u32,
    /// True when the drain gave up before any record arrived
    pub never_produced: bool,
}

/// Poll `source` until the output goes quiet
pub async fn drain_output(
    source: &mut dyn OutputSource,
    config: &DrainConfig,
) -> Result<DrainOutcome, BrokerError> {
    let mut outcome = DrainOutcome::default();
    let mut empty_polls = 0u32;
    let mut initial_empty_polls = 0u32;

    loop {
        let batch = source.poll_batch(config.poll_timeout).await?;
        outcome.polls += 1;

        if batch > 0 {
            outcome.records += batch as u64;
            empty_polls = 0;
            continue;
        }

        if outcome.records == 0 {
            initial_empty_polls += 1;
            if initial_empty_polls >= config.max_initial_empty_polls.max(1) {
                warn!(
                    polls = outcome.polls,
                    "No output produced, giving up on drain"
                );
                outcome.never_produced = true;
                return Ok(outcome);
            }
            continue;
        }

        empty_polls += 1;
        if empty_polls >= config.max_empty_polls.max(1) {
            debug!(
                records = outcome.records,
                polls = outcome.polls,
                "Output drained"
            );
            return Ok(outcome);
        }
    }
}
