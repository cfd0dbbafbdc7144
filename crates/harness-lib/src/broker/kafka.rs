//! Kafka-protocol broker client built on rdkafka

use super::{MessageBroker, OutputSource};
use crate::error::BrokerError;
use crate::runtime::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::types::RDKafkaErrorCode;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound of messages returned by one batch poll
const MAX_BATCH: usize = 500;
/// How long a batch keeps collecting after its first message
const BATCH_LINGER: Duration = Duration::from_millis(100);
const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Broker reached over the Kafka protocol (Kafka or redpanda)
pub struct KafkaBroker {
    bootstrap_servers: String,
}

impl KafkaBroker {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
        }
    }

    fn client_error(&self, e: impl std::fmt::Display) -> BrokerError {
        BrokerError::Client {
            bootstrap: self.bootstrap_servers.clone(),
            message: e.to_string(),
        }
    }

    fn admin(&self) -> Result<AdminClient<DefaultClientContext>, BrokerError> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .create()
            .map_err(|e| self.client_error(e))
    }

    fn admin_options() -> AdminOptions {
        AdminOptions::new().operation_timeout(Some(ADMIN_TIMEOUT))
    }
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    async fn create_topics(&self, topics: &[String], partitions: i32) -> Result<(), BrokerError> {
        let admin = self.admin()?;
        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|t| NewTopic::new(t.as_str(), partitions, TopicReplication::Fixed(1)))
            .collect();

        let results = admin
            .create_topics(&new_topics, &Self::admin_options())
            .await
            .map_err(|e| BrokerError::Topic {
                topic: topics.join(","),
                message: e.to_string(),
            })?;

        for result in results {
            match result {
                Ok(topic) => info!(topic = %topic, partitions, "Created topic"),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic = %topic, "Topic already exists")
                }
                Err((topic, code)) => {
                    return Err(BrokerError::Topic {
                        topic,
                        message: code.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    async fn delete_topics(&self, topics: &[String]) -> Result<(), BrokerError> {
        let admin = self.admin()?;
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();

        let results = admin
            .delete_topics(&names, &Self::admin_options())
            .await
            .map_err(|e| BrokerError::Topic {
                topic: topics.join(","),
                message: e.to_string(),
            })?;

        for result in results {
            match result {
                Ok(topic) => info!(topic = %topic, "Deleted topic"),
                Err((topic, RDKafkaErrorCode::UnknownTopicOrPartition)) => {
                    debug!(topic = %topic, "Topic does not exist")
                }
                Err((topic, code)) => {
                    warn!(topic = %topic, error = %code, "Failed to delete topic")
                }
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn OutputSource>, BrokerError> {
        // A fresh group per subscription so every drain starts at offset zero
        let group_id = format!(
            "nexmark-harness-{}-{}",
            topic.to_lowercase(),
            chrono::Utc::now().timestamp_millis()
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| self.client_error(e))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Topic {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        debug!(topic, group_id = %group_id, "Subscribed to output topic");
        Ok(Box::new(KafkaOutput {
            topic: topic.to_string(),
            consumer,
        }))
    }
}

struct KafkaOutput {
    topic: String,
    consumer: StreamConsumer,
}

impl KafkaOutput {
    fn poll_error(&self, e: impl std::fmt::Display) -> BrokerError {
        BrokerError::Poll {
            topic: self.topic.clone(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl OutputSource for KafkaOutput {
    async fn poll_batch(&mut self, timeout: Duration) -> Result<usize, BrokerError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(0),
            Ok(Err(e)) => return Err(self.poll_error(e)),
            Ok(Ok(_)) => {}
        }

        let mut count = 1;
        while count < MAX_BATCH {
            match tokio::time::timeout(BATCH_LINGER, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Err(e)) => return Err(self.poll_error(e)),
                Ok(Ok(_)) => count += 1,
            }
        }
        Ok(count)
    }
}
