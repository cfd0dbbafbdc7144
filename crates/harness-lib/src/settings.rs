//! Benchmark settings
//!
//! Every image tag, resource limit and polling bound lives here so a run can
//! be reproduced from a single configuration file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How the case label is folded into the output topic name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicCase {
    #[default]
    Upper,
    Lower,
    Preserve,
}

/// Settings for one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchSettings {
    /// Bridge network shared by all containers of a case
    pub network_name: String,

    /// CPU period in microseconds
    pub cpu_period: i64,
    /// Number of CPU cores granted to each engine container
    pub cpu_cores: f64,

    pub kafka_memory: String,
    pub flink_jobmanager_memory: String,
    pub flink_taskmanager_memory: String,
    pub flink_taskmanager_flink_memory: String,
    pub flink_taskmanager_process_memory: String,
    pub timeplus_memory: String,
    pub ksqldb_memory: String,

    pub kafka_image: String,
    pub flink_image: String,
    pub flink_cli_image: String,
    pub timeplus_image: String,
    pub ksqldb_image: String,
    pub generator_image: String,

    /// Broker address as seen from the host running the harness
    pub kafka_bootstrap_servers: String,
    /// Broker address as seen from containers on the network
    pub kafka_internal_servers: String,
    pub kafka_partitions: i32,
    /// Pause after the broker reports healthy before topic operations
    pub broker_settle_secs: u64,
    pub base_topics: Vec<String>,

    pub drain_poll_timeout_secs: u64,
    pub drain_max_empty_polls: u32,
    pub drain_max_initial_empty_polls: u32,

    pub health_check_interval_secs: u64,
    pub health_max_attempts: u32,
    /// Timeout of the in-container HEALTHCHECK command
    pub health_check_timeout_secs: u64,
    /// Retries of the in-container HEALTHCHECK command
    pub health_check_retries: i64,
    pub http_probe_interval_secs: u64,
    pub http_max_attempts: u32,
    pub http_attempt_timeout_secs: u64,

    pub flink_port: u16,
    pub flink_taskmanagers: u32,
    pub flink_taskmanager_slots: u32,

    pub stats_interval_ms: u64,
    pub stats_stop_grace_secs: u64,

    /// Grace period handed to the runtime when stopping a container
    pub stop_grace_secs: u64,

    pub num_generators: u32,
    pub query_timeout_secs: u64,

    /// Directory holding `<engine>/<case>.sql` scripts
    pub scripts_dir: PathBuf,

    pub topic_prefix: String,
    pub topic_case: TopicCase,

    pub ksqldb_unsupported_cases: Vec<String>,
    pub ksqldb_extra_topics: Vec<String>,
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            network_name: "network_nexmark".to_string(),
            cpu_period: 100_000,
            cpu_cores: 2.0,
            kafka_memory: "4G".to_string(),
            flink_jobmanager_memory: "2g".to_string(),
            flink_taskmanager_memory: "4g".to_string(),
            flink_taskmanager_flink_memory: "3g".to_string(),
            flink_taskmanager_process_memory: "4g".to_string(),
            timeplus_memory: "4g".to_string(),
            ksqldb_memory: "4g".to_string(),
            kafka_image: "docker.redpanda.com/redpandadata/redpanda:v23.3.14".to_string(),
            flink_image: "flink:1.18.1-scala_2.12-java8".to_string(),
            flink_cli_image: "timeplus/flinksql:9c341db_1.18".to_string(),
            timeplus_image: "timeplus/timeplusd:2.3.3".to_string(),
            ksqldb_image: "confluentinc/ksqldb-server:0.29.0".to_string(),
            generator_image: "ghcr.io/risingwavelabs/nexmark-bench:test-7".to_string(),
            kafka_bootstrap_servers: "localhost:19092".to_string(),
            kafka_internal_servers: "kafka:9092".to_string(),
            kafka_partitions: 1,
            broker_settle_secs: 10,
            base_topics: vec![
                "nexmark-auction".to_string(),
                "nexmark-person".to_string(),
                "nexmark-bid".to_string(),
            ],
            drain_poll_timeout_secs: 5,
            drain_max_empty_polls: 3,
            drain_max_initial_empty_polls: 60,
            health_check_interval_secs: 3,
            health_max_attempts: 20,
            health_check_timeout_secs: 3,
            health_check_retries: 5,
            http_probe_interval_secs: 5,
            http_max_attempts: 20,
            http_attempt_timeout_secs: 5,
            flink_port: 8081,
            flink_taskmanagers: 1,
            flink_taskmanager_slots: 1,
            stats_interval_ms: 1000,
            stats_stop_grace_secs: 5,
            stop_grace_secs: 10,
            num_generators: 3,
            query_timeout_secs: 30 * 60,
            scripts_dir: PathBuf::from("scripts"),
            topic_prefix: "nexmark_".to_string(),
            topic_case: TopicCase::Upper,
            ksqldb_unsupported_cases: ["q5", "q7", "q8", "q9", "q15", "q16", "q17", "q18", "q19"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            ksqldb_extra_topics: vec!["PROCESSING_STREAM".to_string()],
        }
    }
}

impl BenchSettings {
    /// CPU quota in microseconds per period
    pub fn cpu_quota(&self) -> i64 {
        (self.cpu_cores * self.cpu_period as f64) as i64
    }

    /// Apply one memory limit to every engine container
    pub fn set_engine_memory(&mut self, limit: &str) {
        self.flink_jobmanager_memory = limit.to_string();
        self.flink_taskmanager_memory = limit.to_string();
        self.timeplus_memory = limit.to_string();
        self.ksqldb_memory = limit.to_string();
    }

    /// Output topic for a case, e.g. `NEXMARK_Q3`
    pub fn case_topic(&self, case: &str) -> String {
        let name = format!("{}{}", self.topic_prefix, case);
        match self.topic_case {
            TopicCase::Upper => name.to_uppercase(),
            TopicCase::Lower => name.to_lowercase(),
            TopicCase::Preserve => name,
        }
    }

    /// Host directory holding one engine's scripts
    pub fn engine_scripts_dir(&self, engine: &str) -> PathBuf {
        let dir = if self.scripts_dir.is_absolute() {
            self.scripts_dir.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.scripts_dir))
                .unwrap_or_else(|_| self.scripts_dir.clone())
        };
        dir.join(engine)
    }

    pub fn drain_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_poll_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn http_probe_interval(&self) -> Duration {
        Duration::from_secs(self.http_probe_interval_secs)
    }

    pub fn http_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.http_attempt_timeout_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn stats_stop_grace(&self) -> Duration {
        Duration::from_secs(self.stats_stop_grace_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn broker_settle(&self) -> Duration {
        Duration::from_secs(self.broker_settle_secs)
    }
}
