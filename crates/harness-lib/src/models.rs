//! Core data models for the benchmark harness

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of a runtime resource owned by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Container,
    Network,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Container => write!(f, "container"),
            ResourceKind::Network => write!(f, "network"),
        }
    }
}

/// Lifecycle status of a runtime resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Created,
    Running,
    Paused,
    Healthy,
    Unhealthy,
    Exited,
    Removed,
}

impl ResourceStatus {
    /// Returns true if the resource must be stopped before removal
    pub fn needs_stop(&self) -> bool {
        matches!(
            self,
            ResourceStatus::Running
                | ResourceStatus::Paused
                | ResourceStatus::Healthy
                | ResourceStatus::Unhealthy
        )
    }
}

/// A container or network created during a benchmark run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedResource {
    pub id: String,
    pub name: String,
    pub kind: ResourceKind,
    pub status: ResourceStatus,
}

impl ManagedResource {
    pub fn container(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ResourceKind::Container,
            status: ResourceStatus::Created,
        }
    }

    pub fn network(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ResourceKind::Network,
            status: ResourceStatus::Created,
        }
    }

    /// Short identifier for log output
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

/// One resource-usage snapshot taken by the stats sampler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    pub timestamp: DateTime<Utc>,
    pub case: String,
    pub container_id: String,
    pub container_name: String,
    /// Raw stats payload as returned by the container runtime
    pub stats: serde_json::Value,
}

/// Outcome of one (case, platform) trial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub case: String,
    pub platform: String,
    /// Query execution time in seconds, net of the drain poll timeout
    pub execution_time: f64,
    pub output_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub stats: Option<Vec<SampleRecord>>,
}

impl TestResult {
    pub fn success(
        case: impl Into<String>,
        platform: impl Into<String>,
        elapsed: Duration,
        output_size: u64,
        stats: Vec<SampleRecord>,
    ) -> Self {
        Self {
            case: case.into(),
            platform: platform.into(),
            execution_time: elapsed.as_secs_f64(),
            output_size,
            error: None,
            stats: Some(stats),
        }
    }

    /// A failed trial carries the error text and zeroed metrics
    pub fn failure(
        case: impl Into<String>,
        platform: impl Into<String>,
        error: impl std::fmt::Display,
        stats: Option<Vec<SampleRecord>>,
    ) -> Self {
        Self {
            case: case.into(),
            platform: platform.into(),
            execution_time: 0.0,
            output_size: 0,
            error: Some(error.to_string()),
            stats,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
