//! Container runtime boundary
//!
//! The harness only talks to containers through the [`ContainerRuntime`]
//! trait. [`DockerRuntime`] implements it against the local Docker daemon;
//! tests substitute an in-memory mock.

mod docker;

pub use docker::DockerRuntime;

use crate::error::RuntimeError;
use crate::models::ResourceStatus;
use std::time::Duration;

pub use async_trait::async_trait;

/// Trait for container runtime implementations
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull the image unless it is already present locally
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a bridge network and return its id
    async fn create_network(&self, name: &str) -> Result<String, RuntimeError>;

    async fn remove_network(&self, id: &str) -> Result<(), RuntimeError>;

    /// Create (but do not start) a container and return its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Block until the container stops and return its exit code
    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot, RuntimeError>;

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Run a command inside a running container
    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput, RuntimeError>;

    /// Trailing log lines (stdout and stderr interleaved)
    async fn logs(&self, id: &str, tail: usize) -> Result<String, RuntimeError>;

    async fn list_running(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// One usage snapshot for a container, as an opaque JSON document
    async fn stats(&self, id: &str) -> Result<serde_json::Value, RuntimeError>;

    /// Remove stopped containers, unused networks and volumes
    async fn prune(&self) -> Result<PruneReport, RuntimeError>;
}

/// HEALTHCHECK configuration baked into a container
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckSpec {
    pub test: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: i64,
    pub start_period: Duration,
}

/// Everything needed to create one container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    /// `KEY=value` pairs
    pub env: Vec<String>,
    /// (container port, host port), tcp
    pub ports: Vec<(u16, u16)>,
    /// Memory limit in docker notation, e.g. `4g`
    pub memory: Option<String>,
    /// (cpu period, cpu quota) in microseconds
    pub cpu: Option<(i64, i64)>,
    /// `host:container:mode` bind mounts
    pub binds: Vec<String>,
    pub network: Option<String>,
    pub healthcheck: Option<HealthCheckSpec>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn cmd<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn entrypoint<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn env(mut self, key: &str, value: impl std::fmt::Display) -> Self {
        self.env.push(format!("{}={}", key, value));
        self
    }

    pub fn port(mut self, container: u16, host: u16) -> Self {
        self.ports.push((container, host));
        self
    }

    pub fn memory(mut self, limit: impl Into<String>) -> Self {
        self.memory = Some(limit.into());
        self
    }

    pub fn cpu(mut self, period: i64, quota: i64) -> Self {
        self.cpu = Some((period, quota));
        self
    }

    pub fn bind(mut self, host: impl std::fmt::Display, container: &str, mode: &str) -> Self {
        self.binds.push(format!("{}:{}:{}", host, container, mode));
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn healthcheck(mut self, check: HealthCheckSpec) -> Self {
        self.healthcheck = Some(check);
        self
    }
}

/// Run state reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

/// Health field of a container with a HEALTHCHECK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Healthy,
    Unhealthy,
}

/// Live view of a container returned by inspect
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSnapshot {
    pub id: String,
    pub name: String,
    pub state: RunState,
    /// `None` when the container has no health check configured
    pub health: Option<HealthState>,
    pub exit_code: Option<i64>,
}

impl ContainerSnapshot {
    /// Collapse run state and health into the tracker's status model
    pub fn status(&self) -> ResourceStatus {
        match (self.state, self.health) {
            (RunState::Exited | RunState::Dead, _) => ResourceStatus::Exited,
            (RunState::Removing, _) => ResourceStatus::Removed,
            (RunState::Created, _) => ResourceStatus::Created,
            (RunState::Paused, _) => ResourceStatus::Paused,
            (_, Some(HealthState::Healthy)) => ResourceStatus::Healthy,
            (_, Some(HealthState::Unhealthy)) => ResourceStatus::Unhealthy,
            (RunState::Running | RunState::Restarting | RunState::Unknown, _) => {
                ResourceStatus::Running
            }
        }
    }
}

/// Result of a command executed inside a container
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

/// Result of a container run to completion
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub exit_code: i64,
    pub logs: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneReport {
    pub containers: usize,
    pub networks: usize,
    pub volumes: usize,
}

/// Parse a docker-style memory limit (`512m`, `4g`, `4G`, `1024`) into bytes
pub fn parse_memory(limit: &str) -> Option<i64> {
    let limit = limit.trim();
    if limit.is_empty() {
        return None;
    }

    let (digits, multiplier) = match limit.char_indices().last()? {
        (idx, c) if c.is_ascii_alphabetic() => {
            let multiplier: i64 = match c.to_ascii_lowercase() {
                'b' => 1,
                'k' => 1024,
                'm' => 1024 * 1024,
                'g' => 1024 * 1024 * 1024,
                _ => return None,
            };
            (&limit[..idx], multiplier)
        }
        _ => (limit, 1),
    };

    digits.parse::<i64>().ok()?.checked_mul(multiplier)
}
