//! In-memory doubles for the runtime and broker boundaries

use crate::broker::{MessageBroker, OutputSource};
use crate::error::{BrokerError, RuntimeError};
use crate::probe::{Observation, ReadinessSignal};
use crate::runtime::{
    async_trait, ContainerRuntime, ContainerSnapshot, ContainerSpec, ContainerSummary,
    ExecOutput, HealthState, PruneReport, RunState,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct MockContainer {
    name: String,
    image: String,
    spec: ContainerSpec,
    state: RunState,
    health: Option<HealthState>,
    exit_code: Option<i64>,
}

/// Container runtime that keeps its state in memory
///
/// Containers with a health check become healthy as soon as they start
/// unless overridden with [`MockRuntime::set_health`]. Run-to-completion
/// containers exit with the code registered for their image (0 by default).
#[derive(Default)]
pub(crate) struct MockRuntime {
    containers: Mutex<HashMap<String, MockContainer>>,
    networks: Mutex<HashMap<String, String>>,
    next_id: AtomicUsize,
    calls: Mutex<Vec<String>>,
    exit_codes: Mutex<HashMap<String, i64>>,
    exec_result: Mutex<Option<ExecOutput>>,
    start_health: Mutex<HashMap<String, HealthState>>,
    failing_removes: Mutex<HashSet<String>>,
    failing_stats: Mutex<HashSet<String>>,
    failing_images: Mutex<HashSet<String>>,
    stats_delay: Mutex<Duration>,
    stop_delay: Mutex<Duration>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn was_called(&self, call: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == call)
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    pub fn network_count(&self) -> usize {
        self.networks.lock().unwrap().len()
    }

    /// Specs of every container still present, keyed by name
    pub fn spec_by_name(&self, name: &str) -> Option<ContainerSpec> {
        self.containers
            .lock()
            .unwrap()
            .values()
            .find(|c| c.name == name)
            .map(|c| c.spec.clone())
    }

    pub fn id_by_name(&self, name: &str) -> Option<String> {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| id.clone())
    }

    pub fn set_exit_code(&self, image: &str, code: i64) {
        self.exit_codes.lock().unwrap().insert(image.to_string(), code);
    }

    pub fn set_exec_result(&self, exit_code: i64, output: &str) {
        *self.exec_result.lock().unwrap() = Some(ExecOutput {
            exit_code,
            output: output.to_string(),
        });
    }

    /// Health reported once a container with this name starts
    pub fn set_start_health(&self, name: &str, health: HealthState) {
        self.start_health
            .lock()
            .unwrap()
            .insert(name.to_string(), health);
    }

    pub fn set_health(&self, id: &str, health: Option<HealthState>) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.health = health;
        }
    }

    pub fn set_exited(&self, id: &str, code: i64) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.state = RunState::Exited;
            c.exit_code = Some(code);
        }
    }

    pub fn forget(&self, id: &str) {
        self.containers.lock().unwrap().remove(id);
    }

    pub fn fail_remove(&self, id: &str) {
        self.failing_removes.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_stats(&self, id: &str) {
        self.failing_stats.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_image(&self, image: &str) {
        self.failing_images.lock().unwrap().insert(image.to_string());
    }

    /// Make every stats call take this long
    pub fn set_stats_delay(&self, delay: Duration) {
        *self.stats_delay.lock().unwrap() = delay;
    }

    /// Make every stop call take this long
    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap() = delay;
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}{:012}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(format!("ensure_image:{}", image));
        if self.failing_images.lock().unwrap().contains(image) {
            return Err(RuntimeError::Api(format!("pull access denied for {}", image)));
        }
        Ok(())
    }

    async fn create_network(&self, name: &str) -> Result<String, RuntimeError> {
        let id = self.next_id("net");
        self.record(format!("create_network:{}", name));
        self.networks
            .lock()
            .unwrap()
            .insert(id.clone(), name.to_string());
        Ok(id)
    }

    async fn remove_network(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove_network:{}", id));
        self.networks
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::not_found("network", id))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let id = self.next_id("c");
        self.record(format!("create:{}", spec.name));
        self.containers.lock().unwrap().insert(
            id.clone(),
            MockContainer {
                name: spec.name.clone(),
                image: spec.image.clone(),
                spec: spec.clone(),
                state: RunState::Created,
                health: None,
                exit_code: None,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("start:{}", id));
        let start_health = self.start_health.lock().unwrap().clone();
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::not_found("container", id))?;
        container.state = RunState::Running;
        if container.spec.healthcheck.is_some() {
            container.health = Some(
                start_health
                    .get(&container.name)
                    .copied()
                    .unwrap_or(HealthState::Healthy),
            );
        }
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        self.record(format!("wait:{}", id));
        let exit_codes = self.exit_codes.lock().unwrap().clone();
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::not_found("container", id))?;
        let code = exit_codes.get(&container.image).copied().unwrap_or(0);
        container.state = RunState::Exited;
        container.exit_code = Some(code);
        Ok(code)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot, RuntimeError> {
        self.record(format!("inspect:{}", id));
        let containers = self.containers.lock().unwrap();
        let container = containers
            .get(id)
            .ok_or_else(|| RuntimeError::not_found("container", id))?;
        Ok(ContainerSnapshot {
            id: id.to_string(),
            name: container.name.clone(),
            state: container.state,
            health: container.health,
            exit_code: container.exit_code,
        })
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        self.record(format!("stop:{}", id));
        let delay = *self.stop_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::not_found("container", id))?;
        container.state = RunState::Exited;
        container.exit_code.get_or_insert(137);
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove:{}", id));
        if self.failing_removes.lock().unwrap().contains(id) {
            self.containers.lock().unwrap().remove(id);
            return Err(RuntimeError::Api(format!("removal of {} already in progress", id)));
        }
        self.containers
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::not_found("container", id))
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput, RuntimeError> {
        self.record(format!("exec:{}:{}", id, cmd.join(" ")));
        if !self.containers.lock().unwrap().contains_key(id) {
            return Err(RuntimeError::not_found("container", id));
        }
        Ok(self
            .exec_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(ExecOutput {
                exit_code: 0,
                output: "ok".to_string(),
            }))
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String, RuntimeError> {
        self.record(format!("logs:{}:{}", id, tail));
        let containers = self.containers.lock().unwrap();
        let container = containers
            .get(id)
            .ok_or_else(|| RuntimeError::not_found("container", id))?;
        Ok(format!("{} log output\n", container.name))
    }

    async fn list_running(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let containers = self.containers.lock().unwrap();
        let mut running: Vec<_> = containers
            .iter()
            .filter(|(_, c)| c.state == RunState::Running)
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                name: c.name.clone(),
            })
            .collect();
        running.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(running)
    }

    async fn stats(&self, id: &str) -> Result<serde_json::Value, RuntimeError> {
        let delay = *self.stats_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing_stats.lock().unwrap().contains(id) {
            return Err(RuntimeError::Api("stats unavailable".to_string()));
        }
        Ok(serde_json::json!({
            "id": id,
            "cpu_stats": { "online_cpus": 2 },
            "memory_stats": { "usage": 1024 },
        }))
    }

    async fn prune(&self) -> Result<PruneReport, RuntimeError> {
        self.record("prune".to_string());
        let mut containers = self.containers.lock().unwrap();
        let before = containers.len();
        containers.retain(|_, c| c.state != RunState::Exited);
        Ok(PruneReport {
            containers: before - containers.len(),
            networks: 0,
            volumes: 0,
        })
    }
}

/// One scripted poll result: how long the poll takes and how many messages it returns
pub(crate) type ScriptedPoll = (Duration, usize);

/// Output source that replays a fixed script, then reports empty polls
pub(crate) struct MockOutputSource {
    script: VecDeque<ScriptedPoll>,
    polls: usize,
}

impl MockOutputSource {
    pub fn new(script: Vec<ScriptedPoll>) -> Self {
        Self {
            script: script.into(),
            polls: 0,
        }
    }

    /// Zero-latency batches of the given sizes
    pub fn counts(counts: &[usize]) -> Self {
        Self::new(counts.iter().map(|&n| (Duration::ZERO, n)).collect())
    }

    pub fn polls(&self) -> usize {
        self.polls
    }
}

#[async_trait]
impl OutputSource for MockOutputSource {
    async fn poll_batch(&mut self, timeout: Duration) -> Result<usize, BrokerError> {
        self.polls += 1;
        let (delay, count) = self.script.pop_front().unwrap_or((timeout, 0));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(count)
    }
}

/// Broker that records topic operations and hands out scripted sources
#[derive(Default)]
pub(crate) struct MockBroker {
    pub created: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    scripts: Mutex<HashMap<String, Vec<ScriptedPoll>>>,
    fail_create: Mutex<bool>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, topic: &str, polls: Vec<ScriptedPoll>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(topic.to_string(), polls);
    }

    pub fn fail_create(&self) {
        *self.fail_create.lock().unwrap() = true;
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBroker for MockBroker {
    async fn create_topics(&self, topics: &[String], _partitions: i32) -> Result<(), BrokerError> {
        if *self.fail_create.lock().unwrap() {
            return Err(BrokerError::Topic {
                topic: topics.join(","),
                message: "broker unavailable".to_string(),
            });
        }
        self.created.lock().unwrap().extend(topics.iter().cloned());
        Ok(())
    }

    async fn delete_topics(&self, topics: &[String]) -> Result<(), BrokerError> {
        self.deleted.lock().unwrap().extend(topics.iter().cloned());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn OutputSource>, BrokerError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .remove(topic)
            .unwrap_or_default();
        Ok(Box::new(MockOutputSource::new(script)))
    }
}

/// Readiness signal that replays scripted observations
///
/// Once the script runs out it keeps reporting pending. A non-zero delay
/// makes every observation that slow, to exercise the per-attempt timeout.
pub(crate) struct ScriptedSignal {
    target: String,
    script: Mutex<VecDeque<Observation>>,
    delay: Duration,
    observations: AtomicUsize,
    diagnostics_calls: AtomicUsize,
}

impl ScriptedSignal {
    pub fn new(script: Vec<Observation>) -> Self {
        Self {
            target: "mock".to_string(),
            script: Mutex::new(script.into()),
            delay: Duration::ZERO,
            observations: AtomicUsize::new(0),
            diagnostics_calls: AtomicUsize::new(0),
        }
    }

    /// Pending `n - 1` times, then ready
    pub fn ready_on(n: usize) -> Self {
        let mut script = vec![Observation::Pending("starting".to_string()); n.saturating_sub(1)];
        script.push(Observation::Ready);
        Self::new(script)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn observations(&self) -> usize {
        self.observations.load(Ordering::SeqCst)
    }

    pub fn diagnostics_calls(&self) -> usize {
        self.diagnostics_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessSignal for ScriptedSignal {
    fn target(&self) -> &str {
        &self.target
    }

    async fn observe(&self) -> Observation {
        self.observations.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Observation::Pending("no change".to_string()))
    }

    async fn diagnostics(&self) -> String {
        self.diagnostics_calls.fetch_add(1, Ordering::SeqCst);
        "last 50 lines".to_string()
    }
}
