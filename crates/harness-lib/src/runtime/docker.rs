//! Docker implementation of the container runtime boundary

use super::{
    async_trait, parse_memory, ContainerRuntime, ContainerSnapshot, ContainerSpec,
    ContainerSummary, ExecOutput, HealthState, PruneReport, RunState,
};
use crate::error::RuntimeError;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    PruneContainersOptions, RemoveContainerOptions, StatsOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerStateStatusEnum, HealthConfig, HealthStatusEnum, HostConfig, PortBinding,
};
use bollard::network::{CreateNetworkOptions, PruneNetworksOptions};
use bollard::volume::PruneVolumesOptions;
use bollard::Docker;
use std::collections::HashMap;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Container runtime backed by the local Docker daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using DOCKER_HOST or the platform default socket
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Api(format!("could not connect to Docker daemon: {}", e)))?;
        Ok(Self { docker })
    }

    fn container_config(spec: &ContainerSpec) -> Config<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|(container, _)| (format!("{}/tcp", container), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .ports
            .iter()
            .map(|(container, host)| {
                (
                    format!("{}/tcp", container),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host.to_string()),
                    }]),
                )
            })
            .collect();

        let memory = spec.memory.as_deref().and_then(|limit| {
            let bytes = parse_memory(limit);
            if bytes.is_none() {
                warn!(container = %spec.name, limit = %limit, "Ignoring unparseable memory limit");
            }
            bytes
        });

        let host_config = HostConfig {
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            network_mode: spec.network.clone(),
            memory,
            cpu_period: spec.cpu.map(|(period, _)| period),
            cpu_quota: spec.cpu.map(|(_, quota)| quota),
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            ..Default::default()
        };

        let healthcheck = spec.healthcheck.as_ref().map(|check| HealthConfig {
            test: Some(check.test.clone()),
            interval: Some(check.interval.as_nanos() as i64),
            timeout: Some(check.timeout.as_nanos() as i64),
            retries: Some(check.retries),
            start_period: Some(check.start_period.as_nanos() as i64),
            ..Default::default()
        });

        Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            entrypoint: spec.entrypoint.clone(),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            healthcheck,
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

/// Map a bollard error, turning HTTP 404 into `NotFound`
fn map_err(kind: &'static str, id: &str, err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::not_found(kind, id),
        other => RuntimeError::Api(other.to_string()),
    }
}

fn run_state(status: Option<ContainerStateStatusEnum>) -> RunState {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => RunState::Created,
        Some(ContainerStateStatusEnum::RUNNING) => RunState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => RunState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => RunState::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => RunState::Removing,
        Some(ContainerStateStatusEnum::EXITED) => RunState::Exited,
        Some(ContainerStateStatusEnum::DEAD) => RunState::Dead,
        _ => RunState::Unknown,
    }
}

fn health_state(status: Option<HealthStatusEnum>) -> Option<HealthState> {
    match status {
        Some(HealthStatusEnum::STARTING) => Some(HealthState::Starting),
        Some(HealthStatusEnum::HEALTHY) => Some(HealthState::Healthy),
        Some(HealthStatusEnum::UNHEALTHY) => Some(HealthState::Unhealthy),
        _ => None,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                let err = map_err("image", image, e);
                if !err.is_not_found() {
                    return Err(err);
                }
            }
        }

        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = Box::pin(self.docker.create_image(Some(options), None, None));
        while let Some(step) = progress.next().await {
            step.map_err(|e| map_err("image", image, e))?;
        }
        Ok(())
    }

    async fn create_network(&self, name: &str) -> Result<String, RuntimeError> {
        let options = CreateNetworkOptions {
            name,
            driver: "bridge",
            ..Default::default()
        };
        let response = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| map_err("network", name, e))?;
        Ok(response.id.unwrap_or_else(|| name.to_string()))
    }

    async fn remove_network(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_network(id)
            .await
            .map_err(|e| map_err("network", id, e))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), Self::container_config(spec))
            .await
            .map_err(|e| map_err("container", &spec.name, e))?;

        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "Runtime warning on create");
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(|e| map_err("container", id, e))
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut responses = Box::pin(self.docker.wait_container(id, Some(options)));
        let mut exit_code = 0;
        while let Some(response) = responses.next().await {
            match response {
                Ok(done) => exit_code = done.status_code,
                // bollard reports a non-zero exit as an error carrying the code
                Err(DockerError::DockerContainerWaitError { code, .. }) => exit_code = code,
                Err(e) => return Err(map_err("container", id, e)),
            }
        }
        Ok(exit_code)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot, RuntimeError> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_err("container", id, e))?;

        let state = info.state.as_ref();
        Ok(ContainerSnapshot {
            id: info.id.clone().unwrap_or_else(|| id.to_string()),
            name: info
                .name
                .as_deref()
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            state: run_state(state.and_then(|s| s.status.clone())),
            health: health_state(
                state
                    .and_then(|s| s.health.as_ref())
                    .and_then(|h| h.status.clone()),
            ),
            exit_code: state.and_then(|s| s.exit_code),
        })
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_err("container", id, e)),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_err("container", id, e))
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput, RuntimeError> {
        let options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(id, options)
            .await
            .map_err(|e| map_err("container", id, e))?;

        let mut output = String::new();
        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_err("exec", &exec.id, e))?;
        if let StartExecResults::Attached {
            output: mut chunks, ..
        } = started
        {
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.map_err(|e| map_err("exec", &exec.id, e))?;
                output.push_str(&chunk.to_string());
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_err("exec", &exec.id, e))?;
        debug!(container_id = %id, exit_code = ?inspect.exit_code, "Exec finished");

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            output,
        })
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        let mut lines = Box::pin(self.docker.logs(id, Some(options)));
        let mut logs = String::new();
        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| map_err("container", id, e))?;
            logs.push_str(&line.to_string());
        }
        Ok(logs)
    }

    async fn list_running(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                Some(ContainerSummary { id, name })
            })
            .collect())
    }

    async fn stats(&self, id: &str) -> Result<serde_json::Value, RuntimeError> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut snapshots = Box::pin(self.docker.stats(id, Some(options)));
        match snapshots.next().await {
            Some(Ok(stats)) => {
                serde_json::to_value(stats).map_err(|e| RuntimeError::Api(e.to_string()))
            }
            Some(Err(e)) => Err(map_err("container", id, e)),
            None => Err(RuntimeError::not_found("container", id)),
        }
    }

    async fn prune(&self) -> Result<PruneReport, RuntimeError> {
        let containers = self
            .docker
            .prune_containers(None::<PruneContainersOptions<String>>)
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;
        let networks = self
            .docker
            .prune_networks(None::<PruneNetworksOptions<String>>)
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;
        let volumes = self
            .docker
            .prune_volumes(None::<PruneVolumesOptions<String>>)
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;

        Ok(PruneReport {
            containers: containers.containers_deleted.map(|v| v.len()).unwrap_or(0),
            networks: networks.networks_deleted.map(|v| v.len()).unwrap_or(0),
            volumes: volumes.volumes_deleted.map(|v| v.len()).unwrap_or(0),
        })
    }
}
