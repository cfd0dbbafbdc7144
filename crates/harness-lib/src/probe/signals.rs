//! Readiness signals backed by the container runtime and by HTTP

use super::{Observation, ReadinessSignal, ReadyWhen};
use crate::runtime::{async_trait, ContainerRuntime, HealthState, RunState};
use std::sync::Arc;
use tracing::debug;

/// Log lines captured when a container fails its readiness probe
const DIAGNOSTIC_TAIL: usize = 50;

/// Observes the runtime's health field of one container
pub struct ContainerHealthSignal {
    target: String,
    runtime: Arc<dyn ContainerRuntime>,
    container_id: String,
}

impl ContainerHealthSignal {
    pub fn new(
        target: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        container_id: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            runtime,
            container_id: container_id.into(),
        }
    }
}

#[async_trait]
impl ReadinessSignal for ContainerHealthSignal {
    fn target(&self) -> &str {
        &self.target
    }

    async fn observe(&self) -> Observation {
        let snapshot = match self.runtime.inspect_container(&self.container_id).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => return Observation::Exited { exit_code: None },
            Err(e) => return Observation::Pending(e.to_string()),
        };

        match (snapshot.state, snapshot.health) {
            (RunState::Exited | RunState::Dead | RunState::Removing, _) => Observation::Exited {
                exit_code: snapshot.exit_code,
            },
            (_, Some(HealthState::Unhealthy)) => Observation::Unhealthy,
            (RunState::Running, Some(HealthState::Healthy)) => Observation::Ready,
            // No health check configured: running is as ready as it gets
            (RunState::Running, None) => Observation::Ready,
            (state, health) => Observation::Pending(format!("{:?}/{:?}", state, health)),
        }
    }

    async fn diagnostics(&self) -> String {
        match self.runtime.logs(&self.container_id, DIAGNOSTIC_TAIL).await {
            Ok(logs) => logs,
            Err(e) => {
                debug!(container_id = %self.container_id, error = %e, "Failed to fetch logs");
                format!("<logs unavailable: {}>", e)
            }
        }
    }
}

/// Observes an HTTP endpoint, optionally checking a JSON field of the body
pub struct HttpSignal {
    target: String,
    client: reqwest::Client,
    url: url::Url,
    ready_when: ReadyWhen,
}

impl HttpSignal {
    pub fn new(
        target: impl Into<String>,
        client: reqwest::Client,
        url: url::Url,
        ready_when: ReadyWhen,
    ) -> Self {
        Self {
            target: target.into(),
            client,
            url,
            ready_when,
        }
    }
}

#[async_trait]
impl ReadinessSignal for HttpSignal {
    fn target(&self) -> &str {
        &self.target
    }

    async fn observe(&self) -> Observation {
        let response = match self.client.get(self.url.clone()).send().await {
            Ok(response) => response,
            Err(e) => return Observation::Pending(e.to_string()),
        };

        if response.status() != reqwest::StatusCode::OK {
            return Observation::Pending(format!("HTTP {}", response.status()));
        }

        match &self.ready_when {
            ReadyWhen::StatusOk => Observation::Ready,
            ReadyWhen::JsonFieldAtLeast { field, min } => {
                let body: serde_json::Value = match response.json().await {
                    Ok(body) => body,
                    Err(e) => return Observation::Pending(format!("unreadable body: {}", e)),
                };
                match body.get(field).and_then(serde_json::Value::as_u64) {
                    Some(value) if value >= *min => Observation::Ready,
                    Some(value) => Observation::Pending(format!("{} is {}, want {}", field, value, min)),
                    None => Observation::Pending(format!("{} missing", field)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ContainerSpec;
    use crate::testing::MockRuntime;

    async fn started(runtime: &Arc<MockRuntime>, spec: ContainerSpec) -> String {
        let id = runtime.create_container(&spec).await.unwrap();
        runtime.start_container(&id).await.unwrap();
        id
    }

    fn healthcheck() -> crate::runtime::HealthCheckSpec {
        crate::runtime::HealthCheckSpec {
            test: vec!["CMD-SHELL".into(), "true".into()],
            interval: std::time::Duration::from_secs(1),
            timeout: std::time::Duration::from_secs(1),
            retries: 3,
            start_period: std::time::Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_container_without_healthcheck_ready_when_running() {
        let runtime = Arc::new(MockRuntime::new());
        let id = started(&runtime, ContainerSpec::new("plain", "busybox")).await;

        let signal = ContainerHealthSignal::new("plain", runtime.clone(), &id);

        assert_eq!(signal.observe().await, Observation::Ready);
    }

    #[tokio::test]
    async fn test_container_health_transitions() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.set_start_health("timeplus", HealthState::Starting);
        let id = started(
            &runtime,
            ContainerSpec::new("timeplus", "timeplus/timeplusd").healthcheck(healthcheck()),
        )
        .await;
        let signal = ContainerHealthSignal::new("timeplus", runtime.clone(), &id);

        assert!(matches!(signal.observe().await, Observation::Pending(_)));

        runtime.set_health(&id, Some(HealthState::Unhealthy));
        assert_eq!(signal.observe().await, Observation::Unhealthy);

        runtime.set_health(&id, Some(HealthState::Healthy));
        assert_eq!(signal.observe().await, Observation::Ready);

        runtime.set_exited(&id, 137);
        assert_eq!(
            signal.observe().await,
            Observation::Exited {
                exit_code: Some(137)
            }
        );
        assert!(signal.diagnostics().await.contains("timeplus"));
    }

    #[tokio::test]
    async fn test_vanished_container_counts_as_exited() {
        let runtime = Arc::new(MockRuntime::new());
        let id = started(&runtime, ContainerSpec::new("ksqldb", "ksqldb")).await;
        runtime.forget(&id);

        let signal = ContainerHealthSignal::new("ksqldb", runtime.clone(), &id);

        assert_eq!(signal.observe().await, Observation::Exited { exit_code: None });
        assert!(signal.diagnostics().await.starts_with("<logs unavailable"));
    }

    async fn overview_signal(server: &mockito::ServerGuard) -> HttpSignal {
        let url = url::Url::parse(&format!("{}/overview", server.url())).unwrap();
        HttpSignal::new(
            "flink",
            reqwest::Client::new(),
            url,
            ReadyWhen::JsonFieldAtLeast {
                field: "taskmanagers".into(),
                min: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_http_taskmanager_threshold() {
        let mut starting = mockito::Server::new_async().await;
        let overview = starting
            .mock("GET", "/overview")
            .with_status(200)
            .with_body(r#"{"taskmanagers":0,"slots-total":0}"#)
            .create_async()
            .await;

        let signal = overview_signal(&starting).await;
        assert_eq!(
            signal.observe().await,
            Observation::Pending("taskmanagers is 0, want 1".into())
        );
        overview.assert_async().await;

        let mut ready = mockito::Server::new_async().await;
        ready
            .mock("GET", "/overview")
            .with_status(200)
            .with_body(r#"{"taskmanagers":1,"slots-total":1}"#)
            .create_async()
            .await;

        let signal = overview_signal(&ready).await;
        assert_eq!(signal.observe().await, Observation::Ready);
    }

    #[tokio::test]
    async fn test_http_non_200_is_pending() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/info")
            .with_status(503)
            .create_async()
            .await;

        let url = url::Url::parse(&format!("{}/info", server.url())).unwrap();
        let signal = HttpSignal::new("ksqldb", reqwest::Client::new(), url, ReadyWhen::StatusOk);

        assert_eq!(
            signal.observe().await,
            Observation::Pending("HTTP 503 Service Unavailable".into())
        );
    }

    #[tokio::test]
    async fn test_http_connection_refused_is_pending() {
        let url = url::Url::parse("http://127.0.0.1:1/overview").unwrap();
        let signal = HttpSignal::new("flink", reqwest::Client::new(), url, ReadyWhen::StatusOk);

        assert!(matches!(signal.observe().await, Observation::Pending(_)));
    }
}
