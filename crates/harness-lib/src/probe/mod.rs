//! Readiness probing
//!
//! A probe polls one [`ReadinessSignal`] at a fixed interval until it
//! reports ready, fails terminally, or runs out of attempts.
//!
//! ```text
//! polling ──ready──────────────▶ healthy
//!    │ ──unhealthy─────────────▶ unhealthy   (logs captured)
//!    │ ──exited / vanished─────▶ exited      (logs captured)
//!    │ ──attempts exhausted────▶ timed-out
//!    └─pending / slow / error──▶ sleep(interval), poll again
//! ```

mod signals;

pub use signals::{ContainerHealthSignal, HttpSignal};

use crate::error::{HarnessError, Result};
use crate::runtime::{async_trait, ContainerRuntime};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What a single observation of a resource saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Ready,
    /// Not ready yet, or the observation itself failed transiently
    Pending(String),
    Unhealthy,
    /// Exited, dead, or vanished from the runtime
    Exited { exit_code: Option<i64> },
}

/// Something whose readiness can be observed repeatedly
#[async_trait]
pub trait ReadinessSignal: Send + Sync {
    /// Label used in logs and errors
    fn target(&self) -> &str;

    /// Take one observation; transient failures are reported as pending
    async fn observe(&self) -> Observation;

    /// Diagnostic text captured after a terminal failure
    async fn diagnostics(&self) -> String {
        String::new()
    }
}

/// Condition an HTTP response body must satisfy
#[derive(Debug, Clone, PartialEq)]
pub enum ReadyWhen {
    /// HTTP 200 is enough
    StatusOk,
    /// HTTP 200 and a numeric top-level JSON field of at least `min`
    JsonFieldAtLeast { field: String, min: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckKind {
    ContainerHealth { container_id: String },
    HttpGet { url: String, ready_when: ReadyWhen },
}

/// Stateless description of one readiness probe
#[derive(Debug, Clone, PartialEq)]
pub struct ReadinessCheck {
    pub target: String,
    pub kind: CheckKind,
    pub interval: Duration,
    pub attempt_timeout: Duration,
    pub max_attempts: u32,
}

impl ReadinessCheck {
    pub fn container_health(
        target: impl Into<String>,
        container_id: impl Into<String>,
        interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            target: target.into(),
            kind: CheckKind::ContainerHealth {
                container_id: container_id.into(),
            },
            interval,
            attempt_timeout: interval.max(Duration::from_secs(1)),
            max_attempts,
        }
    }

    pub fn http_get(
        target: impl Into<String>,
        url: impl Into<String>,
        ready_when: ReadyWhen,
        interval: Duration,
        attempt_timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            target: target.into(),
            kind: CheckKind::HttpGet {
                url: url.into(),
                ready_when,
            },
            interval,
            attempt_timeout,
            max_attempts,
        }
    }

    /// Build the signal this check observes
    pub fn signal(
        &self,
        runtime: Arc<dyn ContainerRuntime>,
        client: reqwest::Client,
    ) -> Result<Box<dyn ReadinessSignal>> {
        Ok(match &self.kind {
            CheckKind::ContainerHealth { container_id } => Box::new(ContainerHealthSignal::new(
                &self.target,
                runtime,
                container_id,
            )),
            CheckKind::HttpGet { url, ready_when } => {
                let url = url::Url::parse(url).map_err(|e| {
                    HarnessError::Config(format!("invalid probe url {}: {}", url, e))
                })?;
                Box::new(HttpSignal::new(&self.target, client, url, ready_when.clone()))
            }
        })
    }
}

/// Terminal state of a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy { attempts: u32 },
    Unhealthy { attempts: u32, logs: String },
    Exited {
        attempts: u32,
        exit_code: Option<i64>,
        logs: String,
    },
    TimedOut { attempts: u32 },
}

impl ProbeOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            ProbeOutcome::Healthy { attempts }
            | ProbeOutcome::Unhealthy { attempts, .. }
            | ProbeOutcome::Exited { attempts, .. }
            | ProbeOutcome::TimedOut { attempts } => *attempts,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Healthy { .. } => "healthy",
            ProbeOutcome::Unhealthy { .. } => "unhealthy",
            ProbeOutcome::Exited { .. } => "exited",
            ProbeOutcome::TimedOut { .. } => "timed-out",
        }
    }

    /// Every non-healthy outcome becomes the same readiness error
    pub fn into_result(self, target: &str) -> Result<u32> {
        let reason = match self {
            ProbeOutcome::Healthy { attempts } => return Ok(attempts),
            ProbeOutcome::Unhealthy { logs, .. } => format!("unhealthy\n{}", logs),
            ProbeOutcome::Exited {
                exit_code, logs, ..
            } => match exit_code {
                Some(code) => format!("exited with code {}\n{}", code, logs),
                None => format!("exited\n{}", logs),
            },
            ProbeOutcome::TimedOut { attempts } => {
                format!("still not ready after {} attempts", attempts)
            }
        };
        Err(HarnessError::Readiness {
            target: target.to_string(),
            reason: reason.trim_end().to_string(),
        })
    }
}

/// Poll `signal` until it reaches a terminal state
///
/// `max_attempts` of zero is treated as one; an observation that takes
/// longer than `attempt_timeout` counts as pending.
pub async fn probe(
    signal: &dyn ReadinessSignal,
    interval: Duration,
    attempt_timeout: Duration,
    max_attempts: u32,
) -> ProbeOutcome {
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let observation = tokio::time::timeout(attempt_timeout, signal.observe())
            .await
            .unwrap_or_else(|_| {
                Observation::Pending(format!(
                    "no answer within {}s",
                    attempt_timeout.as_secs_f64()
                ))
            });

        match observation {
            Observation::Ready => {
                debug!(target = signal.target(), attempt, "Ready");
                return ProbeOutcome::Healthy { attempts: attempt };
            }
            Observation::Unhealthy => {
                return ProbeOutcome::Unhealthy {
                    attempts: attempt,
                    logs: signal.diagnostics().await,
                };
            }
            Observation::Exited { exit_code } => {
                return ProbeOutcome::Exited {
                    attempts: attempt,
                    exit_code,
                    logs: signal.diagnostics().await,
                };
            }
            Observation::Pending(reason) => {
                debug!(
                    target = signal.target(),
                    attempt,
                    max_attempts,
                    reason = %reason,
                    "Not ready yet"
                );
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    ProbeOutcome::TimedOut {
        attempts: max_attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSignal;

    const INTERVAL: Duration = Duration::from_secs(3);
    const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn test_healthy_on_nth_attempt() {
        let signal = ScriptedSignal::ready_on(4);

        let started = tokio::time::Instant::now();
        let outcome = probe(&signal, INTERVAL, ATTEMPT_TIMEOUT, 20).await;

        assert_eq!(outcome, ProbeOutcome::Healthy { attempts: 4 });
        assert_eq!(signal.observations(), 4);
        // Three sleeps between four observations
        assert_eq!(started.elapsed(), INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_attempt_cap() {
        let signal = ScriptedSignal::new(Vec::new());

        let outcome = probe(&signal, INTERVAL, ATTEMPT_TIMEOUT, 5).await;

        assert_eq!(outcome, ProbeOutcome::TimedOut { attempts: 5 });
        assert_eq!(signal.observations(), 5);
        assert_eq!(signal.diagnostics_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_is_immediately_terminal() {
        let signal = ScriptedSignal::new(vec![
            Observation::Pending("starting".into()),
            Observation::Unhealthy,
            Observation::Ready,
        ]);

        let outcome = probe(&signal, INTERVAL, ATTEMPT_TIMEOUT, 20).await;

        assert_eq!(
            outcome,
            ProbeOutcome::Unhealthy {
                attempts: 2,
                logs: "last 50 lines".into()
            }
        );
        assert_eq!(signal.observations(), 2);
        assert_eq!(signal.diagnostics_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exited_is_immediately_terminal() {
        let signal = ScriptedSignal::new(vec![Observation::Exited { exit_code: Some(1) }]);

        let outcome = probe(&signal, INTERVAL, ATTEMPT_TIMEOUT, 20).await;

        assert!(matches!(
            outcome,
            ProbeOutcome::Exited {
                attempts: 1,
                exit_code: Some(1),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_observation_counts_as_pending() {
        let signal = ScriptedSignal::ready_on(1).with_delay(Duration::from_secs(30));

        let outcome = probe(&signal, INTERVAL, ATTEMPT_TIMEOUT, 3).await;

        assert_eq!(outcome, ProbeOutcome::TimedOut { attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_clamped_to_one() {
        let signal = ScriptedSignal::new(Vec::new());

        let outcome = probe(&signal, INTERVAL, ATTEMPT_TIMEOUT, 0).await;

        assert_eq!(outcome, ProbeOutcome::TimedOut { attempts: 1 });
        assert_eq!(signal.observations(), 1);
    }

    #[test]
    fn test_outcomes_map_to_readiness_error() {
        assert_eq!(
            ProbeOutcome::Healthy { attempts: 2 }
                .into_result("kafka")
                .unwrap(),
            2
        );

        for outcome in [
            ProbeOutcome::Unhealthy {
                attempts: 1,
                logs: "boom".into(),
            },
            ProbeOutcome::Exited {
                attempts: 1,
                exit_code: None,
                logs: String::new(),
            },
            ProbeOutcome::TimedOut { attempts: 20 },
        ] {
            let err = outcome.into_result("timeplus").unwrap_err();
            assert!(matches!(err, HarnessError::Readiness { ref target, .. } if target == "timeplus"));
            assert!(err.is_trial_scoped());
        }
    }

    #[test]
    fn test_invalid_probe_url_is_config_error() {
        let check = ReadinessCheck::http_get(
            "flink",
            "not a url",
            ReadyWhen::StatusOk,
            INTERVAL,
            ATTEMPT_TIMEOUT,
            3,
        );
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(crate::testing::MockRuntime::new());
        let result = check.signal(runtime, reqwest::Client::new());
        assert!(matches!(result, Err(HarnessError::Config(_))));
    }
}
