//! Timeplus streaming database in a single container

use super::{check_submission, curl_healthcheck, script_path, Engine, EngineHandle, TIMEPLUS};
use crate::context::BenchContext;
use crate::error::{HarnessError, Result};
use crate::probe::ReadinessCheck;
use crate::runtime::{async_trait, ContainerSpec};
use crate::settings::BenchSettings;
use std::time::Duration;
use tracing::info;

const CONTAINER: &str = "timeplus";

pub struct TimeplusEngine;

impl TimeplusEngine {
    fn spec(settings: &BenchSettings) -> ContainerSpec {
        ContainerSpec::new(CONTAINER, &settings.timeplus_image)
            // HTTP streaming, HTTP snapshot, TCP streaming
            .port(3218, 3218)
            .port(8123, 8123)
            .port(8463, 8463)
            .memory(&settings.timeplus_memory)
            .cpu(settings.cpu_period, settings.cpu_quota())
            .bind(
                settings.engine_scripts_dir(TIMEPLUS).display(),
                "/home/scripts",
                "rw",
            )
            .network(&settings.network_name)
            .healthcheck(curl_healthcheck(
                "http://localhost:3218/timeplus/ping",
                Duration::from_secs(2),
                Duration::from_secs(settings.health_check_timeout_secs),
                settings.health_check_retries,
                Duration::from_secs(10),
            ))
    }
}

#[async_trait]
impl Engine for TimeplusEngine {
    fn platform(&self) -> &'static str {
        TIMEPLUS
    }

    async fn start(&self, ctx: &BenchContext) -> Result<EngineHandle> {
        let mut handle = EngineHandle::default();
        handle.add(CONTAINER, ctx.launch(Self::spec(&ctx.settings)).await?);
        Ok(handle)
    }

    fn readiness_checks(
        &self,
        handle: &EngineHandle,
        settings: &BenchSettings,
    ) -> Vec<ReadinessCheck> {
        handle
            .containers
            .iter()
            .map(|(role, id)| {
                ReadinessCheck::container_health(
                    role,
                    id,
                    settings.health_check_interval(),
                    settings.health_max_attempts,
                )
            })
            .collect()
    }

    async fn submit_query(
        &self,
        ctx: &BenchContext,
        case: &str,
        handle: &EngineHandle,
    ) -> Result<()> {
        let id = handle.id(CONTAINER).ok_or_else(|| HarnessError::Readiness {
            target: CONTAINER.to_string(),
            reason: "container was not started".to_string(),
        })?;

        let cmd: Vec<String> = [
            "timeplusd",
            "client",
            "--multiquery",
            "--queries-file",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once(script_path(case)))
        .collect();

        info!(case, "Running Timeplus query");
        let output = ctx.exec(id, &cmd).await?;
        check_submission(case, output.exit_code, output.output)
    }
}
