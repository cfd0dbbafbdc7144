//! ksqlDB server with queries submitted through the bundled CLI

use super::{check_submission, curl_healthcheck, script_path, Engine, EngineHandle, KSQLDB};
use crate::context::BenchContext;
use crate::error::{HarnessError, Result};
use crate::probe::ReadinessCheck;
use crate::runtime::{async_trait, ContainerSpec};
use crate::settings::BenchSettings;
use std::time::Duration;
use tracing::info;

const CONTAINER: &str = "ksqldb";
const PORT: u16 = 8088;

pub struct KsqldbEngine;

impl KsqldbEngine {
    fn spec(settings: &BenchSettings) -> ContainerSpec {
        ContainerSpec::new(CONTAINER, &settings.ksqldb_image)
            .port(PORT, PORT)
            .env("KSQL_BOOTSTRAP_SERVERS", &settings.kafka_internal_servers)
            .env("KSQL_LISTENERS", format!("http://0.0.0.0:{}/", PORT))
            .env("KSQL_KSQL_SERVICE_ID", "ksql_service_")
            .memory(&settings.ksqldb_memory)
            .cpu(settings.cpu_period, settings.cpu_quota())
            .bind(
                settings.engine_scripts_dir(KSQLDB).display(),
                "/home/scripts",
                "rw",
            )
            .network(&settings.network_name)
            .healthcheck(curl_healthcheck(
                &format!("http://localhost:{}/info", PORT),
                Duration::from_secs(2),
                Duration::from_secs(settings.health_check_timeout_secs),
                settings.health_check_retries,
                Duration::from_secs(10),
            ))
    }
}

#[async_trait]
impl Engine for KsqldbEngine {
    fn platform(&self) -> &'static str {
        KSQLDB
    }

    fn unsupported_reason(&self, case: &str, settings: &BenchSettings) -> Option<String> {
        settings
            .ksqldb_unsupported_cases
            .iter()
            .any(|c| c.eq_ignore_ascii_case(case))
            .then(|| case.to_string())
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

        let cmd = vec![
            "ksql".to_string(),
            format!("http://localhost:{}", PORT),
            "--file".to_string(),
            script_path(case),
        ];

        info!(case, "Running ksqlDB query");
        let output = ctx.exec(id, &cmd).await?;
        check_submission(case, output.exit_code, output.output)
    }

    fn extra_topics(&self, settings: &BenchSettings) -> Vec<String> {
        settings.ksqldb_extra_topics.clone()
    }
}
