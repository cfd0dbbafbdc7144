//! Flink session cluster with a SQL client container

use super::{check_submission, script_path, Engine, EngineHandle, FLINK};
use crate::context::BenchContext;
use crate::error::Result;
use crate::probe::{ReadinessCheck, ReadyWhen};
use crate::runtime::{async_trait, ContainerSpec};
use crate::settings::BenchSettings;
use tracing::info;

const JOBMANAGER: &str = "flink-jobmanager";
const TASKMANAGER: &str = "flink-taskmanager";
const REST_PORT: u16 = 8081;

pub struct FlinkEngine;

impl FlinkEngine {
    fn jobmanager_spec(settings: &BenchSettings) -> ContainerSpec {
        ContainerSpec::new(JOBMANAGER, &settings.flink_image)
            .cmd(["jobmanager"])
            .env(
                "FLINK_PROPERTIES",
                format!("jobmanager.rpc.address: {}", JOBMANAGER),
            )
            .port(REST_PORT, settings.flink_port)
            .memory(&settings.flink_jobmanager_memory)
            .cpu(settings.cpu_period, settings.cpu_quota())
            .network(&settings.network_name)
    }

    fn taskmanager_spec(settings: &BenchSettings, name: &str) -> ContainerSpec {
        let properties = [
            format!("jobmanager.rpc.address: {}", JOBMANAGER),
            format!(
                "taskmanager.numberOfTaskSlots: {}",
                settings.flink_taskmanager_slots
            ),
            format!(
                "taskmanager.memory.flink.size: {}",
                settings.flink_taskmanager_flink_memory
            ),
            format!(
                "taskmanager.memory.process.size: {}",
                settings.flink_taskmanager_process_memory
            ),
        ]
        .join("\n");

        ContainerSpec::new(name, &settings.flink_image)
            .cmd(["taskmanager"])
            .env("FLINK_PROPERTIES", properties)
            .memory(&settings.flink_taskmanager_memory)
            .cpu(settings.cpu_period, settings.cpu_quota())
            .network(&settings.network_name)
    }

    fn taskmanager_name(index: u32, total: u32) -> String {
        if total <= 1 {
            TASKMANAGER.to_string()
        } else {
            format!("{}-{}", TASKMANAGER, index + 1)
        }
    }

    fn client_spec(settings: &BenchSettings, case: &str) -> ContainerSpec {
        ContainerSpec::new("run_flink_query", &settings.flink_cli_image)
            .entrypoint([
                "/opt/flink/bin/sql-client.sh".to_string(),
                "embedded".to_string(),
                "-l".to_string(),
                "/opt/sql-client/lib".to_string(),
                "-f".to_string(),
                script_path(case),
            ])
            .bind(
                settings.engine_scripts_dir(FLINK).display(),
                "/home/scripts",
                "rw",
            )
            .network(&settings.network_name)
    }
}

#[async_trait]
impl Engine for FlinkEngine {
    fn platform(&self) -> &'static str {
        FLINK
    }

    async fn start(&self, ctx: &BenchContext) -> Result<EngineHandle> {
        let settings = &ctx.settings;
        let mut handle = EngineHandle::default();

        info!(taskmanagers = settings.flink_taskmanagers, "Starting Flink cluster");
        let jobmanager = ctx.launch(Self::jobmanager_spec(settings)).await?;
        handle.add("jobmanager", jobmanager);

        let total = settings.flink_taskmanagers.max(1);
        for index in 0..total {
            let name = Self::taskmanager_name(index, total);
            let id = ctx.launch(Self::taskmanager_spec(settings, &name)).await?;
            handle.add("taskmanager", id);
        }

        Ok(handle)
    }

    fn readiness_checks(
        &self,
        handle: &EngineHandle,
        settings: &BenchSettings,
    ) -> Vec<ReadinessCheck> {
        // Containers first so a crashed role fails fast instead of exhausting HTTP attempts
        let mut checks: Vec<ReadinessCheck> = handle
            .containers
            .iter()
            .map(|(role, id)| {
                ReadinessCheck::container_health(
                    format!("flink-{}", role),
                    id,
                    settings.health_check_interval(),
                    settings.health_max_attempts,
                )
            })
            .collect();

        checks.push(ReadinessCheck::http_get(
            "flink-cluster",
            format!("http://localhost:{}/overview", settings.flink_port),
            ReadyWhen::JsonFieldAtLeast {
                field: "taskmanagers".to_string(),
                min: u64::from(settings.flink_taskmanagers.max(1)),
            },
            settings.http_probe_interval(),
            settings.http_attempt_timeout(),
            settings.http_max_attempts,
        ));
        checks
    }

    async fn submit_query(
        &self,
        ctx: &BenchContext,
        case: &str,
        _handle: &EngineHandle,
    ) -> Result<()> {
        info!(case, "Running Flink SQL client");
        let output = ctx
            .run_to_completion(Self::client_spec(&ctx.settings, case))
            .await?;
        check_submission(case, output.exit_code, output.logs)
    }
}
