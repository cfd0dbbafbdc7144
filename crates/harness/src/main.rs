//! Nexmark benchmark harness
//!
//! Provisions a broker and streaming engines in Docker, runs Nexmark cases
//! against each engine and reports execution time and output size.

mod config;
mod output;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use harness_lib::engine::{self, PLATFORMS};
use harness_lib::{
    BenchContext, BenchmarkDriver, BenchmarkPlan, DockerRuntime, HarnessMetrics, KafkaBroker,
    ReportWriter, StructuredLogger, Workload,
};
use output::{LogFormat, OutputFormat};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code after an interrupt, as for a shell killed by SIGINT
const EXIT_INTERRUPTED: u8 = 130;

/// Nexmark benchmark harness
#[derive(Parser)]
#[command(name = "nexmark-harness")]
#[command(author, version, about = "Nexmark benchmark harness for streaming engines", long_about = None)]
pub struct Cli {
    /// Cases to run (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "base")]
    pub cases: Vec<String>,

    /// Target platforms (comma-separated): flink, timeplus, ksqldb
    #[arg(long, value_delimiter = ',', default_value = "flink")]
    pub platforms: Vec<String>,

    /// Number of events to generate
    #[arg(long, default_value_t = 10_000_000)]
    pub data_size: u64,

    /// Event generation rate (events per second)
    #[arg(long, default_value_t = 300_000)]
    pub event_rate: u64,

    /// Path to a settings file (json, toml or yaml)
    #[arg(long, env = "NEXMARK_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// CPU cores granted to each engine container
    #[arg(long)]
    pub cpu_cores: Option<f64>,

    /// Memory limit for every engine container, e.g. 4g
    #[arg(long)]
    pub memory_limit: Option<String>,

    /// Directory for the result, stats and metrics reports
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Summary output format
    #[arg(long, short, default_value = "table")]
    pub format: OutputFormat,

    /// Log line format
    #[arg(long, default_value = "json")]
    pub log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let plan = plan_from(&cli)?;

    let mut settings = config::load_settings(cli.config_file.as_deref())?;
    config::apply_overrides(&mut settings, cli.cpu_cores, cli.memory_limit.as_deref())?;
    info!(
        cases = %plan.cases.join(","),
        platforms = %plan.platforms.join(","),
        data_size = plan.workload.data_size,
        event_rate = plan.workload.event_rate,
        "Harness configured"
    );

    let started_at = Utc::now();
    let metrics = HarnessMetrics::new().context("Failed to create metrics registry")?;
    let logger = StructuredLogger::new(started_at.format("%Y%m%d_%H%M%S").to_string());

    let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
    let broker = KafkaBroker::new(settings.kafka_bootstrap_servers.clone());
    let ctx = BenchContext::new(
        Arc::new(runtime),
        Arc::new(broker),
        settings,
        metrics.clone(),
        logger.clone(),
    );
    let driver = BenchmarkDriver::new(ctx);

    let outcome = tokio::select! {
        result = driver.run(&plan) => Some(result),
        signal = shutdown_signal() => {
            logger.log_run_interrupted(signal);
            None
        }
    };

    let Some(result) = outcome else {
        driver.cleanup().await;
        output::print_warning("Run interrupted, resources cleaned up");
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    };
    let results = result.context("Benchmark run failed")?;

    let paths = ReportWriter::new(&cli.output_dir, started_at)
        .write(&results, &metrics)
        .context("Failed to write reports")?;

    output::print_results(&results, cli.format);
    if let OutputFormat::Table = cli.format {
        output::print_reports(&paths);
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        warn!(failed, total = results.len(), "Some trials failed");
        output::print_warning(&format!("{} of {} trials failed", failed, results.len()));
        return Ok(ExitCode::FAILURE);
    }

    output::print_success(&format!("All {} trials passed", results.len()));
    Ok(ExitCode::SUCCESS)
}

/// Check the requested cases and platforms before touching Docker
fn plan_from(cli: &Cli) -> Result<BenchmarkPlan> {
    let cases: Vec<String> = cli
        .cases
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if cases.is_empty() {
        anyhow::bail!("No cases given");
    }

    let platforms: Vec<String> = cli
        .platforms
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    if let Some(unknown) = platforms.iter().find(|p| engine::from_name(p).is_none()) {
        anyhow::bail!(
            "Unknown platform '{}', expected one of: {}",
            unknown,
            PLATFORMS.join(", ")
        );
    }
    if platforms.is_empty() {
        anyhow::bail!("No platforms given");
    }

    Ok(BenchmarkPlan {
        cases,
        platforms,
        workload: Workload {
            data_size: cli.data_size,
            event_rate: cli.event_rate,
        },
    })
}

/// Resolve on SIGINT or SIGTERM with the signal's name
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
