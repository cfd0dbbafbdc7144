//! Harness configuration

use anyhow::{Context, Result};
use harness_lib::BenchSettings;
use std::path::Path;

/// Environment variable prefix, e.g. `NEXMARK_KAFKA_BOOTSTRAP_SERVERS`
const ENV_PREFIX: &str = "NEXMARK";

/// Settings that hold comma-separated lists when set from the environment
const LIST_KEYS: &[&str] = &["base_topics", "ksqldb_unsupported_cases", "ksqldb_extra_topics"];

/// Load settings from an optional file, then the environment
///
/// The file format follows its extension (json, toml, yaml). Keys missing
/// from both sources keep their defaults.
pub fn load_settings(config_file: Option<&Path>) -> Result<BenchSettings> {
    let mut builder = config::Config::builder();

    if let Some(path) = config_file {
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
        builder = builder.add_source(config::File::from(path));
    }

    let mut environment = config::Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",");
    for key in LIST_KEYS {
        environment = environment.with_list_parse_key(key);
    }

    let config = builder
        .add_source(environment)
        .build()
        .context("Failed to load configuration")?;

    config
        .try_deserialize()
        .context("Invalid benchmark configuration")
}

/// Apply command-line resource knobs on top of loaded settings
pub fn apply_overrides(
    settings: &mut BenchSettings,
    cpu_cores: Option<f64>,
    memory_limit: Option<&str>,
) -> Result<()> {
    if let Some(cores) = cpu_cores {
        if cores.is_nan() || cores <= 0.0 {
            anyhow::bail!("--cpu-cores must be positive, got {}", cores);
        }
        settings.cpu_cores = cores;
    }
    if let Some(limit) = memory_limit {
        settings.set_engine_memory(limit);
    }
    Ok(())
}
