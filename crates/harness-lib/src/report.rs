//! Run reports written to the output directory

use crate::models::TestResult;
use crate::observability::HarnessMetrics;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Files produced by one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub results: PathBuf,
    pub stats: PathBuf,
    pub metrics: PathBuf,
}

#[derive(Serialize)]
struct ResultRow<'a> {
    case: &'a str,
    platform: &'a str,
    execution_time: f64,
    output_size: u64,
    error: &'a str,
}

/// Writes the results CSV, the stats JSONL and the metrics snapshot
pub struct ReportWriter {
    output_dir: PathBuf,
    timestamp: String,
}

impl ReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>, started_at: DateTime<Utc>) -> Self {
        Self {
            output_dir: output_dir.into(),
            timestamp: started_at.format("%Y%m%d_%H%M%S").to_string(),
        }
    }

    pub fn paths(&self) -> ReportPaths {
        ReportPaths {
            results: self.output_dir.join(format!("report_{}.csv", self.timestamp)),
            stats: self
                .output_dir
                .join(format!("stats_report_{}.json", self.timestamp)),
            metrics: self.output_dir.join(format!("metrics_{}.prom", self.timestamp)),
        }
    }

    pub fn write(&self, results: &[TestResult], metrics: &HarnessMetrics) -> Result<ReportPaths> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!(
                "Failed to create output directory {}",
                self.output_dir.display()
            )
        })?;

        let paths = self.paths();
        write_results(&paths.results, results)?;
        let samples = write_stats(&paths.stats, results)?;

        let exposition = metrics.encode().context("Failed to encode metrics")?;
        fs::write(&paths.metrics, exposition)
            .with_context(|| format!("Failed to write {}", paths.metrics.display()))?;

        info!(
            results = %paths.results.display(),
            stats = %paths.stats.display(),
            samples,
            "Reports written"
        );
        Ok(paths)
    }
}

fn write_results(path: &Path, results: &[TestResult]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    for result in results {
        writer
            .serialize(ResultRow {
                case: &result.case,
                platform: &result.platform,
                execution_time: result.execution_time,
                output_size: result.output_size,
                error: result.error.as_deref().unwrap_or(""),
            })
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    // serialize() only emits the header with the first row
    if results.is_empty() {
        writer.write_record(["case", "platform", "execution_time", "output_size", "error"])?;
    }
    writer.flush()?;
    Ok(())
}

/// One JSON sample record per line, in trial order
fn write_stats(path: &Path, results: &[TestResult]) -> Result<usize> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut samples = 0;

    for record in results.iter().filter_map(|r| r.stats.as_ref()).flatten() {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
        samples += 1;
    }

    writer.flush()?;
    Ok(samples)
}
