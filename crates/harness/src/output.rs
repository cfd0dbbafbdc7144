//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use harness_lib::{ReportPaths, TestResult};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for the run summary
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line (default)
    #[default]
    Json,
    /// Human-readable lines
    Text,
}

#[derive(Tabled, Serialize)]
struct SummaryRow {
    #[tabled(rename = "Case")]
    case: String,
    #[tabled(rename = "Platform")]
    platform: String,
    #[tabled(rename = "Time")]
    execution_time: String,
    #[tabled(rename = "Output")]
    output_size: u64,
    #[tabled(rename = "Status")]
    status: String,
}

impl SummaryRow {
    fn from_result(result: &TestResult) -> Self {
        let status = if result.is_success() {
            "PASSED".green().to_string()
        } else {
            "FAILED".red().to_string()
        };
        Self {
            case: result.case.clone(),
            platform: result.platform.clone(),
            execution_time: format_seconds(result.execution_time),
            output_size: result.output_size,
            status,
        }
    }
}

/// Print the results of a run
pub fn print_results(results: &[TestResult], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if results.is_empty() {
                println!("{}", "No trials were run".yellow());
                return;
            }
            let rows: Vec<SummaryRow> = results.iter().map(SummaryRow::from_result).collect();
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);

            for result in results {
                if let Some(error) = &result.error {
                    print_error(&format!("{} on {}: {}", result.case, result.platform, error));
                }
            }
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(results) {
                println!("{}", json);
            }
        }
    }
}

/// Print where the reports went
pub fn print_reports(paths: &ReportPaths) {
    print_info(&format!("Results written to {}", paths.results.display()));
    print_info(&format!("Stats written to {}", paths.stats.display()));
    print_info(&format!("Metrics written to {}", paths.metrics.display()));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format seconds with two decimals, e.g. `2.05s`
pub fn format_seconds(secs: f64) -> String {
    format!("{:.2}s", secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(2.0), "2.00s");
        assert_eq!(format_seconds(1.234), "1.23s");
    }

    #[test]
    fn test_summary_row() {
        colored::control::set_override(false);
        let ok = TestResult::success("q3", "flink", Duration::from_millis(2500), 42, Vec::new());
        let failed = TestResult::failure("q5", "ksqldb", "Unsupported case: q5", None);

        let row = SummaryRow::from_result(&ok);
        assert_eq!(row.execution_time, "2.50s");
        assert_eq!(row.status, "PASSED");
        assert_eq!(SummaryRow::from_result(&failed).status, "FAILED");
    }
}
