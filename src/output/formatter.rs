//! Output formatters for run results
//!
//! Table and summary output are meant for terminals, JSON and CSV for tools.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::executor::InstanceConfig;
use crate::models::{DetectionResult, RunSummary, TestStatus};

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::JsonPretty => "json-pretty",
            OutputFormat::Csv => "csv",
            OutputFormat::Summary => "summary",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One row of the instance listing
#[derive(Serialize)]
struct InstanceRow<'a> {
    index: usize,
    name: &'a str,
    api_port: u16,
    hec_port: u16,
    web_ui_port: u16,
    address: &'a str,
    image: &'a str,
}

impl<'a> From<&'a InstanceConfig> for InstanceRow<'a> {
    fn from(config: &'a InstanceConfig) -> Self {
        Self {
            index: config.index,
            name: config.name(),
            api_port: config.api_port(),
            hec_port: config.hec_port(),
            web_ui_port: config.web_ui_port(),
            address: &config.run.test_instance_address,
            image: &config.run.full_image_path,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn status_label(&self, status: TestStatus) -> &'static str {
        match (status, self.colorize) {
            (TestStatus::Pass, true) => "\x1b[32m✓ PASS\x1b[0m",
            (TestStatus::Fail, true) => "\x1b[31m✗ FAIL\x1b[0m",
            (TestStatus::Skip, true) => "\x1b[33m○ SKIP\x1b[0m",
            (TestStatus::Error, true) => "\x1b[31m! ERROR\x1b[0m",
            (TestStatus::Pass, false) => "✓ PASS",
            (TestStatus::Fail, false) => "✗ FAIL",
            (TestStatus::Skip, false) => "○ SKIP",
            (TestStatus::Error, false) => "! ERROR",
        }
    }

    fn format_result_row(&self, result: &DetectionResult) -> String {
        let mut row = format!(
            "  {:40} {:20} {} [{:>6}ms]",
            result.detection,
            result.instance,
            self.status_label(result.status),
            result.duration_ms
        );
        if let Some(message) = result.message.as_deref().filter(|_| result.status != TestStatus::Pass) {
            row.push_str(&format!("\n      {message}"));
        }
        row
    }

    /// Format the summary of a finished run
    pub fn format_summary(&self, summary: &RunSummary) -> Result<String> {
        Ok(match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json => serde_json::to_string(summary)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary)?,
            OutputFormat::Csv => Self::to_csv(&summary.results)?,
            OutputFormat::Summary => Self::format_summary_brief(summary),
        })
    }

    fn format_summary_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  Detection test run: {:40}║\n",
            summary.completion.to_string()
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        let mut results: Vec<_> = summary.results.iter().collect();
        results.sort_by(|a, b| a.detection.cmp(&b.detection));
        for result in results {
            output.push_str(&self.format_result_row(result));
            output.push('\n');
        }

        if !summary.failures.is_empty() {
            output.push_str("\n Failures:\n");
            for failure in &summary.failures {
                output.push_str(&format!("   - {failure}\n"));
            }
        }

        let fail_str = if self.colorize && summary.failed + summary.errors > 0 {
            format!("\x1b[31m{}\x1b[0m", summary.failed)
        } else {
            summary.failed.to_string()
        };

        output.push_str("\n ───────────────────────────────────────────────────────────\n");
        output.push_str(&format!(
            " Total: {} | Pass: {} | Fail: {} | Skip: {} | Error: {} | Untested: {}\n",
            summary.total, summary.passed, fail_str, summary.skipped, summary.errors, summary.untested
        ));
        output.push_str(&format!(
            " Pass Rate: {:5.1}% | Duration: {}ms\n",
            summary.pass_rate(),
            summary.duration_ms()
        ));

        output
    }

    fn format_summary_brief(summary: &RunSummary) -> String {
        format!(
            "Run {}: {}/{} passed ({:.1}%), {} failed, {} untested in {}ms",
            summary.completion,
            summary.passed,
            summary.total,
            summary.pass_rate(),
            summary.failed + summary.errors,
            summary.untested,
            summary.duration_ms()
        )
    }

    fn to_csv<T: Serialize>(rows: impl IntoIterator<Item = T>) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in rows {
            writer.serialize(row).context("Failed to write CSV row")?;
        }
        let bytes = writer.into_inner().context("Failed to flush CSV output")?;
        String::from_utf8(bytes).context("CSV output is not UTF-8")
    }

    /// Format the derived per-instance configuration
    pub fn format_instances(&self, configs: &[InstanceConfig]) -> Result<String> {
        let rows: Vec<InstanceRow> = configs.iter().map(InstanceRow::from).collect();

        Ok(match self.format {
            OutputFormat::Json => serde_json::to_string(&rows)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(&rows)?,
            OutputFormat::Csv => Self::to_csv(&rows)?,
            OutputFormat::Summary => rows
                .iter()
                .map(|r| format!("{} api={} hec={} web={}", r.name, r.api_port, r.hec_port, r.web_ui_port))
                .collect::<Vec<_>>()
                .join("\n"),
            OutputFormat::Table => {
                let mut output = String::new();
                output.push_str("┌─────┬──────────────────────────────┬──────────┬──────────┬──────────┐\n");
                output.push_str("│ #   │ Name                         │ API      │ HEC      │ Web UI   │\n");
                output.push_str("├─────┼──────────────────────────────┼──────────┼──────────┼──────────┤\n");
                for r in &rows {
                    output.push_str(&format!(
                        "│ {:<3} │ {:28} │ {:<8} │ {:<8} │ {:<8} │\n",
                        r.index, r.name, r.api_port, r.hec_port, r.web_ui_port
                    ));
                }
                output.push_str("└─────┴──────────────────────────────┴──────────┴──────────┴──────────┘\n");
                output
            }
        })
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write a run summary to a file without colors
pub fn write_results_to_file(
    path: impl AsRef<Path>,
    summary: &RunSummary,
    format: OutputFormat,
) -> Result<()> {
    let path = path.as_ref();
    let content = ResultFormatter::new(format).no_color().format_summary(summary)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write results: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::executor::derive_all;
    use crate::models::{Completion, Detection};
    use chrono::Utc;
    use tempfile::tempdir;

    fn summary() -> RunSummary {
        let a = Detection::new("Suspicious Process", "detections/a.yml");
        let b = Detection::new("Odd Login", "detections/b.yml");
        RunSummary::new(
            Utc::now(),
            Completion::Finished,
            1,
            vec![],
            vec![
                DetectionResult::pass(&a, "c-0", 120),
                DetectionResult::fail(&b, "c-1", 80, "no events matched"),
            ],
        )
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("json-pretty"), Some(OutputFormat::JsonPretty));
        assert_eq!(OutputFormat::from_str("unknown"), None);
    }

    #[test]
    fn test_table_lists_results_and_totals() {
        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_summary(&summary())
            .unwrap();
        assert!(output.contains("Suspicious Process"));
        assert!(output.contains("✗ FAIL"));
        assert!(output.contains("no events matched"));
        assert!(output.contains("Untested: 1"));
        assert!(!output.contains("\x1b["));
    }

    #[test]
    fn test_csv_has_header_and_rows() {
        let output = ResultFormatter::new(OutputFormat::Csv)
            .format_summary(&summary())
            .unwrap();
        let mut lines = output.lines();
        assert!(lines.next().unwrap().starts_with("detection,path,instance,status"));
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn test_brief_summary() {
        let output = ResultFormatter::new(OutputFormat::Summary)
            .format_summary(&summary())
            .unwrap();
        assert!(output.starts_with("Run finished: 1/2 passed"));
    }

    #[test]
    fn test_instance_listing() {
        let configs = derive_all(
            &RunConfig::default()
                .with_containers(2)
                .with_ports(10, 20, 30)
                .with_name_template("c-%d"),
        )
        .unwrap();

        let table = ResultFormatter::default().format_instances(&configs).unwrap();
        assert!(table.contains("c-1"));
        assert!(table.contains("32"));

        let json = ResultFormatter::new(OutputFormat::Json)
            .format_instances(&configs)
            .unwrap();
        let rows: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(rows[1]["api_port"], 12);
        assert_eq!(rows[1]["web_ui_port"], 32);
    }

    #[test]
    fn test_write_results_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.json");
        write_results_to_file(&path, &summary(), OutputFormat::Json).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["total"], 2);
    }
}
