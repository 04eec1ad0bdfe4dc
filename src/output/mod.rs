//! Output module for crawl summaries and change reports
//!
//! This module handles:
//! - Rendering crawl summaries as markdown
//! - Building daily change reports in JSON, CSV or markdown
//! - Catalog and change-log statistics

mod markdown;
mod report;
pub mod stats;

pub use markdown::{format_crawl_summary, format_daily_report, write_markdown};
pub use report::{build_daily_report, DailyReport};
pub use stats::{load_statistics, print_statistics, CatalogStatistics};

use crate::model::ChangeLogEntry;
use crate::ShelfError;
use std::str::FromStr;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Csv,
    Markdown,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(format!("unknown report format '{}'", other)),
        }
    }
}

/// Renders a daily report in the requested format
pub fn render_report(report: &DailyReport, format: ReportFormat) -> Result<String, ShelfError> {
    match format {
        ReportFormat::Json => report.to_json(),
        ReportFormat::Csv => report.to_csv(),
        ReportFormat::Markdown => Ok(format_daily_report(report)),
    }
}

/// One-line rendering of an audit entry
pub fn format_change_line(entry: &ChangeLogEntry) -> String {
    format!(
        "{} [{}] #{} {}: {}",
        entry.change.changed_at.format("%Y-%m-%d %H:%M:%S"),
        entry.change.change_type,
        entry.item_id,
        entry.change.item_name,
        entry.change.description
    )
}
