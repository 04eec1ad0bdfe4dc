//! Markdown rendering of crawl summaries and change reports

use crate::crawler::CrawlSummary;
use crate::output::report::DailyReport;
use crate::ShelfError;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes rendered markdown to a file
///
/// # Arguments
///
/// * `markdown` - The rendered document
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote the file
/// * `Err(ShelfError)` - Failed to write the file
pub fn write_markdown(markdown: &str, output_path: &Path) -> Result<(), ShelfError> {
    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;
    Ok(())
}

/// Formats a crawl summary as markdown
pub fn format_crawl_summary(summary: &CrawlSummary) -> String {
    let mut md = String::new();

    md.push_str("# Shelfwatch Crawl Summary\n\n");

    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Started**: {}\n", summary.started_at));
    md.push_str(&format!("- **Finished**: {}\n", summary.finished_at));
    md.push_str(&format!(
        "- **Duration**: {:.1} seconds\n",
        summary.duration().as_secs_f64()
    ));
    if summary.timed_out {
        md.push_str("- **Stopped early**: maximum crawl duration reached\n");
    }
    md.push('\n');

    md.push_str("## Catalog\n\n");
    md.push_str(&format!("- **Pages Crawled**: {}\n", summary.catalog_pages));
    md.push_str(&format!(
        "- **Pages Failed**: {}\n",
        summary.catalog_pages_failed
    ));
    md.push_str(&format!(
        "- **Items Discovered**: {}\n\n",
        summary.items_discovered
    ));

    md.push_str("## Item Outcomes\n\n");
    md.push_str("| Outcome | Count |\n");
    md.push_str("|---------|-------|\n");
    md.push_str(&format!("| Inserted | {} |\n", summary.inserted));
    md.push_str(&format!("| Updated | {} |\n", summary.updated));
    md.push_str(&format!("| Unchanged | {} |\n", summary.unchanged));
    md.push_str(&format!("| Duplicate | {} |\n", summary.duplicates));
    md.push_str(&format!("| Failed | {} |\n", summary.failed));
    md.push_str(&format!("| Persistence Error | {} |\n\n", summary.errors));

    md.push_str("## Changes\n\n");
    md.push_str(&format!(
        "- **Detected**: {}\n",
        summary.changes_detected
    ));
    md.push_str(&format!("- **Logged**: {}\n", summary.changes_logged));

    md
}

/// Formats a daily change report as markdown
pub fn format_daily_report(report: &DailyReport) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Change Report for {}\n\n", report.date));

    if report.changes.is_empty() {
        md.push_str("No changes detected on this date.\n");
        return md;
    }

    md.push_str("## Totals\n\n");
    md.push_str(&format!("- **Total Changes**: {}\n", report.total_changes));
    md.push_str(&format!("- **New Items**: {}\n", report.new_items));
    md.push_str(&format!("- **Updates**: {}\n\n", report.updates));

    if !report.by_field.is_empty() {
        md.push_str("## Updates by Field\n\n");
        md.push_str("| Field | Changes |\n");
        md.push_str("|-------|---------|\n");

        let mut fields: Vec<_> = report.by_field.iter().collect();
        fields.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

        for (field, count) in fields {
            md.push_str(&format!("| {} | {} |\n", field, count));
        }
        md.push('\n');
    }

    md.push_str("## Changes\n\n");
    md.push_str("| Time | Item | Change |\n");
    md.push_str("|------|------|--------|\n");
    for entry in &report.changes {
        md.push_str(&format!(
            "| {} | {} | {} |\n",
            entry.change.changed_at.format("%H:%M:%S"),
            escape_cell(&entry.change.item_name),
            escape_cell(&entry.change.description)
        ));
    }

    md
}

/// Keeps pipes in names from breaking the table
fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}
