//! List command - Show the reports waiting for the next dispatch

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Local};
use clap::Args;

use stackdrop_reporter::PendingReport;

use crate::output::{format_size, OutputFormat};
use crate::Context;

#[derive(Debug, Args)]
pub struct ListCommand {}

impl ListCommand {
    pub async fn execute(&self, ctx: &Context, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();
        let reports = ctx.store.list_pending();

        if format.is_json() {
            let json: Vec<serde_json::Value> = reports.iter().map(report_json).collect();
            formatter.print_json(&serde_json::json!({
                "dir": ctx.store.dir().display().to_string(),
                "reports": json,
            }));
            return Ok(());
        }

        if reports.is_empty() {
            formatter.info(&format!("No pending reports in {}", ctx.store.dir().display()));
            return Ok(());
        }

        println!("{:<32} {:<20} {:>10}", "File", "Modified", "Size");
        println!("{}", "-".repeat(64));
        for report in &reports {
            println!(
                "{:<32} {:<20} {:>10}",
                report.file_name,
                modified(&report.path)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
                format_size(report.size_bytes),
            );
        }
        println!();
        println!("Total: {} report(s) in {}", reports.len(), ctx.store.dir().display());
        Ok(())
    }
}

fn report_json(report: &PendingReport) -> serde_json::Value {
    serde_json::json!({
        "file": report.file_name,
        "package_version": report.package_version().ok(),
        "index": report.index(),
        "size_bytes": report.size_bytes,
        "modified": modified(&report.path).map(|t| t.to_rfc3339()),
    })
}

fn modified(path: &Path) -> Option<DateTime<Local>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Local>::from)
}
