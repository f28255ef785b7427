//! View command - Decode one pending report and print it

use anyhow::{anyhow, Context as _, Result};
use clap::Args;

use stackdrop_core::codec;
use stackdrop_core::domain::CrashRecord;
use stackdrop_reporter::PendingReport;

use crate::output::OutputFormat;
use crate::Context;

#[derive(Debug, Args)]
pub struct ViewCommand {
    /// Report file name, as shown by `list`
    file: String,
}

impl ViewCommand {
    pub async fn execute(&self, ctx: &Context, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();
        let pending = ctx.store.list_pending();
        let report = find_report(&pending, &self.file)
            .ok_or_else(|| anyhow!("Report '{}' not found in {}", self.file, ctx.store.dir().display()))?;

        let record = decode(ctx, report)?;

        if format.is_json() {
            let json = serde_json::to_value(&record).context("Failed to serialize report")?;
            formatter.print_json(&serde_json::json!({
                "file": report.file_name,
                "report": json,
            }));
            return Ok(());
        }

        println!("File:            {}", report.file_name);
        println!("Format:          {}", record.format_version());
        println!("Package version: {}", record.package_version());
        println!("Model:           {}", record.phone_model());
        println!("OS:              {}", record.os_version());
        println!("Thread:          {}", record.thread_name());
        for (key, value) in record.metadata() {
            println!("Metadata:        {} = {}", key, value);
        }
        println!();
        print!("{}", record.render_stacktrace());
        Ok(())
    }
}

fn find_report<'a>(pending: &'a [PendingReport], name: &str) -> Option<&'a PendingReport> {
    pending.iter().find(|report| report.file_name == name)
}

fn decode(ctx: &Context, report: &PendingReport) -> Result<CrashRecord> {
    let version = report.package_version()?;
    let text = ctx
        .store
        .read(report)
        .with_context(|| format!("Failed to read {}", report.path.display()))?;
    codec::decode(&text, version).with_context(|| format!("Failed to decode {}", report.file_name))
}
