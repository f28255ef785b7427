//! Clear command - Delete every pending report

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::output::OutputFormat;
use crate::Context;

#[derive(Debug, Args)]
pub struct ClearCommand {}

impl ClearCommand {
    pub async fn execute(&self, ctx: &Context, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();
        let summary = ctx.store.delete_all();
        info!(deleted = summary.deleted, failed = summary.failed, "Store cleared");

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "deleted": summary.deleted,
                "failed": summary.failed,
            }));
        } else {
            formatter.success(&format!("Deleted {} report(s)", summary.deleted));
            if summary.failed > 0 {
                formatter.warn(&format!("{} file(s) could not be deleted", summary.failed));
            }
        }
        Ok(())
    }
}
