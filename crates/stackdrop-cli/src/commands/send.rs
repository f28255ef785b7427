//! Send command - Run one dispatch cycle against the HTTP collector
//!
//! Same semantics as startup dispatch: every pending report is offered
//! once and its file is deleted afterwards, whatever the collector said.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use clap::Args;
use tracing::info;

use stackdrop_http::HttpPostSender;
use stackdrop_reporter::{DispatchSummary, Dispatcher, SendOutcome};

use crate::output::OutputFormat;
use crate::Context;

#[derive(Debug, Args)]
pub struct SendCommand {
    /// Collector URL (defaults to `http.endpoint` from the config file)
    #[arg(long)]
    url: Option<String>,
}

impl SendCommand {
    pub async fn execute(&self, ctx: &Context, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();
        let endpoint = self
            .url
            .clone()
            .or_else(|| ctx.config.http.endpoint.clone())
            .ok_or_else(|| anyhow!("No collector URL: pass --url or set http.endpoint"))?;

        let pending = ctx.store.list_pending();
        if pending.is_empty() {
            formatter.info("No pending reports to send.");
            if format.is_json() {
                formatter.print_json(&summary_json(&endpoint, None));
            }
            return Ok(());
        }

        let sender = HttpPostSender::new(
            endpoint.clone(),
            Duration::from_secs(ctx.config.http.timeout_secs),
        )?;
        let dispatcher = Dispatcher::new(
            ctx.store.clone(),
            Arc::new(sender),
            ctx.package_name.clone(),
            ctx.config.reports.decode_failure,
        );

        info!(endpoint = %endpoint, reports = pending.len(), "Sending pending reports");
        // The sender drives its own runtime, so it runs on the dispatch thread.
        let handle = dispatcher
            .spawn(pending)
            .context("Failed to start dispatch thread")?;
        let summary = tokio::task::spawn_blocking(move || handle.join())
            .await
            .context("Dispatch task failed")?
            .map_err(|_| anyhow!("Dispatch thread panicked"))?;

        if format.is_json() {
            formatter.print_json(&summary_json(&endpoint, Some(&summary)));
            return Ok(());
        }

        match &summary.send {
            SendOutcome::Delivered => {
                formatter.success(&format!("Sent {} report(s) to {}", summary.decoded, endpoint))
            }
            SendOutcome::NotAttempted => formatter.warn("No report could be decoded, nothing sent"),
            SendOutcome::Failed(reason) => formatter.error(&format!("Delivery failed: {}", reason)),
        }
        if summary.failed > 0 {
            formatter.warn(&format!("{} report(s) could not be decoded", summary.failed));
        }
        formatter.info(&format!("Removed {} file(s) from the store", summary.deleted));
        Ok(())
    }
}

fn summary_json(endpoint: &str, summary: Option<&DispatchSummary>) -> serde_json::Value {
    match summary {
        None => serde_json::json!({
            "endpoint": endpoint,
            "found": 0,
            "sent": false,
        }),
        Some(summary) => {
            let (sent, error) = match &summary.send {
                SendOutcome::Delivered => (true, None),
                SendOutcome::NotAttempted => (false, None),
                SendOutcome::Failed(reason) => (false, Some(reason.clone())),
            };
            serde_json::json!({
                "endpoint": endpoint,
                "found": summary.found,
                "decoded": summary.decoded,
                "failed": summary.failed,
                "sent": sent,
                "error": error,
                "deleted": summary.deleted,
                "delete_failures": summary.delete_failures,
            })
        }
    }
}
