//! Trigger command - Exercise the capture pipeline by hand
//!
//! Registers the reporter the way a host would (delivering anything already
//! pending), then panics on a worker thread with an error chain `depth`
//! levels deep and shows the report that was written.

use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use clap::Args;
use tracing::info;

use stackdrop_core::domain::CrashRecord;
use stackdrop_core::ports::IReportSender;
use stackdrop_http::HttpPostSender;
use stackdrop_reporter::{device, panic_with_error, PendingReport, Registration};

use crate::output::OutputFormat;
use crate::Context;

/// Name of the thread that panics
const TRIGGER_THREAD: &str = "stackdrop-trigger";

#[derive(Debug, Args)]
pub struct TriggerCommand {
    /// Number of levels in the error chain
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=32))]
    depth: u8,
}

impl TriggerCommand {
    pub async fn execute(&self, ctx: &Context, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();
        let sender: Arc<dyn IReportSender> = match &ctx.config.http.endpoint {
            Some(endpoint) => Arc::new(HttpPostSender::new(
                endpoint.clone(),
                Duration::from_secs(ctx.config.http.timeout_secs),
            )?),
            None => Arc::new(LoggingSender),
        };

        let mut config = ctx.config.clone();
        config.reports.dir = Some(ctx.store.dir().to_path_buf());
        config.reports.dispatch_in_background = true;

        let facts = device::detect(&ctx.package_name, env!("CARGO_PKG_VERSION"));
        let registered = Registration::new(facts, sender).with_config(config).register();
        if registered.reports_pending() {
            formatter.info("Delivering reports from earlier runs first");
        }
        let earlier = tokio::task::spawn_blocking(move || registered.wait())
            .await
            .context("Dispatch task failed")?;

        let before: HashSet<String> = ctx
            .store
            .list_pending()
            .into_iter()
            .map(|report| report.file_name)
            .collect();
        let depth = usize::from(self.depth);
        let worker = std::thread::Builder::new()
            .name(TRIGGER_THREAD.to_string())
            .spawn(move || panic_with_error(TriggerError::chain(depth)))
            .context("Failed to start trigger thread")?;
        if worker.join().is_ok() {
            return Err(anyhow!("Trigger thread did not panic"));
        }

        let written = first_new_report(&before, ctx.store.list_pending()).ok_or_else(|| {
            anyhow!(
                "The fault was not recorded in {} (pending limit of {} reached, or the write failed)",
                ctx.store.dir().display(),
                ctx.config.reports.max_pending
            )
        })?;
        info!(file = %written.file_name, "Trigger report written");

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "file": written.file_name,
                "path": written.path.display().to_string(),
                "depth": depth,
                "earlier_reports": earlier.map(|s| s.found).unwrap_or(0),
            }));
        } else {
            formatter.success(&format!("Recorded a {}-level fault as {}", depth, written.file_name));
            formatter.info(&format!("Path: {}", written.path.display()));
        }
        Ok(())
    }
}

/// The first pending report whose name was not in `before`
fn first_new_report(before: &HashSet<String>, after: Vec<PendingReport>) -> Option<PendingReport> {
    after
        .into_iter()
        .find(|report| !before.contains(&report.file_name))
}

/// Logs delivered reports instead of sending them anywhere
struct LoggingSender;

impl IReportSender for LoggingSender {
    fn submit(&self, reports: &[CrashRecord], package_name: &str) -> Result<()> {
        for report in reports {
            info!(
                package = package_name,
                version = report.package_version(),
                exception_type = report.exception_type(),
                depth = report.depth(),
                "Recovered report (no http.endpoint configured)"
            );
        }
        Ok(())
    }
}

/// One level of the synthetic error chain
#[derive(Debug)]
struct TriggerError {
    level: usize,
    source: Option<Box<TriggerError>>,
}

impl TriggerError {
    /// Builds a chain of `depth` errors, outermost level 1
    fn chain(depth: usize) -> Self {
        let innermost = TriggerError {
            level: depth.max(1),
            source: None,
        };
        (1..depth).rev().fold(innermost, |inner, level| TriggerError {
            level,
            source: Some(Box::new(inner)),
        })
    }
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "triggered fault, level {}", self.level)
    }
}

impl Error for TriggerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_has_requested_depth() {
        let error = TriggerError::chain(4);
        let mut levels = vec![error.level];
        let mut source = error.source();
        while let Some(cause) = source {
            levels.push(cause.to_string().rsplit(' ').next().unwrap().parse().unwrap());
            source = cause.source();
        }
        assert_eq!(levels, vec![1, 2, 3, 4]);
    }

    fn pending(name: &str) -> PendingReport {
        PendingReport {
            path: std::path::PathBuf::from("/tmp").join(name),
            file_name: name.to_string(),
            size_bytes: 64,
        }
    }

    #[test]
    fn test_new_report_is_found_by_name_not_index() {
        let before: HashSet<String> = ["0.1.0-0", "0.1.0-1", "0.1.0-5"]
            .into_iter()
            .map(String::from)
            .collect();
        let after = vec![
            pending("0.1.0-0"),
            pending("0.1.0-1"),
            pending("0.1.0-2"),
            pending("0.1.0-5"),
        ];
        let written = first_new_report(&before, after).unwrap();
        assert_eq!(written.file_name, "0.1.0-2");
    }

    #[test]
    fn test_no_new_report_when_nothing_was_written() {
        let before: HashSet<String> = ["0.1.0-0", "0.1.0-3"].into_iter().map(String::from).collect();
        let after = vec![pending("0.1.0-0"), pending("0.1.0-3")];
        assert!(first_new_report(&before, after).is_none());
    }

    #[test]
    fn test_single_level_chain() {
        let error = TriggerError::chain(1);
        assert_eq!(error.level, 1);
        assert!(error.source().is_none());
    }
}
