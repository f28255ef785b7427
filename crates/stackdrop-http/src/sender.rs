//! HTTP POST report sender
//!
//! Posts one `application/x-www-form-urlencoded` request per report:
//!
//! | field             | value                                       |
//! |-------------------|---------------------------------------------|
//! | `package_name`    | package name given to `submit`              |
//! | `package_version` | version the report was recorded under       |
//! | `phone_model`     | device model                                |
//! | `os_version`      | OS release                                  |
//! | `thread`          | name of the faulting thread                 |
//! | `exception_type`  | type name of the outermost fault            |
//! | `stacktrace`      | rendered trace with every `Caused by:` level |
//! | `metadata[<key>]` | one field per metadata entry                |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//! use stackdrop_http::HttpPostSender;
//!
//! # fn example() -> anyhow::Result<()> {
//! let sender = HttpPostSender::new("https://crashes.example.com/submit", Duration::from_secs(30))?;
//! let sender: Arc<dyn stackdrop_core::ports::IReportSender> = Arc::new(sender);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use stackdrop_core::domain::CrashRecord;
use stackdrop_core::ports::IReportSender;

use crate::HttpSendError;

// ============================================================================
// HttpPostSender
// ============================================================================

/// Sends reports to a collector, one POST per report
#[derive(Debug, Clone)]
pub struct HttpPostSender {
    client: Client,
    endpoint: String,
}

impl HttpPostSender {
    /// Creates a sender posting to `endpoint` with a per-request `timeout`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, HttpSendError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts a single report.
    pub async fn post_report(
        &self,
        index: usize,
        report: &CrashRecord,
        package_name: &str,
    ) -> Result<(), HttpSendError> {
        let form = report_form(report, package_name);
        let response = self.client.post(&self.endpoint).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpSendError::Status {
                index,
                status: status.as_u16(),
            });
        }
        debug!(index, status = status.as_u16(), "Report posted");
        Ok(())
    }

    /// Posts every report, continuing past failures.
    ///
    /// Returns the number of reports that were not accepted.
    pub async fn post_batch(&self, reports: &[CrashRecord], package_name: &str) -> usize {
        let mut failed = 0;
        for (index, report) in reports.iter().enumerate() {
            if let Err(e) = self.post_report(index, report, package_name).await {
                warn!(
                    endpoint = %self.endpoint,
                    index,
                    error = %e,
                    "Error sending report"
                );
                failed += 1;
            }
        }
        failed
    }
}

impl IReportSender for HttpPostSender {
    /// Drives [`HttpPostSender::post_batch`] on a private current-thread
    /// runtime. Must not be called from inside a tokio runtime.
    fn submit(&self, reports: &[CrashRecord], package_name: &str) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(HttpSendError::Runtime)?;

        let total = reports.len();
        let failed = runtime.block_on(self.post_batch(reports, package_name));
        if failed > 0 {
            return Err(HttpSendError::Partial { failed, total }.into());
        }
        info!(endpoint = %self.endpoint, reports = total, "Reports sent");
        Ok(())
    }
}

/// Builds the form fields posted for `report`.
pub fn report_form(report: &CrashRecord, package_name: &str) -> Vec<(String, String)> {
    let mut form = vec![
        ("package_name".to_string(), package_name.to_string()),
        (
            "package_version".to_string(),
            report.package_version().to_string(),
        ),
        ("phone_model".to_string(), report.phone_model().to_string()),
        ("os_version".to_string(), report.os_version().to_string()),
        ("thread".to_string(), report.thread_name().to_string()),
        (
            "exception_type".to_string(),
            report.exception_type().to_string(),
        ),
        ("stacktrace".to_string(), report.render_stacktrace()),
    ];
    form.extend(
        report
            .metadata()
            .iter()
            .map(|(key, value)| (format!("metadata[{key}]"), value.clone())),
    );
    form
}
