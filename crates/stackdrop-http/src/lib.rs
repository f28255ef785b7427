//! Stackdrop HTTP - report delivery over HTTP POST
//!
//! Provides [`HttpPostSender`], an `IReportSender` that posts each recovered
//! report as a URL-encoded form to a collector endpoint.
//!
//! ## Modules
//!
//! - [`sender`] - the sender itself and its form layout

pub mod sender;

use thiserror::Error;

pub use sender::{report_form, HttpPostSender};

/// Errors raised while posting reports
#[derive(Debug, Error)]
pub enum HttpSendError {
    /// The HTTP client could not be built or the request could not be sent
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The collector answered with a non-success status
    #[error("Collector returned status {status} for report {index}")]
    Status {
        /// Position of the report in the batch
        index: usize,
        status: u16,
    },

    /// The runtime used to drive requests could not be started
    #[error("Cannot start HTTP runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// Some reports of a batch were not accepted
    #[error("{failed} of {total} reports were not delivered")]
    Partial { failed: usize, total: usize },
}
