//! Report sender port (driven/secondary port)
//!
//! A sender receives the reports recovered from a previous run, once, at
//! the next registration. A typical implementation posts them to a
//! collection server.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because delivery errors are adapter-specific.
//! - The dispatcher treats the return value as final. It never retries, and
//!   the stored reports are deleted whatever the outcome.
//! - `submit` is called from the dispatch worker thread. Adapters that need
//!   a particular execution context (an async runtime, a UI thread) bridge
//!   to it themselves.

use crate::domain::CrashRecord;

/// Receives the crash reports recovered at startup
pub trait IReportSender: Send + Sync {
    /// Delivers `reports` (root records, causes nested inside) for `package_name`
    fn submit(&self, reports: &[CrashRecord], package_name: &str) -> anyhow::Result<()>;
}
