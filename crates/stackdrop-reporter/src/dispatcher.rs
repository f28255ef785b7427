//! Startup dispatch of pending reports
//!
//! Decodes every report left by earlier runs, hands the batch to the host's
//! [`IReportSender`] exactly once, then deletes those files. They are
//! deleted whatever the sender did, so a report is offered at most once.
//! Reports written while a dispatch runs are kept for the next one.

use std::any::Any;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::{debug, info, warn};

use stackdrop_core::codec;
use stackdrop_core::config::DecodeFailurePolicy;
use stackdrop_core::domain::{CrashRecord, DecodeError};
use stackdrop_core::ports::IReportSender;

use crate::store::{PendingReport, ReportStore};

/// Name of the background dispatch thread
pub const DISPATCH_THREAD_NAME: &str = "stackdrop-dispatch";

/// Why a pending report could not be turned into a record
#[derive(Debug, Error)]
pub enum ReportReadError {
    #[error("Cannot read report: {0}")]
    Io(#[from] io::Error),

    #[error("Cannot decode report: {0}")]
    Decode(#[from] DecodeError),
}

/// Result of the single sender call of a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The sender was not called (nothing to send)
    NotAttempted,
    /// The sender returned success
    Delivered,
    /// The sender returned an error or panicked
    Failed(String),
}

/// What one dispatch did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Report files found in the store
    pub found: usize,
    /// Reports decoded into the batch
    pub decoded: usize,
    /// Reports that could not be read or decoded
    pub failed: usize,
    pub send: SendOutcome,
    /// Files removed from the store afterwards
    pub deleted: usize,
    pub delete_failures: usize,
}

impl DispatchSummary {
    fn empty(found: usize) -> Self {
        Self {
            found,
            decoded: 0,
            failed: 0,
            send: SendOutcome::NotAttempted,
            deleted: 0,
            delete_failures: 0,
        }
    }
}

/// Drains the report store into a sender
#[derive(Clone)]
pub struct Dispatcher {
    store: ReportStore,
    sender: Arc<dyn IReportSender>,
    package_name: String,
    policy: DecodeFailurePolicy,
}

impl Dispatcher {
    pub fn new(
        store: ReportStore,
        sender: Arc<dyn IReportSender>,
        package_name: impl Into<String>,
        policy: DecodeFailurePolicy,
    ) -> Self {
        Self {
            store,
            sender,
            package_name: package_name.into(),
            policy,
        }
    }

    /// Reads and decodes one pending report.
    ///
    /// The package version comes from the file name, since the report body
    /// does not carry it.
    pub fn decode_report(&self, report: &PendingReport) -> Result<CrashRecord, ReportReadError> {
        let version = report.package_version()?;
        let text = self.store.read(report)?;
        Ok(codec::decode(&text, version)?)
    }

    /// Decodes `pending`, sends the batch once and deletes the `pending` files.
    ///
    /// Nothing happens when `pending` is empty.
    pub fn dispatch(&self, pending: Vec<PendingReport>) -> DispatchSummary {
        let mut summary = DispatchSummary::empty(pending.len());
        if pending.is_empty() {
            debug!("No pending reports to dispatch");
            return summary;
        }

        let batch = self.decode_batch(&pending, &mut summary);
        summary.send = self.submit(&batch);

        // Only the files handed in; reports captured meanwhile wait for the next run.
        let deleted = self.store.delete(&pending);
        summary.deleted = deleted.deleted;
        summary.delete_failures = deleted.failed;

        info!(
            found = summary.found,
            decoded = summary.decoded,
            failed = summary.failed,
            deleted = summary.deleted,
            delete_failures = summary.delete_failures,
            "Pending reports dispatched"
        );
        summary
    }

    /// Runs [`Dispatcher::dispatch`] on a dedicated thread.
    pub fn spawn(self, pending: Vec<PendingReport>) -> io::Result<JoinHandle<DispatchSummary>> {
        std::thread::Builder::new()
            .name(DISPATCH_THREAD_NAME.to_string())
            .spawn(move || self.dispatch(pending))
    }

    fn decode_batch(
        &self,
        pending: &[PendingReport],
        summary: &mut DispatchSummary,
    ) -> Vec<CrashRecord> {
        let mut batch = Vec::with_capacity(pending.len());
        for report in pending {
            match self.decode_report(report) {
                Ok(record) => {
                    summary.decoded += 1;
                    batch.push(record);
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        file = %report.file_name,
                        error = %e,
                        policy = %self.policy,
                        "Cannot decode pending report"
                    );
                    if self.policy == DecodeFailurePolicy::AbortBatch {
                        summary.failed = pending.len();
                        summary.decoded = 0;
                        return Vec::new();
                    }
                }
            }
        }
        batch
    }

    fn submit(&self, batch: &[CrashRecord]) -> SendOutcome {
        if batch.is_empty() {
            return SendOutcome::NotAttempted;
        }

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.sender.submit(batch, &self.package_name)
        }));
        match result {
            Ok(Ok(())) => {
                info!(reports = batch.len(), package = %self.package_name, "Reports delivered");
                SendOutcome::Delivered
            }
            Ok(Err(e)) => {
                let message = format!("{e:#}");
                warn!(reports = batch.len(), error = %message, "Report sender failed");
                SendOutcome::Failed(message)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(reports = batch.len(), panic = %message, "Report sender panicked");
                SendOutcome::Failed(message)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "sender panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use stackdrop_core::domain::{FormatVersion, StackFrame};
    use tempfile::TempDir;

    use super::*;

    #[derive(Default)]
    struct RecordingSender {
        calls: Mutex<Vec<(Vec<CrashRecord>, String)>>,
    }

    impl IReportSender for RecordingSender {
        fn submit(&self, reports: &[CrashRecord], package_name: &str) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((reports.to_vec(), package_name.to_string()));
            Ok(())
        }
    }

    struct FailingSender;

    impl IReportSender for FailingSender {
        fn submit(&self, _reports: &[CrashRecord], _package_name: &str) -> anyhow::Result<()> {
            anyhow::bail!("collector unreachable")
        }
    }

    struct PanickingSender;

    impl IReportSender for PanickingSender {
        fn submit(&self, _reports: &[CrashRecord], _package_name: &str) -> anyhow::Result<()> {
            panic!("sender exploded")
        }
    }

    fn record(exception_type: &str) -> CrashRecord {
        CrashRecord::builder(exception_type)
            .format_version(FormatVersion::CURRENT)
            .package_version("3.1.0")
            .phone_model("Pixel")
            .os_version("14")
            .thread_name("main")
            .message("boom")
            .frame(StackFrame::new("app::ui", "render", "src/ui.rs", 88))
            .build()
    }

    fn store_with(dir: &TempDir, reports: &[CrashRecord]) -> ReportStore {
        let store = ReportStore::new(dir.path().to_path_buf());
        for report in reports {
            let text = codec::encode(report).unwrap();
            store.write(report.package_version(), text.as_bytes()).unwrap();
        }
        store
    }

    fn dispatcher(
        store: &ReportStore,
        sender: Arc<dyn IReportSender>,
        policy: DecodeFailurePolicy,
    ) -> Dispatcher {
        Dispatcher::new(store.clone(), sender, "com.example.app", policy)
    }

    #[test]
    fn test_empty_store_does_not_call_sender() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, &[]);
        let sender = Arc::new(RecordingSender::default());
        let summary = dispatcher(&store, sender.clone(), DecodeFailurePolicy::SkipFile)
            .dispatch(store.list_pending());

        assert_eq!(summary, DispatchSummary::empty(0));
        assert!(sender.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_batch_sent_once_then_store_emptied() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, &[record("app::A"), record("app::B")]);
        let sender = Arc::new(RecordingSender::default());

        let summary = dispatcher(&store, sender.clone(), DecodeFailurePolicy::SkipFile)
            .dispatch(store.list_pending());

        assert_eq!(summary.found, 2);
        assert_eq!(summary.decoded, 2);
        assert_eq!(summary.send, SendOutcome::Delivered);
        assert_eq!(summary.deleted, 2);
        assert_eq!(store.count_pending().unwrap(), 0);

        let calls = sender.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "com.example.app");
        let mut types: Vec<&str> = calls[0].0.iter().map(CrashRecord::exception_type).collect();
        types.sort_unstable();
        assert_eq!(types, vec!["app::A", "app::B"]);
        assert!(calls[0].0.iter().all(|r| r.package_version() == "3.1.0"));
    }

    #[test]
    fn test_failing_sender_still_empties_store() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, &[record("app::A")]);

        let summary = dispatcher(&store, Arc::new(FailingSender), DecodeFailurePolicy::SkipFile)
            .dispatch(store.list_pending());

        assert_eq!(summary.send, SendOutcome::Failed("collector unreachable".to_string()));
        assert_eq!(store.count_pending().unwrap(), 0);
    }

    #[test]
    fn test_panicking_sender_still_empties_store() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, &[record("app::A")]);

        let summary = dispatcher(&store, Arc::new(PanickingSender), DecodeFailurePolicy::SkipFile)
            .dispatch(store.list_pending());

        assert_eq!(summary.send, SendOutcome::Failed("sender exploded".to_string()));
        assert_eq!(store.count_pending().unwrap(), 0);
    }

    #[test]
    fn test_skip_file_policy_sends_the_rest() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, &[record("app::A")]);
        store.write("3.1.0", b"not a report\n").unwrap();
        let sender = Arc::new(RecordingSender::default());

        let summary = dispatcher(&store, sender.clone(), DecodeFailurePolicy::SkipFile)
            .dispatch(store.list_pending());

        assert_eq!(summary.found, 2);
        assert_eq!(summary.decoded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.send, SendOutcome::Delivered);
        assert_eq!(sender.calls.lock().unwrap()[0].0.len(), 1);
        assert_eq!(store.count_pending().unwrap(), 0);
    }

    #[test]
    fn test_abort_batch_policy_sends_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, &[record("app::A"), record("app::B")]);
        store.write("3.1.0", b"VERSION9\n").unwrap();
        let sender = Arc::new(RecordingSender::default());

        let summary = dispatcher(&store, sender.clone(), DecodeFailurePolicy::AbortBatch)
            .dispatch(store.list_pending());

        assert_eq!(summary.found, 3);
        assert_eq!(summary.decoded, 0);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.send, SendOutcome::NotAttempted);
        assert!(sender.calls.lock().unwrap().is_empty());
        assert_eq!(store.count_pending().unwrap(), 0);
    }

    #[test]
    fn test_header_only_report_is_decoded() {
        let tmp = TempDir::new().unwrap();
        let store = ReportStore::new(tmp.path().to_path_buf());
        store
            .write("0.9", b"VERSION1\nNexus\n4.4\njava.lang.Error\nmain\n\n")
            .unwrap();
        let sender = Arc::new(RecordingSender::default());

        let summary = dispatcher(&store, sender.clone(), DecodeFailurePolicy::SkipFile)
            .dispatch(store.list_pending());

        assert_eq!(summary.decoded, 1);
        let calls = sender.calls.lock().unwrap();
        let report = &calls[0].0[0];
        assert_eq!(report.package_version(), "0.9");
        assert_eq!(report.exception_type(), "java.lang.Error");
        assert!(report.frames().is_empty());
        assert!(report.cause().is_none());
    }

    #[test]
    fn test_report_written_during_send_is_kept() {
        struct WritingSender(ReportStore);

        impl IReportSender for WritingSender {
            fn submit(&self, _reports: &[CrashRecord], _package_name: &str) -> anyhow::Result<()> {
                let text = codec::encode(&record("app::DuringSend"))?;
                self.0.write("3.1.0", text.as_bytes())?;
                Ok(())
            }
        }

        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, &[record("app::A")]);
        let sender = Arc::new(WritingSender(store.clone()));

        let summary = dispatcher(&store, sender, DecodeFailurePolicy::SkipFile)
            .dispatch(store.list_pending());

        assert_eq!(summary.found, 1);
        assert_eq!(summary.deleted, 1);
        let remaining = store.list_pending();
        assert_eq!(remaining.len(), 1);
        let kept = dispatcher(&store, Arc::new(FailingSender), DecodeFailurePolicy::SkipFile)
            .decode_report(&remaining[0])
            .unwrap();
        assert_eq!(kept.exception_type(), "app::DuringSend");
    }

    #[test]
    fn test_spawned_dispatch_runs_on_named_thread() {
        struct ThreadNameSender(Mutex<Option<String>>);

        impl IReportSender for ThreadNameSender {
            fn submit(&self, _reports: &[CrashRecord], _package_name: &str) -> anyhow::Result<()> {
                *self.0.lock().unwrap() = std::thread::current().name().map(String::from);
                Ok(())
            }
        }

        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, &[record("app::A")]);
        let sender = Arc::new(ThreadNameSender(Mutex::new(None)));

        let handle = dispatcher(&store, sender.clone(), DecodeFailurePolicy::SkipFile)
            .spawn(store.list_pending())
            .unwrap();
        let summary = handle.join().unwrap();

        assert_eq!(summary.send, SendOutcome::Delivered);
        assert_eq!(sender.0.lock().unwrap().as_deref(), Some(DISPATCH_THREAD_NAME));
    }
}
