//! Integration test: panic on a worker thread → report file → next
//! registration → sender
//!
//! Installs the real panic hook, so the whole flow lives in one test
//! function: the hook is process-wide.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};

use stackdrop_core::codec;
use stackdrop_core::config::ConfigBuilder;
use stackdrop_core::domain::{CrashRecord, DeviceFacts};
use stackdrop_core::ports::IReportSender;
use stackdrop_reporter::{interceptor, panic_with_error, Registration, ReportStore, SendOutcome};
use tempfile::TempDir;

#[derive(Debug)]
struct StartupError {
    source: ConnectError,
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("service failed to start")
    }
}

impl Error for StartupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Debug)]
struct ConnectError {
    source: std::io::Error,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cannot reach database, port 5432")
    }
}

impl Error for ConnectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Default)]
struct RecordingSender {
    batches: Mutex<Vec<(Vec<CrashRecord>, String)>>,
}

impl IReportSender for RecordingSender {
    fn submit(&self, reports: &[CrashRecord], package_name: &str) -> anyhow::Result<()> {
        self.batches
            .lock()
            .unwrap()
            .push((reports.to_vec(), package_name.to_string()));
        Ok(())
    }
}

fn facts() -> DeviceFacts {
    DeviceFacts::new("com.example.orders", "5.0.0", "ThinkPad T14", "linux 6.8.0")
}

#[test]
fn test_panic_is_recorded_and_delivered_on_next_start() {
    let tmp = TempDir::new().unwrap();
    let config = ConfigBuilder::new()
        .reports_dir(tmp.path().to_path_buf())
        .reports_max_pending(5)
        .build();
    let store = ReportStore::new(tmp.path().to_path_buf());

    // First start: nothing pending, interceptor goes in.
    let first_sender = Arc::new(RecordingSender::default());
    let extractor = || {
        let mut map = BTreeMap::new();
        map.insert("build".to_string(), "2024.1".to_string());
        map
    };
    let first = Registration::new(facts(), first_sender.clone())
        .with_config(config.clone())
        .with_metadata_extractor(Arc::new(extractor))
        .register();
    assert!(!first.reports_pending());
    assert!(first.interceptor_installed());
    assert!(interceptor::is_installed());
    assert!(first.wait().is_none());

    // A worker dies with a three-level error chain.
    let worker = std::thread::Builder::new()
        .name("order-sync".to_string())
        .spawn(|| {
            panic_with_error(StartupError {
                source: ConnectError {
                    source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                },
            })
        })
        .unwrap();
    assert!(worker.join().is_err());

    let pending = store.list_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].file_name, "5.0.0-0");

    let stored = codec::decode(&store.read(&pending[0]).unwrap(), "5.0.0").unwrap();
    let types: Vec<&str> = stored.chain().map(CrashRecord::exception_type).collect();
    assert_eq!(
        types,
        vec![
            std::any::type_name::<StartupError>(),
            "dyn core::error::Error",
            "std::io::error::Error",
        ]
    );
    assert_eq!(stored.thread_name(), "order-sync");
    assert_eq!(stored.message(), Some("service failed to start"));
    assert_eq!(stored.cause().unwrap().message(), Some("cannot reach database, port 5432"));
    assert_eq!(stored.root_cause().message(), Some("refused"));
    assert!(!stored.frames().is_empty());
    assert_eq!(stored.metadata().get("build").map(String::as_str), Some("2024.1"));
    assert!(stored.chain().all(|r| r.phone_model() == "ThinkPad T14"));

    // Second start: the report is handed over once, then removed.
    let second_sender = Arc::new(RecordingSender::default());
    let second = Registration::new(facts(), second_sender.clone())
        .with_config(config)
        .register();
    assert!(second.reports_pending());
    assert!(!second.interceptor_installed());

    let summary = second.wait().expect("dispatch should have run");
    assert_eq!(summary.found, 1);
    assert_eq!(summary.decoded, 1);
    assert_eq!(summary.send, SendOutcome::Delivered);
    assert_eq!(summary.deleted, 1);
    assert_eq!(store.count_pending().unwrap(), 0);

    let batches = second_sender.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].1, "com.example.orders");
    assert_eq!(batches[0].0, vec![stored]);
    assert!(first_sender.batches.lock().unwrap().is_empty());
}
