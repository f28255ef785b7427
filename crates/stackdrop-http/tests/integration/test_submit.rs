//! Integration tests for the IReportSender implementation
//!
//! `submit` runs its own runtime, so it is called from a plain thread the
//! way the dispatcher calls it.

use std::sync::Arc;

use stackdrop_core::domain::CrashRecord;
use stackdrop_core::ports::IReportSender;

use crate::common::{self, PACKAGE};

async fn submit_from_thread(
    sender: Arc<dyn IReportSender>,
    reports: Vec<CrashRecord>,
) -> anyhow::Result<()> {
    let worker = std::thread::spawn(move || sender.submit(&reports, PACKAGE));
    tokio::task::spawn_blocking(move || worker.join().expect("submit thread panicked"))
        .await
        .expect("join task failed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submit_delivers_batch() {
    let (_server, sender) = common::setup_collector(201, 2).await;
    let reports = vec![
        common::sample_report("orders::A"),
        common::sample_report("orders::B"),
    ];

    let result = submit_from_thread(Arc::new(sender), reports).await;

    assert!(result.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submit_reports_partial_failure() {
    let (_server, sender) = common::setup_collector(503, 1).await;

    let result = submit_from_thread(Arc::new(sender), vec![common::sample_report("orders::A")]).await;

    let error = result.expect_err("a rejected report should fail the batch");
    assert_eq!(error.to_string(), "1 of 1 reports were not delivered");
}
