//! Shared helpers for the collector mock and sample reports

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stackdrop_core::domain::{CrashRecord, StackFrame};
use stackdrop_http::HttpPostSender;

pub const PACKAGE: &str = "com.example.orders";

/// Starts a collector answering `status` on `POST /submit`, expecting
/// `expected_requests` calls.
pub async fn setup_collector(status: u16, expected_requests: u64) -> (MockServer, HttpPostSender) {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(status))
        .expect(expected_requests)
        .mount(&server)
        .await;

    let sender = HttpPostSender::new(format!("{}/submit", server.uri()), Duration::from_secs(5))
        .expect("Failed to build sender");
    (server, sender)
}

/// A two-level report as recovered from the store
pub fn sample_report(exception_type: &str) -> CrashRecord {
    let cause = CrashRecord::builder("std::io::error::Error")
        .thread_name("checkout")
        .message("connection reset")
        .build();
    CrashRecord::builder(exception_type)
        .package_version("4.2.0")
        .phone_model("Framework 13")
        .os_version("linux 6.6.1")
        .thread_name("checkout")
        .message("payment failed")
        .frame(StackFrame::new("orders::pay", "charge", "src/pay.rs", 31))
        .cause(cause)
        .build()
}
