//! Integration tests for HttpPostSender::post_batch

use std::time::Duration;

use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stackdrop_http::HttpPostSender;

use crate::common::{self, PACKAGE};

#[tokio::test]
async fn test_each_report_is_posted_once() {
    let (_server, sender) = common::setup_collector(200, 2).await;
    let reports = vec![
        common::sample_report("orders::PaymentError"),
        common::sample_report("orders::StockError"),
    ];

    let failed = sender.post_batch(&reports, PACKAGE).await;

    assert_eq!(failed, 0);
}

#[tokio::test]
async fn test_form_carries_report_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("package_name=com.example.orders"))
        .and(body_string_contains("package_version=4.2.0"))
        .and(body_string_contains("phone_model=Framework+13"))
        .and(body_string_contains("os_version=linux+6.6.1"))
        .and(body_string_contains("thread=checkout"))
        .and(body_string_contains("exception_type=orders%3A%3APaymentError"))
        .and(body_string_contains("Caused+by%3A+std%3A%3Aio%3A%3Aerror%3A%3AError"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sender = HttpPostSender::new(server.uri(), Duration::from_secs(5)).unwrap();
    let failed = sender
        .post_batch(&[common::sample_report("orders::PaymentError")], PACKAGE)
        .await;

    assert_eq!(failed, 0);
}

#[tokio::test]
async fn test_error_status_counts_as_failure_and_continues() {
    let (_server, sender) = common::setup_collector(500, 3).await;
    let reports = vec![
        common::sample_report("orders::A"),
        common::sample_report("orders::B"),
        common::sample_report("orders::C"),
    ];

    let failed = sender.post_batch(&reports, PACKAGE).await;

    assert_eq!(failed, 3);
}

#[tokio::test]
async fn test_unreachable_collector_is_reported() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let sender =
        HttpPostSender::new(format!("http://127.0.0.1:{port}/submit"), Duration::from_secs(2)).unwrap();
    let failed = sender
        .post_batch(&[common::sample_report("orders::A")], PACKAGE)
        .await;

    assert_eq!(failed, 1);
}
