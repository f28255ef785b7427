//! Integration tests for stackdrop-http
//!
//! Uses wiremock to stand in for a report collector and checks the
//! requests HttpPostSender produces.

mod common;

mod test_post_batch;
mod test_submit;
