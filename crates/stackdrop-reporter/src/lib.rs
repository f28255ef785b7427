//! Stackdrop Reporter - panic capture and startup delivery
//!
//! Provides:
//! - `FaultInterceptor`: panic hook that persists every fault as a report file
//! - `ReportStore`: the directory of pending report files
//! - `Dispatcher`: sends the reports of earlier runs once, then clears them
//! - `Registration`: wires all of the above at process start
//! - `panic_with_error`: panics while keeping an error's whole cause chain

pub mod backtrace;
pub mod device;
pub mod dispatcher;
pub mod fault;
pub mod interceptor;
pub mod registration;
pub mod store;

pub use dispatcher::{DispatchSummary, Dispatcher, SendOutcome};
pub use fault::{panic_with_error, ChainedPanic, Fault, FaultLink};
pub use interceptor::{CaptureOutcome, FaultInterceptor};
pub use registration::{register, Registered, Registration};
pub use store::{PendingReport, ReportStore, StoreError};
