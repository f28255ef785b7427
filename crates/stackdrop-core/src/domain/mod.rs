//! Domain values for crash reporting
//!
//! This module contains the value types the pipeline passes around:
//! - `StackFrame` - one call-site entry of a captured stack
//! - `CrashRecord` - one captured fault and its chain of causes
//! - `FormatVersion` - the revision of the text format a record belongs to
//! - `DeviceFacts` - package and device strings supplied at registration
//! - Codec error types

pub mod errors;
pub mod facts;
pub mod record;

pub use errors::{DecodeError, EncodeError};
pub use facts::DeviceFacts;
pub use record::{CrashRecord, CrashRecordBuilder, FormatVersion, StackFrame};
