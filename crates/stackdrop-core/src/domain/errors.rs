//! Codec error types
//!
//! Decoding failures are typed so the dispatcher can log exactly why a
//! stored report was rejected. Line numbers are 1-based and refer to the
//! report file.

use thiserror::Error;

/// Errors raised while turning report text back into a `CrashRecord`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The report is empty, so there is no version tag to read
    #[error("Report is empty: missing version tag")]
    MissingVersionTag,

    /// The first line is not a version tag this decoder understands
    #[error("Unknown report version tag: {0:?}")]
    UnknownVersion(String),

    /// The report ended while a header field was still expected
    #[error("Report truncated: expected {expected}")]
    Truncated {
        /// Name of the field that was expected next
        expected: &'static str,
    },

    /// A frame line does not have the expected shape
    #[error("Malformed frame on line {line}: {reason}")]
    MalformedFrame {
        /// Line number in the report
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// The line-number field of a frame is not a non-negative integer
    #[error("Invalid line number {value:?} on line {line}")]
    InvalidLineNumber {
        /// Line number in the report
        line: usize,
        /// The offending field
        value: String,
    },

    /// A backslash escape that the format does not define
    #[error("Invalid escape sequence on line {line}")]
    InvalidEscape {
        /// Line number in the report
        line: usize,
    },

    /// A metadata line that is not a single `key=value` pair
    #[error("Malformed metadata entry on line {line}")]
    MalformedMetadata {
        /// Line number in the report
        line: usize,
    },

    /// A required field is present but empty
    #[error("Required field is empty: {0}")]
    MissingField(&'static str),

    /// The report file name does not carry a package version
    #[error("Invalid report file name: {0}")]
    InvalidFileName(String),
}

/// Errors raised while turning a `CrashRecord` into report text
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The record holds a value its format version cannot express
    #[error("Field {field} cannot be encoded: {reason}")]
    Unrepresentable {
        /// Name of the offending field
        field: &'static str,
        /// Why it cannot be written
        reason: &'static str,
    },
}
