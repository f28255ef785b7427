//! Crash record domain values
//!
//! A `CrashRecord` is one captured fault. Its `cause` link forms a
//! singly-linked chain mirroring the error's `source()` chain. Records are
//! immutable once built: the builder is the only way to assemble one, and
//! the cause link is fixed at construction.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// Format version
// ============================================================================

/// Revision of the on-disk text format a record was (or will be) encoded with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatVersion {
    /// Legacy layout without escaping
    #[serde(rename = "VERSION1")]
    V1,
    /// Same layout with backslash-escaped fields and an optional metadata block
    #[default]
    #[serde(rename = "VERSION2")]
    V2,
}

impl FormatVersion {
    /// The revision new records are written with
    pub const CURRENT: Self = Self::V2;

    /// Every revision the decoder understands
    pub const ALL: [Self; 2] = [Self::V1, Self::V2];

    /// The literal tag line that opens a report of this revision
    pub const fn tag(self) -> &'static str {
        match self {
            Self::V1 => "VERSION1",
            Self::V2 => "VERSION2",
        }
    }

    /// Looks up a revision by its exact tag line
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.tag() == tag)
    }

    /// Whether fields are backslash-escaped in this revision
    pub const fn escapes_fields(self) -> bool {
        matches!(self, Self::V2)
    }
}

impl Display for FormatVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ============================================================================
// Stack frame
// ============================================================================

/// One call-site entry of a captured stack
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    /// Module path (or type) the function belongs to
    class_name: String,
    /// Function name
    method_name: String,
    /// Source file, empty when unknown
    file_name: String,
    /// Source line, zero when unknown
    line_number: u32,
}

impl StackFrame {
    /// Creates a new frame
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        file_name: impl Into<String>,
        line_number: u32,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            file_name: file_name.into(),
            line_number,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn line_number(&self) -> u32 {
        self.line_number
    }
}

impl Display for StackFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.class_name.is_empty() {
            write!(f, "{}", self.method_name)?;
        } else {
            write!(f, "{}::{}", self.class_name, self.method_name)?;
        }
        write!(f, "({}:{})", self.file_name, self.line_number)
    }
}

// ============================================================================
// Crash record
// ============================================================================

/// One captured fault, with its causes nested inside it
///
/// `Clone`, `PartialEq`, `Debug` and the serde impls walk the chain in a
/// loop, so chains of any depth are safe to copy, compare and print.
pub struct CrashRecord {
    format_version: FormatVersion,
    package_version: String,
    phone_model: String,
    os_version: String,
    thread_name: String,
    /// Fully-qualified type name of the fault value
    exception_type: String,
    /// Never `Some("")`; an empty message is stored as `None`
    message: Option<String>,
    frames: Vec<StackFrame>,
    cause: Option<Box<CrashRecord>>,
    /// Host-supplied metadata; only the root of a chain carries any
    metadata: BTreeMap<String, String>,
}

impl CrashRecord {
    /// Starts building a record for a fault of type `exception_type`
    pub fn builder(exception_type: impl Into<String>) -> CrashRecordBuilder {
        CrashRecordBuilder::new(exception_type)
    }

    // --- Getters ---

    pub fn format_version(&self) -> FormatVersion {
        self.format_version
    }

    pub fn package_version(&self) -> &str {
        &self.package_version
    }

    pub fn phone_model(&self) -> &str {
        &self.phone_model
    }

    pub fn os_version(&self) -> &str {
        &self.os_version
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn exception_type(&self) -> &str {
        &self.exception_type
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn cause(&self) -> Option<&CrashRecord> {
        self.cause.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    // --- Chain helpers ---

    /// Iterates over this record followed by each of its causes
    pub fn chain(&self) -> impl Iterator<Item = &CrashRecord> {
        std::iter::successors(Some(self), |record| record.cause())
    }

    /// Number of records in the chain, this one included
    pub fn depth(&self) -> usize {
        self.chain().count()
    }

    /// The deepest cause, or this record when it has none
    pub fn root_cause(&self) -> &CrashRecord {
        self.chain().last().unwrap_or(self)
    }

    /// Renders the chain as a human-readable stack trace
    ///
    /// ```text
    /// app::Error: request failed
    ///     at app::net::fetch(src/net.rs:42)
    /// Caused by: std::io::Error: connection reset
    /// ```
    pub fn render_stacktrace(&self) -> String {
        let mut out = String::new();
        for (depth, record) in self.chain().enumerate() {
            if depth > 0 {
                out.push_str("Caused by: ");
            }
            out.push_str(&record.exception_type);
            if let Some(message) = &record.message {
                out.push_str(": ");
                out.push_str(message);
            }
            out.push('\n');
            for frame in &record.frames {
                out.push_str("    at ");
                out.push_str(&frame.to_string());
                out.push('\n');
            }
        }
        out
    }

    /// Copies this record's device context down the cause chain
    ///
    /// Causes share the device context of the record they hang off. Walking
    /// stops at the first cause that already agrees, because that cause was
    /// itself built with a consistent chain.
    fn share_context_with_causes(&mut self) {
        let format_version = self.format_version;
        let package_version = self.package_version.clone();
        let phone_model = self.phone_model.clone();
        let os_version = self.os_version.clone();

        let mut next = self.cause.as_deref_mut();
        while let Some(cause) = next {
            let consistent = cause.format_version == format_version
                && cause.package_version == package_version
                && cause.phone_model == phone_model
                && cause.os_version == os_version
                && cause.metadata.is_empty();
            if consistent {
                break;
            }
            cause.format_version = format_version;
            cause.package_version.clone_from(&package_version);
            cause.phone_model.clone_from(&phone_model);
            cause.os_version.clone_from(&os_version);
            cause.metadata.clear();
            next = cause.cause.as_deref_mut();
        }
    }
}

// --- Chain-walking trait impls ---

impl CrashRecord {
    /// Copies this level without its cause
    fn clone_level(&self) -> CrashRecord {
        CrashRecord {
            format_version: self.format_version,
            package_version: self.package_version.clone(),
            phone_model: self.phone_model.clone(),
            os_version: self.os_version.clone(),
            thread_name: self.thread_name.clone(),
            exception_type: self.exception_type.clone(),
            message: self.message.clone(),
            frames: self.frames.clone(),
            cause: None,
            metadata: self.metadata.clone(),
        }
    }

    /// Compares this level with `other`, ignoring causes
    fn level_eq(&self, other: &CrashRecord) -> bool {
        self.format_version == other.format_version
            && self.package_version == other.package_version
            && self.phone_model == other.phone_model
            && self.os_version == other.os_version
            && self.thread_name == other.thread_name
            && self.exception_type == other.exception_type
            && self.message == other.message
            && self.frames == other.frames
            && self.metadata == other.metadata
    }

    /// Links `levels` (outermost first) into one chain
    fn link_levels(levels: Vec<CrashRecord>) -> Option<CrashRecord> {
        levels.into_iter().rev().fold(None, |inner, mut level| {
            level.cause = inner.map(Box::new);
            Some(level)
        })
    }
}

impl Clone for CrashRecord {
    fn clone(&self) -> Self {
        let levels = self.chain().map(CrashRecord::clone_level).collect();
        Self::link_levels(levels).unwrap_or_else(|| self.clone_level())
    }
}

impl PartialEq for CrashRecord {
    fn eq(&self, other: &Self) -> bool {
        let mut left = self.chain();
        let mut right = other.chain();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return true,
                (Some(a), Some(b)) if a.level_eq(b) => {}
                _ => return false,
            }
        }
    }
}

impl Eq for CrashRecord {}

impl fmt::Debug for CrashRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrashRecord")
            .field("format_version", &self.format_version)
            .field("package_version", &self.package_version)
            .field("phone_model", &self.phone_model)
            .field("os_version", &self.os_version)
            .field("metadata", &self.metadata)
            .field("chain", &ChainDebug(self))
            .finish()
    }
}

struct ChainDebug<'a>(&'a CrashRecord);

impl fmt::Debug for ChainDebug<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.chain().map(LevelView::from)).finish()
    }
}

/// Serialized shape: the shared context once, then every level in order
///
/// ```json
/// { "format_version": "VERSION2", "package_version": "2.1.0", ...,
///   "chain": [ { "exception_type": "app::FetchError", ... },
///              { "exception_type": "std::io::Error", ... } ] }
/// ```
#[derive(Serialize)]
struct RecordView<'a> {
    format_version: FormatVersion,
    package_version: &'a str,
    phone_model: &'a str,
    os_version: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: &'a BTreeMap<String, String>,
    chain: Vec<LevelView<'a>>,
}

#[derive(Debug, Serialize)]
struct LevelView<'a> {
    exception_type: &'a str,
    thread_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    frames: &'a [StackFrame],
}

impl<'a> From<&'a CrashRecord> for LevelView<'a> {
    fn from(record: &'a CrashRecord) -> Self {
        Self {
            exception_type: &record.exception_type,
            thread_name: &record.thread_name,
            message: record.message.as_deref(),
            frames: &record.frames,
        }
    }
}

impl Serialize for CrashRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RecordView {
            format_version: self.format_version,
            package_version: &self.package_version,
            phone_model: &self.phone_model,
            os_version: &self.os_version,
            metadata: &self.metadata,
            chain: self.chain().map(LevelView::from).collect(),
        }
        .serialize(serializer)
    }
}

#[derive(Deserialize)]
struct RecordData {
    #[serde(default)]
    format_version: FormatVersion,
    #[serde(default)]
    package_version: String,
    #[serde(default)]
    phone_model: String,
    #[serde(default)]
    os_version: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    chain: Vec<LevelData>,
}

#[derive(Deserialize)]
struct LevelData {
    exception_type: String,
    #[serde(default)]
    thread_name: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    frames: Vec<StackFrame>,
}

impl<'de> Deserialize<'de> for CrashRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let data = RecordData::deserialize(deserializer)?;
        let levels = data
            .chain
            .into_iter()
            .map(|level| {
                CrashRecord::builder(level.exception_type)
                    .format_version(data.format_version)
                    .package_version(data.package_version.as_str())
                    .phone_model(data.phone_model.as_str())
                    .os_version(data.os_version.as_str())
                    .thread_name(level.thread_name)
                    .maybe_message(level.message)
                    .frames(level.frames)
                    .build()
            })
            .collect();
        let mut record = Self::link_levels(levels).ok_or_else(|| {
            <D::Error as de::Error>::invalid_length(0, &"a chain of at least one level")
        })?;
        record.metadata = data.metadata;
        Ok(record)
    }
}

impl Drop for CrashRecord {
    // Unlinks the chain iteratively so very deep chains do not overflow the stack.
    fn drop(&mut self) {
        let mut next = self.cause.take();
        while let Some(mut record) = next {
            next = record.cause.take();
        }
    }
}

/// Builder for [`CrashRecord`]
#[derive(Debug, Clone)]
pub struct CrashRecordBuilder {
    format_version: FormatVersion,
    package_version: String,
    phone_model: String,
    os_version: String,
    thread_name: String,
    exception_type: String,
    message: Option<String>,
    frames: Vec<StackFrame>,
    cause: Option<CrashRecord>,
    metadata: BTreeMap<String, String>,
}

impl CrashRecordBuilder {
    fn new(exception_type: impl Into<String>) -> Self {
        Self {
            format_version: FormatVersion::CURRENT,
            package_version: String::new(),
            phone_model: String::new(),
            os_version: String::new(),
            thread_name: String::new(),
            exception_type: exception_type.into(),
            message: None,
            frames: Vec::new(),
            cause: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn format_version(mut self, version: FormatVersion) -> Self {
        self.format_version = version;
        self
    }

    pub fn package_version(mut self, version: impl Into<String>) -> Self {
        self.package_version = version.into();
        self
    }

    pub fn phone_model(mut self, model: impl Into<String>) -> Self {
        self.phone_model = model.into();
        self
    }

    pub fn os_version(mut self, version: impl Into<String>) -> Self {
        self.os_version = version.into();
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Sets the message; an empty string clears it
    pub fn message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.message = (!message.is_empty()).then_some(message);
        self
    }

    /// Sets or clears the message
    pub fn maybe_message(self, message: Option<String>) -> Self {
        match message {
            Some(message) => self.message(message),
            None => Self {
                message: None,
                ..self
            },
        }
    }

    pub fn frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn frame(mut self, frame: StackFrame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Attaches the cause; it inherits this record's device context on build
    pub fn cause(mut self, cause: CrashRecord) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn build(self) -> CrashRecord {
        let mut record = CrashRecord {
            format_version: self.format_version,
            package_version: self.package_version,
            phone_model: self.phone_model,
            os_version: self.os_version,
            thread_name: self.thread_name,
            exception_type: self.exception_type,
            message: self.message,
            frames: self.frames,
            cause: self.cause.map(Box::new),
            metadata: self.metadata,
        };
        record.share_context_with_causes();
        record
    }
}
