//! Fault model
//!
//! A [`Fault`] is the in-memory description of an unhandled failure as seen
//! by the panic hook: the thread it happened on and a non-empty chain of
//! links, outermost first. Each link carries a type name, an optional
//! message and its frames.
//!
//! Panic payloads are turned into faults by [`Fault::from_panic`]. String
//! payloads produce a single link. Error payloads (`anyhow::Error`, boxed
//! `dyn Error`, or a [`ChainedPanic`] raised through [`panic_with_error`])
//! produce one link per `source()` in the error chain.

use std::any::Any;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::panic::Location;

use stackdrop_core::domain::{CrashRecord, DeviceFacts, FormatVersion, StackFrame};

use crate::backtrace::UNKNOWN;

/// Type name recorded for `&'static str` panic payloads
pub const STR_PAYLOAD_TYPE: &str = "&str";

/// Type name recorded for payloads that are neither strings nor errors
pub const UNKNOWN_PAYLOAD_TYPE: &str = "core::any::Any";

/// Type name recorded for error sources whose concrete type cannot be named
pub const OPAQUE_ERROR_TYPE: &str = "dyn core::error::Error";

/// Error chains longer than this are cut when captured.
pub const MAX_CAUSE_DEPTH: usize = 256;

// ============================================================================
// FaultLink / Fault
// ============================================================================

/// One level of a fault's cause chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultLink {
    type_name: String,
    message: Option<String>,
    frames: Vec<StackFrame>,
}

impl FaultLink {
    /// Creates a link. An empty message is stored as no message.
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            type_name: type_name.into(),
            message: (!message.is_empty()).then_some(message),
            frames: Vec::new(),
        }
    }

    /// Creates a link without a message.
    pub fn without_message(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: None,
            frames: Vec::new(),
        }
    }

    pub fn with_frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }
}

/// An unhandled failure on some thread, with its cause chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    thread_name: String,
    /// Outermost first; never empty
    links: Vec<FaultLink>,
}

impl Fault {
    /// Creates a fault whose outermost link is `root`.
    pub fn new(thread_name: impl Into<String>, root: FaultLink) -> Self {
        Self {
            thread_name: thread_name.into(),
            links: vec![root],
        }
    }

    /// Appends `link` as the cause of the current innermost link.
    pub fn caused_by(mut self, link: FaultLink) -> Self {
        self.links.push(link);
        self
    }

    /// Builds a fault from an error and its `source()` chain.
    pub fn from_error(thread_name: impl Into<String>, error: &(dyn Error + 'static)) -> Self {
        Self {
            thread_name: thread_name.into(),
            links: links_from_error(error_type_name(error), error),
        }
    }

    /// Builds a fault from a panic payload.
    ///
    /// `frames` become the outermost link's frames. When they are empty and
    /// the panic location is known, a single frame pointing at it is used.
    pub fn from_panic(
        thread_name: impl Into<String>,
        payload: &(dyn Any + Send),
        location: Option<&Location<'_>>,
        frames: Vec<StackFrame>,
    ) -> Self {
        let mut links = links_from_payload(payload);

        let frames = match (frames.is_empty(), location) {
            (true, Some(location)) => vec![StackFrame::new(
                UNKNOWN,
                UNKNOWN,
                location.file(),
                location.line(),
            )],
            _ => frames,
        };
        if let Some(root) = links.first_mut() {
            root.frames = frames;
        }

        Self {
            thread_name: thread_name.into(),
            links,
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn links(&self) -> &[FaultLink] {
        &self.links
    }

    /// The outermost link
    pub fn root(&self) -> &FaultLink {
        &self.links[0]
    }

    /// Converts the fault into a record chain stamped with `facts`.
    ///
    /// Every level shares the device context and thread name; `metadata`
    /// is attached to the outermost record only.
    pub fn to_record(
        &self,
        facts: &DeviceFacts,
        metadata: BTreeMap<String, String>,
        format_version: FormatVersion,
    ) -> CrashRecord {
        let level = |link: &FaultLink| {
            CrashRecord::builder(link.type_name.clone())
                .format_version(format_version)
                .package_version(facts.package_version.clone())
                .phone_model(facts.phone_model.clone())
                .os_version(facts.os_version.clone())
                .thread_name(self.thread_name.clone())
                .maybe_message(link.message.clone())
                .frames(link.frames.clone())
        };

        let (root, causes) = match self.links.split_first() {
            Some(split) => split,
            None => {
                return CrashRecord::builder(UNKNOWN_PAYLOAD_TYPE)
                    .format_version(format_version)
                    .package_version(facts.package_version.clone())
                    .phone_model(facts.phone_model.clone())
                    .os_version(facts.os_version.clone())
                    .thread_name(self.thread_name.clone())
                    .metadata(metadata)
                    .build()
            }
        };

        let nested = causes
            .iter()
            .rev()
            .fold(None, |inner: Option<CrashRecord>, link| {
                let builder = level(link);
                Some(match inner {
                    Some(inner) => builder.cause(inner).build(),
                    None => builder.build(),
                })
            });

        let builder = level(root).metadata(metadata);
        match nested {
            Some(cause) => builder.cause(cause).build(),
            None => builder.build(),
        }
    }
}

// ============================================================================
// Chained panics
// ============================================================================

/// Panic payload carrying an already-flattened error chain
///
/// Raise it with [`panic_with_error`] to have every `source()` of an error
/// recorded as a cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainedPanic {
    links: Vec<FaultLink>,
}

impl ChainedPanic {
    pub fn new(error: &(dyn Error + 'static)) -> Self {
        Self {
            links: links_from_error(error_type_name(error), error),
        }
    }

    /// Same as [`ChainedPanic::new`], recording `E`'s own type name for the
    /// outermost link.
    pub fn from_typed<E: Error + 'static>(error: &E) -> Self {
        Self {
            links: links_from_error(std::any::type_name::<E>(), error),
        }
    }

    pub fn links(&self) -> &[FaultLink] {
        &self.links
    }
}

impl fmt::Display for ChainedPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.links.first() {
            Some(root) => write!(
                f,
                "{}: {}",
                root.type_name,
                root.message.as_deref().unwrap_or_default()
            ),
            None => f.write_str(UNKNOWN_PAYLOAD_TYPE),
        }
    }
}

/// Panics with `error` as the payload, keeping its whole cause chain.
#[track_caller]
pub fn panic_with_error<E: Error + 'static>(error: E) -> ! {
    std::panic::panic_any(ChainedPanic::from_typed(&error))
}

// ============================================================================
// Helpers
// ============================================================================

fn links_from_payload(payload: &(dyn Any + Send)) -> Vec<FaultLink> {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        return vec![FaultLink::new(STR_PAYLOAD_TYPE, *message)];
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return vec![FaultLink::new(
            std::any::type_name::<String>(),
            message.as_str(),
        )];
    }
    if let Some(chained) = payload.downcast_ref::<ChainedPanic>() {
        if !chained.links.is_empty() {
            return chained.links.clone();
        }
    }
    if let Some(error) = payload.downcast_ref::<anyhow::Error>() {
        let root: &(dyn Error + 'static) = &**error;
        return links_from_error(error_type_name(root), root);
    }
    if let Some(error) = payload.downcast_ref::<Box<dyn Error + Send + Sync>>() {
        let root: &(dyn Error + 'static) = &**error;
        return links_from_error(error_type_name(root), root);
    }
    vec![FaultLink::without_message(UNKNOWN_PAYLOAD_TYPE)]
}

fn links_from_error(root_type: &str, error: &(dyn Error + 'static)) -> Vec<FaultLink> {
    let mut links = vec![FaultLink::new(root_type, error.to_string())];
    let mut source = error.source();
    while let Some(cause) = source {
        if links.len() >= MAX_CAUSE_DEPTH {
            break;
        }
        links.push(FaultLink::new(error_type_name(cause), cause.to_string()));
        source = cause.source();
    }
    links
}

/// Names the concrete type behind a `dyn Error` when it is a std error type.
fn error_type_name(error: &(dyn Error + 'static)) -> &'static str {
    macro_rules! known_types {
        ($($ty:ty),* $(,)?) => {
            $(
                if error.is::<$ty>() {
                    return std::any::type_name::<$ty>();
                }
            )*
        };
    }

    known_types!(
        std::io::Error,
        std::num::ParseIntError,
        std::num::ParseFloatError,
        std::num::TryFromIntError,
        std::str::Utf8Error,
        std::str::ParseBoolError,
        std::string::FromUtf8Error,
        std::char::ParseCharError,
        std::array::TryFromSliceError,
        std::net::AddrParseError,
        std::env::VarError,
        std::time::SystemTimeError,
        std::sync::mpsc::RecvError,
        std::fmt::Error,
    );
    OPAQUE_ERROR_TYPE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Wrapped {
        context: &'static str,
        source: Box<dyn Error + Send + Sync>,
    }

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.context)
        }
    }

    impl Error for Wrapped {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            let source: &(dyn Error + 'static) = &*self.source;
            Some(source)
        }
    }

    fn three_level_error() -> Wrapped {
        let parse_error = "x".parse::<u32>().unwrap_err();
        Wrapped {
            context: "loading settings",
            source: Box::new(Wrapped {
                context: "reading port",
                source: Box::new(parse_error),
            }),
        }
    }

    fn facts() -> DeviceFacts {
        DeviceFacts::new("com.example.app", "2.0.0", "X1", "linux 6.1")
    }

    #[test]
    fn test_str_payload() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let fault = Fault::from_panic("main", payload.as_ref(), None, Vec::new());
        assert_eq!(fault.thread_name(), "main");
        assert_eq!(fault.links().len(), 1);
        assert_eq!(fault.root().type_name(), STR_PAYLOAD_TYPE);
        assert_eq!(fault.root().message(), Some("boom"));
        assert!(fault.root().frames().is_empty());
    }

    #[test]
    fn test_string_payload_uses_location_when_no_frames() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("index out of range"));
        let location = Location::caller();
        let fault = Fault::from_panic("worker", payload.as_ref(), Some(location), Vec::new());
        assert_eq!(fault.root().type_name(), "alloc::string::String");
        assert_eq!(fault.root().frames().len(), 1);
        assert_eq!(fault.root().frames()[0].file_name(), location.file());
        assert_eq!(fault.root().frames()[0].line_number(), location.line());
    }

    #[test]
    fn test_unknown_payload_has_no_message() {
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        let fault = Fault::from_panic("main", payload.as_ref(), None, Vec::new());
        assert_eq!(fault.root().type_name(), UNKNOWN_PAYLOAD_TYPE);
        assert_eq!(fault.root().message(), None);
    }

    #[test]
    fn test_chained_panic_keeps_every_source() {
        let payload: Box<dyn Any + Send> = Box::new(ChainedPanic::from_typed(&three_level_error()));
        let fault = Fault::from_panic("main", payload.as_ref(), None, Vec::new());
        let types: Vec<&str> = fault.links().iter().map(FaultLink::type_name).collect();
        assert_eq!(
            types,
            vec![
                std::any::type_name::<Wrapped>(),
                OPAQUE_ERROR_TYPE,
                "core::num::error::ParseIntError",
            ]
        );
        assert_eq!(fault.root().message(), Some("loading settings"));
    }

    #[test]
    fn test_anyhow_payload() {
        let error = anyhow::Error::new(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
            .context("opening journal");
        let payload: Box<dyn Any + Send> = Box::new(error);
        let fault = Fault::from_panic("main", payload.as_ref(), None, Vec::new());
        assert_eq!(fault.links().len(), 2);
        assert_eq!(fault.root().message(), Some("opening journal"));
        assert_eq!(fault.links()[1].type_name(), "std::io::error::Error");
        assert_eq!(fault.links()[1].message(), Some("gone"));
    }

    #[test]
    fn test_boxed_error_payload() {
        let error: Box<dyn Error + Send + Sync> = Box::new(three_level_error());
        let payload: Box<dyn Any + Send> = Box::new(error);
        let fault = Fault::from_panic("main", payload.as_ref(), None, Vec::new());
        assert_eq!(fault.links().len(), 3);
        assert_eq!(fault.root().type_name(), OPAQUE_ERROR_TYPE);
    }

    #[test]
    fn test_to_record_nests_causes_in_order() {
        let fault = Fault::new("main", FaultLink::new("app::Outer", "top"))
            .caused_by(FaultLink::new("app::Middle", "mid"))
            .caused_by(FaultLink::without_message("app::Inner"));

        let mut metadata = BTreeMap::new();
        metadata.insert("build".to_string(), "42".to_string());
        let record = fault.to_record(&facts(), metadata, FormatVersion::CURRENT);

        let types: Vec<&str> = record.chain().map(CrashRecord::exception_type).collect();
        assert_eq!(types, vec!["app::Outer", "app::Middle", "app::Inner"]);
        assert!(record.chain().all(|r| r.package_version() == "2.0.0"));
        assert!(record.chain().all(|r| r.thread_name() == "main"));
        assert_eq!(record.metadata().get("build").map(String::as_str), Some("42"));
        assert!(record.cause().is_some_and(|c| c.metadata().is_empty()));
        assert_eq!(record.root_cause().message(), None);
    }

    #[test]
    fn test_chained_panic_display() {
        let chained = ChainedPanic::new(&std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(chained.to_string(), "std::io::error::Error: disk");
    }

    #[test]
    fn test_panic_with_error_payload() {
        let result = std::panic::catch_unwind(|| panic_with_error(three_level_error()));
        let payload = match result {
            Err(payload) => payload,
            Ok(_) => unreachable!(),
        };
        let chained = payload
            .downcast_ref::<ChainedPanic>()
            .expect("payload should be a ChainedPanic");
        assert_eq!(chained.links().len(), 3);
    }
}
