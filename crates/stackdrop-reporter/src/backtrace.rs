//! Backtrace capture and parsing
//!
//! Turns a `std::backtrace::Backtrace` into [`StackFrame`]s by parsing its
//! display form:
//!
//! ```text
//!    0: app::net::fetch
//!              at ./src/net.rs:42:9
//!    1: app::main
//!              at ./src/main.rs:7:5
//! ```
//!
//! Symbols are split at their last top-level `::` into a module path (the
//! frame's class name) and a function name. Frames belonging to the panic
//! runtime and to this crate's capture path are dropped from the top.

use std::backtrace::{Backtrace, BacktraceStatus};

use stackdrop_core::domain::StackFrame;

/// Placeholder for a symbol or module that could not be resolved
pub const UNKNOWN: &str = "<unknown>";

/// Symbols marking the point where the panic runtime hands over to the hook.
/// Everything above the last of these belongs to the runtime.
const PANIC_ENTRY_PREFIXES: &[&str] = &[
    "core::panicking::",
    "rust_begin_unwind",
    "__rustc::rust_begin_unwind",
    "std::panicking::begin_panic",
    "std::panicking::rust_panic_with_hook",
    "std::panic::panic_any",
    "std::sys::backtrace::__rust_end_short_backtrace",
    "std::sys_common::backtrace::__rust_end_short_backtrace",
    "core::result::unwrap_failed",
    "core::option::unwrap_failed",
    "core::option::expect_failed",
    "stackdrop_reporter::fault::panic_with_error",
];

/// Symbols of the capture path itself, dropped when no panic entry is found.
const CAPTURE_PREFIXES: &[&str] = &[
    "std::backtrace",
    "std::backtrace_rs::",
    "backtrace::",
    "stackdrop_reporter::",
];

/// Captures the current thread's stack, newest frame first.
///
/// Returns at most `max_frames` frames, or none when backtraces are not
/// supported on this platform.
pub fn capture_frames(max_frames: usize) -> Vec<StackFrame> {
    let backtrace = Backtrace::force_capture();
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    frames_from_text(&backtrace.to_string(), max_frames)
}

/// Parses backtrace text, drops runtime frames and keeps `max_frames`.
pub fn frames_from_text(text: &str, max_frames: usize) -> Vec<StackFrame> {
    let raw = parse_raw(text);
    let start = first_user_frame(&raw);
    raw.into_iter()
        .skip(start)
        .take(max_frames)
        .map(RawFrame::into_frame)
        .collect()
}

/// Parses every frame of a backtrace's display form, in order.
pub fn parse_backtrace(text: &str) -> Vec<StackFrame> {
    parse_raw(text).into_iter().map(RawFrame::into_frame).collect()
}

#[derive(Debug)]
struct RawFrame {
    symbol: String,
    file: String,
    line: u32,
}

impl RawFrame {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: strip_hash(symbol.trim()).to_string(),
            file: String::new(),
            line: 0,
        }
    }

    fn into_frame(self) -> StackFrame {
        let (class_name, method_name) = split_symbol(&self.symbol);
        StackFrame::new(class_name, method_name, self.file, self.line)
    }
}

fn parse_raw(text: &str) -> Vec<RawFrame> {
    let mut frames: Vec<RawFrame> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("note:") {
            continue;
        }
        if let Some(location) = trimmed.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                let (file, line) = parse_location(location);
                frame.file = file;
                frame.line = line;
            }
            continue;
        }
        match trimmed.split_once(": ") {
            Some((index, symbol)) if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) => {
                frames.push(RawFrame::new(symbol));
            }
            // Inlined symbols share the frame index and are printed without one.
            _ => frames.push(RawFrame::new(trimmed)),
        }
    }
    frames
}

fn first_user_frame(frames: &[RawFrame]) -> usize {
    let matches = |frame: &RawFrame, prefixes: &[&str]| {
        prefixes.iter().any(|p| frame.symbol.starts_with(p))
    };

    if let Some(last_entry) = frames
        .iter()
        .rposition(|frame| matches(frame, PANIC_ENTRY_PREFIXES))
    {
        return last_entry + 1;
    }
    frames
        .iter()
        .position(|frame| !matches(frame, CAPTURE_PREFIXES))
        .unwrap_or(frames.len())
}

/// Parses `path:line:col` (or `path:line`) into a path and line number.
fn parse_location(location: &str) -> (String, u32) {
    let mut rest = location.trim();
    let mut numbers = Vec::with_capacity(2);
    while numbers.len() < 2 {
        match rest.rsplit_once(':') {
            Some((head, tail)) if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => {
                numbers.push(tail);
                rest = head;
            }
            _ => break,
        }
    }
    let line = numbers.last().and_then(|n| n.parse().ok()).unwrap_or(0);
    (rest.to_string(), line)
}

/// Removes a trailing `::h<16 hex digits>` symbol hash.
fn strip_hash(symbol: &str) -> &str {
    match symbol.rsplit_once("::h") {
        Some((head, hash)) if hash.len() == 16 && hash.bytes().all(|b| b.is_ascii_hexdigit()) => head,
        _ => symbol,
    }
}

/// Splits a demangled symbol into (module path, function name).
///
/// The split happens at the last `::` outside angle brackets, so
/// `<T as core::ops::Drop>::drop` yields `("<T as core::ops::Drop>", "drop")`.
fn split_symbol(symbol: &str) -> (String, String) {
    if symbol.is_empty() {
        return (UNKNOWN.to_string(), UNKNOWN.to_string());
    }

    let bytes = symbol.as_bytes();
    let mut depth: usize = 0;
    let mut split_at = None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' => depth += 1,
            b'>' if i > 0 && bytes[i - 1] == b'-' => {}
            b'>' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                split_at = Some(i);
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }

    match split_at {
        Some(at) => (symbol[..at].to_string(), symbol[at + 2..].to_string()),
        None => (String::new(), symbol.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PANIC_TRACE: &str = "\
   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/abc/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
   1: std::backtrace::Backtrace::create
             at /rustc/abc/library/std/src/backtrace.rs:331:13
   2: stackdrop_reporter::interceptor::chain_panic_hook::{{closure}}
             at ./crates/stackdrop-reporter/src/interceptor.rs:150:30
   3: std::panicking::rust_panic_with_hook
             at /rustc/abc/library/std/src/panicking.rs:809:13
   4: std::panicking::begin_panic_handler::{{closure}}
             at /rustc/abc/library/std/src/panicking.rs:674:13
   5: std::sys::backtrace::__rust_end_short_backtrace
             at /rustc/abc/library/std/src/sys/backtrace.rs:170:18
   6: rust_begin_unwind
             at /rustc/abc/library/std/src/panicking.rs:665:5
   7: core::panicking::panic_fmt
             at /rustc/abc/library/core/src/panicking.rs:74:14
   8: app::net::fetch
             at ./src/net.rs:42:9
      app::net::retry
             at ./src/net.rs:60:5
   9: <app::Client as app::Transport>::send
             at ./src/client.rs:12:5
  10: app::main
             at ./src/main.rs:7:5
  11: <unknown>
";

    #[test]
    fn test_parse_all_frames() {
        let frames = parse_backtrace(PANIC_TRACE);
        assert_eq!(frames.len(), 13);
        assert_eq!(frames[0].class_name(), "std::backtrace_rs::backtrace::libunwind");
        assert_eq!(frames[0].method_name(), "trace");
        assert_eq!(frames[0].line_number(), 116);
        assert_eq!(frames[12].method_name(), "<unknown>");
        assert_eq!(frames[12].file_name(), "");
        assert_eq!(frames[12].line_number(), 0);
    }

    #[test]
    fn test_runtime_frames_are_dropped() {
        let frames = frames_from_text(PANIC_TRACE, 64);
        let names: Vec<String> = frames.iter().map(|f| f.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "app::net::fetch(./src/net.rs:42)",
                "app::net::retry(./src/net.rs:60)",
                "<app::Client as app::Transport>::send(./src/client.rs:12)",
                "app::main(./src/main.rs:7)",
                "<unknown>(:0)",
            ]
        );
    }

    #[test]
    fn test_max_frames_is_respected() {
        let frames = frames_from_text(PANIC_TRACE, 2);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].method_name(), "retry");
    }

    #[test]
    fn test_capture_prefix_dropped_without_panic_entry() {
        let text = "\
   0: std::backtrace::Backtrace::force_capture
   1: stackdrop_reporter::backtrace::capture_frames
   2: app::report_error
             at src/lib.rs:3:1
";
        let frames = frames_from_text(text, 10);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].class_name(), "app");
        assert_eq!(frames[0].method_name(), "report_error");
    }

    #[test]
    fn test_split_symbol_variants() {
        assert_eq!(
            split_symbol("app::worker::run::{{closure}}"),
            ("app::worker::run".to_string(), "{{closure}}".to_string())
        );
        assert_eq!(
            split_symbol("<alloc::boxed::Box<F,A> as core::ops::function::FnOnce<Args>>::call_once"),
            (
                "<alloc::boxed::Box<F,A> as core::ops::function::FnOnce<Args>>".to_string(),
                "call_once".to_string()
            )
        );
        assert_eq!(
            split_symbol("<fn() -> u8 as app::Job>::run"),
            ("<fn() -> u8 as app::Job>".to_string(), "run".to_string())
        );
        assert_eq!(split_symbol("main"), (String::new(), "main".to_string()));
    }

    #[test]
    fn test_strip_hash() {
        assert_eq!(strip_hash("app::main::h0123456789abcdef"), "app::main");
        assert_eq!(strip_hash("app::handler"), "app::handler");
    }

    #[test]
    fn test_parse_location_forms() {
        assert_eq!(parse_location("./src/main.rs:7:5"), ("./src/main.rs".to_string(), 7));
        assert_eq!(parse_location("src/main.rs:7"), ("src/main.rs".to_string(), 7));
        assert_eq!(
            parse_location("C:\\work\\src\\main.rs:12:3"),
            ("C:\\work\\src\\main.rs".to_string(), 12)
        );
    }

    #[test]
    fn test_capture_frames_is_bounded() {
        let frames = capture_frames(4);
        assert!(frames.len() <= 4);
    }
}
