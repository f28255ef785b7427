//! Report codec
//!
//! Encodes a [`CrashRecord`] to the line-oriented report format and decodes
//! it back. One file holds one record; causes follow their parent in order.
//!
//! # Layout
//!
//! ```text
//! VERSION2                      version tag, must be the first line
//! Framework 13                  phone model
//! 6.8.0                         OS version
//! app::FetchError               exception type
//! main                          thread name
//! request failed                message (may be empty)
//! app::net,fetch,src/net.rs,42  zero or more frames: class,method,file,line
//! ===CAUSED_BY===               a cause follows
//! std::io::Error                cause exception type
//! main                          cause thread name
//! connection reset              cause message
//! ===METADATA===                optional, VERSION2 only, root metadata
//! user_id=42
//! ```
//!
//! The package version is not part of the text. It is carried by the report
//! file name and handed to [`decode`] by the caller.
//!
//! `VERSION1` files use the same layout without escaping. They are still
//! decoded, and records that came from them re-encode as `VERSION1`.

mod escape;

use std::collections::BTreeMap;

use crate::domain::{CrashRecord, DecodeError, EncodeError, FormatVersion, StackFrame};

use escape::{escape_into, split_escaped, unescape};

/// Line announcing that a nested cause record follows
pub const CAUSE_SEPARATOR: &str = "===CAUSED_BY===";

/// Line announcing the root record's metadata block (`VERSION2` only)
pub const METADATA_SEPARATOR: &str = "===METADATA===";

const FRAME_DELIMITER: char = ',';
const METADATA_DELIMITER: char = '=';
const FRAME_FIELDS: usize = 4;

// ============================================================================
// Encoding
// ============================================================================

/// Encodes `record` in the format revision it carries
pub fn encode(record: &CrashRecord) -> Result<String, EncodeError> {
    let mut writer = LineWriter::new(record.format_version());
    writer.raw(record.format_version().tag());
    writer.field("phone_model", record.phone_model())?;
    writer.field("os_version", record.os_version())?;

    for (depth, link) in record.chain().enumerate() {
        if depth > 0 {
            writer.raw(CAUSE_SEPARATOR);
        }
        writer.field("exception_type", link.exception_type())?;
        writer.field("thread_name", link.thread_name())?;
        writer.field("message", link.message().unwrap_or_default())?;
        for frame in link.frames() {
            writer.frame(frame)?;
        }
    }

    if !record.metadata().is_empty() {
        if !writer.version.escapes_fields() {
            return Err(EncodeError::Unrepresentable {
                field: "metadata",
                reason: "VERSION1 reports cannot carry metadata",
            });
        }
        writer.raw(METADATA_SEPARATOR);
        for (key, value) in record.metadata() {
            writer.metadata(key, value);
        }
    }

    Ok(writer.finish())
}

struct LineWriter {
    version: FormatVersion,
    out: String,
}

impl LineWriter {
    fn new(version: FormatVersion) -> Self {
        Self {
            version,
            out: String::with_capacity(512),
        }
    }

    fn raw(&mut self, line: &str) {
        self.out.push_str(line);
        self.out.push('\n');
    }

    fn field(&mut self, name: &'static str, value: &str) -> Result<(), EncodeError> {
        self.push_value(name, value, None)?;
        self.out.push('\n');
        Ok(())
    }

    fn frame(&mut self, frame: &StackFrame) -> Result<(), EncodeError> {
        self.push_value("frame.class_name", frame.class_name(), Some(FRAME_DELIMITER))?;
        self.out.push(FRAME_DELIMITER);
        self.push_value("frame.method_name", frame.method_name(), Some(FRAME_DELIMITER))?;
        self.out.push(FRAME_DELIMITER);
        self.push_value("frame.file_name", frame.file_name(), Some(FRAME_DELIMITER))?;
        self.out.push(FRAME_DELIMITER);
        self.out.push_str(&frame.line_number().to_string());
        self.out.push('\n');
        Ok(())
    }

    fn metadata(&mut self, key: &str, value: &str) {
        escape_into(&mut self.out, key, Some(METADATA_DELIMITER));
        self.out.push(METADATA_DELIMITER);
        escape_into(&mut self.out, value, Some(METADATA_DELIMITER));
        self.out.push('\n');
    }

    fn push_value(
        &mut self,
        name: &'static str,
        value: &str,
        delimiter: Option<char>,
    ) -> Result<(), EncodeError> {
        if self.version.escapes_fields() {
            escape_into(&mut self.out, value, delimiter);
            return Ok(());
        }
        if value.contains(['\n', '\r']) {
            return Err(EncodeError::Unrepresentable {
                field: name,
                reason: "contains a line break",
            });
        }
        if delimiter.is_some_and(|d| value.contains(d)) {
            return Err(EncodeError::Unrepresentable {
                field: name,
                reason: "contains the field delimiter",
            });
        }
        self.out.push_str(value);
        Ok(())
    }

    fn finish(self) -> String {
        self.out
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes report text into a record carrying `package_version`
pub fn decode(text: &str, package_version: &str) -> Result<CrashRecord, DecodeError> {
    let mut lines = text.lines().enumerate().map(|(index, line)| (index + 1, line));

    let (_, tag) = lines.next().ok_or(DecodeError::MissingVersionTag)?;
    let version =
        FormatVersion::from_tag(tag).ok_or_else(|| DecodeError::UnknownVersion(tag.to_string()))?;

    let mut reader = LineReader { version, lines };
    let phone_model = reader.header("phone model")?;
    let os_version = reader.header("OS version")?;

    let mut links = Vec::new();
    let mut metadata = BTreeMap::new();
    loop {
        let exception_type = reader.header("exception type")?;
        if exception_type.is_empty() {
            return Err(DecodeError::MissingField("exception type"));
        }
        let thread_name = reader.header("thread name")?;
        let message = reader.header("message")?;
        let (frames, next) = reader.frames()?;
        links.push(DecodedLink {
            exception_type,
            thread_name,
            message,
            frames,
        });

        match next {
            Section::Cause => continue,
            Section::Metadata => {
                metadata = reader.metadata()?;
                break;
            }
            Section::End => break,
        }
    }

    // Fold from the deepest cause outwards so each cause is fixed at construction.
    let mut record: Option<CrashRecord> = None;
    for (index, link) in links.into_iter().enumerate().rev() {
        let mut builder = CrashRecord::builder(link.exception_type)
            .format_version(version)
            .package_version(package_version)
            .phone_model(phone_model.as_str())
            .os_version(os_version.as_str())
            .thread_name(link.thread_name)
            .message(link.message)
            .frames(link.frames);
        if index == 0 {
            builder = builder.metadata(std::mem::take(&mut metadata));
        }
        if let Some(cause) = record.take() {
            builder = builder.cause(cause);
        }
        record = Some(builder.build());
    }

    record.ok_or(DecodeError::Truncated {
        expected: "exception type",
    })
}

struct DecodedLink {
    exception_type: String,
    thread_name: String,
    message: String,
    frames: Vec<StackFrame>,
}

/// What follows a frame section
enum Section {
    Cause,
    Metadata,
    End,
}

struct LineReader<I> {
    version: FormatVersion,
    lines: I,
}

impl<'a, I> LineReader<I>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    fn header(&mut self, expected: &'static str) -> Result<String, DecodeError> {
        let (line_no, line) = self.lines.next().ok_or(DecodeError::Truncated { expected })?;
        if !self.version.escapes_fields() {
            return Ok(line.to_string());
        }
        unescape(line).ok_or(DecodeError::InvalidEscape { line: line_no })
    }

    fn frames(&mut self) -> Result<(Vec<StackFrame>, Section), DecodeError> {
        let mut frames = Vec::new();
        while let Some((line_no, line)) = self.lines.next() {
            if line == CAUSE_SEPARATOR {
                return Ok((frames, Section::Cause));
            }
            if line == METADATA_SEPARATOR && self.version.escapes_fields() {
                return Ok((frames, Section::Metadata));
            }
            if line.trim().is_empty() {
                continue;
            }
            frames.push(self.frame(line_no, line)?);
        }
        Ok((frames, Section::End))
    }

    fn frame(&self, line_no: usize, line: &str) -> Result<StackFrame, DecodeError> {
        let fields: Vec<String> = if self.version.escapes_fields() {
            split_escaped(line, Some(FRAME_DELIMITER))
                .ok_or(DecodeError::InvalidEscape { line: line_no })?
        } else {
            line.split(FRAME_DELIMITER).map(str::to_string).collect()
        };

        let [class_name, method_name, file_name, line_number]: [String; FRAME_FIELDS] = fields
            .try_into()
            .map_err(|fields: Vec<String>| DecodeError::MalformedFrame {
                line: line_no,
                reason: format!("expected {FRAME_FIELDS} fields, found {}", fields.len()),
            })?;

        let line_number = line_number
            .trim()
            .parse::<u32>()
            .map_err(|_| DecodeError::InvalidLineNumber {
                line: line_no,
                value: line_number.clone(),
            })?;

        Ok(StackFrame::new(class_name, method_name, file_name, line_number))
    }

    fn metadata(&mut self) -> Result<BTreeMap<String, String>, DecodeError> {
        let mut metadata = BTreeMap::new();
        while let Some((line_no, line)) = self.lines.next() {
            if line.is_empty() {
                continue;
            }
            let fields = split_escaped(line, Some(METADATA_DELIMITER))
                .ok_or(DecodeError::InvalidEscape { line: line_no })?;
            let [key, value]: [String; 2] = fields
                .try_into()
                .map_err(|_| DecodeError::MalformedMetadata { line: line_no })?;
            metadata.insert(key, value);
        }
        Ok(metadata)
    }
}
