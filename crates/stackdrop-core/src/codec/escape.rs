//! Backslash escaping for `VERSION2` fields
//!
//! Line breaks and backslashes are escaped in every field. The delimiter of
//! the enclosing line (`,` for frames, `=` for metadata) is escaped as well,
//! so splitting on the unescaped delimiter is unambiguous.

const ESCAPE: char = '\\';

/// Appends `value` to `out`, escaping line breaks, backslashes and `delimiter`
pub(crate) fn escape_into(out: &mut String, value: &str, delimiter: Option<char>) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if Some(c) == delimiter => {
                out.push(ESCAPE);
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

/// Reverses [`escape_into`]; `None` means an undefined escape sequence
pub(crate) fn unescape(value: &str) -> Option<String> {
    if !value.contains(ESCAPE) {
        return Some(value.to_string());
    }
    let mut fields = split_escaped(value, None)?;
    fields.pop()
}

/// Splits `line` on unescaped `delimiter` and unescapes each field
///
/// With no delimiter the whole line is a single field.
pub(crate) fn split_escaped(line: &str, delimiter: Option<char>) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::with_capacity(line.len());
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        if ch == ESCAPE {
            let decoded = match chars.next()? {
                '\\' => '\\',
                'n' => '\n',
                'r' => '\r',
                ',' => ',',
                '=' => '=',
                _ => return None,
            };
            current.push(decoded);
        } else if Some(ch) == delimiter {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    fields.push(current);
    Some(fields)
}
