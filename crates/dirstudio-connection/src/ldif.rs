//! LDIF-style rendering of change records.
//!
//! Produces the canonical text form: a `dn:` line, `control:` lines, a
//! `changetype:` line, the payload, and a terminating blank line. Values that
//! are not LDIF-safe are base64 encoded with `::`. Lines are never folded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashSet;
use std::fmt::Write;

use crate::record::{AttributeValue, Change, ChangeRecord};

/// Replacement text for values of masked attributes.
pub const MASK: &str = "**********";

/// Options controlling how records are rendered.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    masked_attributes: HashSet<String>,
}

impl RenderOptions {
    /// Mask the values of the given attributes (case-insensitive).
    pub fn with_masked_attributes<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            masked_attributes: attributes
                .into_iter()
                .map(|a| a.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_masked(&self, attribute: &str) -> bool {
        !self.masked_attributes.is_empty()
            && self
                .masked_attributes
                .contains(&attribute.to_ascii_lowercase())
    }
}

/// Whether `value` can be written as-is after `name: `.
///
/// Rejects a leading space, colon or `<`, a trailing space, and any
/// non-ASCII, NUL, CR or LF byte.
pub fn is_safe_string(value: &str) -> bool {
    let bytes = value.as_bytes();
    if let Some(first) = bytes.first() {
        if matches!(first, b' ' | b':' | b'<') {
            return false;
        }
    }
    if bytes.last() == Some(&b' ') {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii() && !matches!(b, b'\0' | b'\r' | b'\n'))
}

fn push_line(out: &mut String, name: &str, value: &[u8]) {
    match std::str::from_utf8(value) {
        Ok("") => {
            let _ = writeln!(out, "{name}:");
        }
        Ok(text) if is_safe_string(text) => {
            let _ = writeln!(out, "{name}: {text}");
        }
        _ => {
            let _ = writeln!(out, "{name}:: {}", STANDARD.encode(value));
        }
    }
}

fn push_value(out: &mut String, name: &str, value: &AttributeValue, options: &RenderOptions) {
    if options.is_masked(name) {
        let _ = writeln!(out, "{name}: {MASK}");
    } else {
        push_line(out, name, value.as_bytes());
    }
}

/// Render one record in canonical text form.
pub fn render_record(record: &ChangeRecord, options: &RenderOptions) -> String {
    let mut out = String::new();
    push_line(&mut out, "dn", record.dn().as_bytes());

    for control in record.controls() {
        let _ = write!(out, "control: {} {}", control.oid, control.critical);
        match &control.value {
            Some(value) => {
                let _ = writeln!(out, ":: {}", STANDARD.encode(value));
            }
            None => out.push('\n'),
        }
    }

    let _ = writeln!(out, "changetype: {}", record.change_type());

    match record.change() {
        Change::Add { attributes } => {
            for attribute in attributes {
                for value in &attribute.values {
                    push_value(&mut out, &attribute.name, value, options);
                }
            }
        }
        Change::Modify { edits } => {
            for edit in edits {
                let _ = writeln!(out, "{}: {}", edit.kind.as_str(), edit.attribute);
                for value in &edit.values {
                    push_value(&mut out, &edit.attribute, value, options);
                }
                out.push_str("-\n");
            }
        }
        Change::Delete => {}
        Change::ModifyDn {
            new_rdn,
            delete_old_rdn,
            new_superior,
        } => {
            push_line(&mut out, "newrdn", new_rdn.as_bytes());
            let _ = writeln!(out, "deleteoldrdn: {}", u8::from(*delete_old_rdn));
            if let Some(superior) = new_superior {
                push_line(&mut out, "newsuperior", superior.as_bytes());
            }
        }
    }

    out.push('\n');
    out
}
