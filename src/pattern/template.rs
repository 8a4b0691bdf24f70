//! Destination-path template compiler.
//!
//! Manifest destination paths are literal object paths with `${variable}`
//! placeholders. Compilation escapes the literal runs, substitutes each
//! placeholder with its regex fragment, and anchors the result so a pattern
//! matches a whole object name or a whole path suffix starting at a `/`
//! boundary, never a fragment of one.

use crate::error::{GondolaError, Result};

/// Recognized template variables and the regex fragment each expands to.
pub const TEMPLATE_VARIABLES: &[(&str, &str)] = &[
    ("build_number", r"\d+"),
    ("path_platform", r"[A-Za-z0-9-_]+"),
    ("tools_platform", r"[A-Za-z0-9-_]+"),
    ("locale", r"[A-Za-z-]+"),
    ("previous_version", r"\d+\.\d+b?\d?"),
    ("version", r"\d+\.\d+b?\d?"),
];

fn fragment_for(name: &str) -> Option<&'static str> {
    TEMPLATE_VARIABLES
        .iter()
        .find(|(var, _)| *var == name)
        .map(|(_, fragment)| *fragment)
}

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Literal(&'a str),
    Variable(&'a str),
}

/// Splits a template into literal runs and `${name}` placeholders.
/// An unterminated `${` is not a placeholder; the rest stays literal.
fn segments(template: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        match rest[start + 2..].find('}') {
            Some(end) => {
                if start > 0 {
                    out.push(Segment::Literal(&rest[..start]));
                }
                out.push(Segment::Variable(&rest[start + 2..start + 2 + end]));
                rest = &rest[start + 2 + end + 1..];
            }
            None => break,
        }
    }
    if !rest.is_empty() {
        out.push(Segment::Literal(rest));
    }
    out
}

/// Compiles a destination-path template into an anchored regex pattern.
///
/// Literal text is regex-escaped; each `${variable}` becomes its fragment
/// verbatim. The body is wrapped as `(?:^|/)body$`. Placeholders naming an
/// unrecognized variable are rejected.
pub fn compile_template(template: &str) -> Result<String> {
    let mut body = String::with_capacity(template.len() + 16);
    for segment in segments(template) {
        match segment {
            Segment::Literal(text) => body.push_str(&regex::escape(text)),
            Segment::Variable(name) => match fragment_for(name) {
                Some(fragment) => body.push_str(fragment),
                None => {
                    return Err(GondolaError::UnknownTemplateVariable {
                        token: name.to_string(),
                    })
                }
            },
        }
    }
    Ok(format!("(?:^|/){body}$"))
}
