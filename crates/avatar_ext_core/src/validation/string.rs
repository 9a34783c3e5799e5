//! String validation and HTML sanitization.
//!
//! # Invariants
//! - Length is measured in Unicode scalar values, not bytes.
//! - Sanitization is idempotent: entities it emitted are never re-encoded.

use super::ValidationResult;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Default maximum length accepted by `validate_string`.
pub const DEFAULT_MAX_STRING_LENGTH: usize = 10_000;

/// SQL-shaped fragments that mark a value as an injection attempt.
static INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bunion\b\s+(all\s+)?select\b",
        r"(?i)\bdrop\s+(table|database)\b",
        r"(?i)\b(insert\s+into|delete\s+from|truncate\s+table|alter\s+table)\b",
        r"(?i)'\s*(or|and)\s+'?\w+'?\s*=\s*'?\w+",
        r"'\s*;|;\s*--",
        r"(?i)\bexec(ute)?\s+(xp|sp)_\w+",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid injection regex"))
    .collect()
});

/// Tags whose whole element (including content) is removed.
static BLOCK_ELEMENT_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["script", "iframe", "object", "embed"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</\s*{tag}\s*>"))
                .expect("valid block element regex")
        })
        .collect()
});
static DANGLING_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?\s*(script|iframe|object|embed|link|meta)\b[^>]*>")
        .expect("valid dangling tag regex")
});
static DANGEROUS_SCHEME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(javascript|vbscript)\s*:|data\s*:\s*text/html")
        .expect("valid dangerous scheme regex")
});

const KNOWN_ENTITIES: &[(&str, char)] = &[
    ("&amp;", '&'),
    ("&lt;", '<'),
    ("&gt;", '>'),
    ("&quot;", '"'),
    ("&#x27;", '\''),
];

/// Validates an untyped value as a string of at most `max_length` chars.
///
/// Returns the HTML-sanitized string on success.
pub fn validate_string(value: &Value, max_length: usize) -> ValidationResult<String> {
    match value {
        Value::Null => ValidationResult::invalid("Value is required"),
        Value::String(raw) => validate_str(raw, max_length),
        _ => ValidationResult::invalid("Value must be a string"),
    }
}

/// Typed entry point of `validate_string`.
pub fn validate_str(raw: &str, max_length: usize) -> ValidationResult<String> {
    if raw.chars().count() > max_length {
        return ValidationResult::invalid(format!(
            "Value exceeds maximum length of {max_length} characters"
        ));
    }
    // Entities this module emitted are checked as the characters they encode.
    let plain = decode_entities(raw);
    if INJECTION_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(&plain))
    {
        return ValidationResult::invalid("Value contains potentially malicious content");
    }
    ValidationResult::Valid(sanitize_html(raw))
}

/// Strips active HTML content and entity-encodes markup characters.
///
/// Stripping repeats until nothing changes, so removing one match can never
/// splice together a new one.
pub fn sanitize_html(raw: &str) -> String {
    let mut stripped = raw.to_string();
    loop {
        let next = strip_active_content(&stripped);
        if next == stripped {
            break;
        }
        stripped = next;
    }
    encode_entities(&stripped)
}

fn strip_active_content(value: &str) -> String {
    let mut stripped = value.to_string();
    for element in BLOCK_ELEMENT_RES.iter() {
        stripped = element.replace_all(&stripped, "").into_owned();
    }
    let stripped = DANGLING_TAG_RE.replace_all(&stripped, "");
    DANGEROUS_SCHEME_RE.replace_all(&stripped, "").into_owned()
}

/// Reverses the entity encoding applied by `sanitize_html`.
///
/// Only the entities the sanitizer emits are decoded; anything else is left
/// as-is.
pub fn decode_entities(value: &str) -> String {
    let mut decoded = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('&') {
        decoded.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match KNOWN_ENTITIES
            .iter()
            .find(|(entity, _)| rest.starts_with(entity))
        {
            Some((entity, ch)) => {
                decoded.push(*ch);
                rest = &rest[entity.len()..];
            }
            None => {
                decoded.push('&');
                rest = &rest[1..];
            }
        }
    }
    decoded.push_str(rest);
    decoded
}

fn encode_entities(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for (index, ch) in value.char_indices() {
        match ch {
            '&' => {
                let tail = &value[index..];
                if KNOWN_ENTITIES
                    .iter()
                    .any(|(entity, _)| tail.starts_with(entity))
                {
                    encoded.push('&');
                } else {
                    encoded.push_str("&amp;");
                }
            }
            '<' => encoded.push_str("&lt;"),
            '>' => encoded.push_str("&gt;"),
            '"' => encoded.push_str("&quot;"),
            '\'' => encoded.push_str("&#x27;"),
            other => encoded.push(other),
        }
    }
    encoded
}
