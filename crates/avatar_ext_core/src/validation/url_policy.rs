//! URL validation for manifest and asset fetches.
//!
//! The host check is a lexical SSRF guard: it matches fixed loopback and
//! private-range prefixes and does not resolve DNS. A hostname that resolves
//! to a private address without matching those prefixes passes.

use super::ValidationResult;
use serde_json::Value;
use url::Url;

/// Longest URL accepted, in bytes.
pub const MAX_URL_LENGTH: usize = 2_048;

const ALLOWED_SCHEMES: &[&str] = &["http", "https"];
const DANGEROUS_SCHEME_MARKERS: &[&str] = &["javascript:", "vbscript:", "data:", "file:"];
const BLOCKED_HOSTS: &[&str] = &["localhost", "127.0.0.1"];
const BLOCKED_HOST_PREFIXES: &[&str] = &["192.168.", "10.", "172.16."];

/// Validates an untyped value as a fetchable http(s) URL.
pub fn validate_url(value: &Value) -> ValidationResult<String> {
    match value {
        Value::Null => ValidationResult::invalid("URL is required"),
        Value::String(raw) => validate_url_str(raw),
        _ => ValidationResult::invalid("URL must be a string"),
    }
}

/// Typed entry point of `validate_url`. Returns the trimmed URL.
pub fn validate_url_str(raw: &str) -> ValidationResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ValidationResult::invalid("URL is required");
    }
    if trimmed.len() > MAX_URL_LENGTH {
        return ValidationResult::invalid(format!(
            "URL exceeds maximum length of {MAX_URL_LENGTH} bytes"
        ));
    }

    let lowered = trimmed.to_ascii_lowercase();
    if DANGEROUS_SCHEME_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return ValidationResult::invalid("URL contains a dangerous scheme");
    }

    let parsed = match Url::parse(trimmed) {
        Ok(parsed) => parsed,
        Err(_) => return ValidationResult::invalid("URL is malformed"),
    };
    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return ValidationResult::invalid("URL scheme must be http or https");
    }

    let Some(host) = parsed.host_str() else {
        return ValidationResult::invalid("URL must include a host");
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if BLOCKED_HOSTS.contains(&host.as_str())
        || BLOCKED_HOST_PREFIXES
            .iter()
            .any(|prefix| host.starts_with(prefix))
    {
        return ValidationResult::invalid("URL host is not allowed");
    }

    ValidationResult::Valid(trimmed.to_string())
}
