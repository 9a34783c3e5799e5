//! Pure validators for untrusted extension input.
//!
//! # Responsibility
//! - Check and normalize strings, objects, URLs, files and manifests against
//!   injection and resource-exhaustion policies.
//! - Report ordinary malformed input through `ValidationResult`; only the
//!   recursive sanitizer raises a fatal `SanitizeError`.
//!
//! # Invariants
//! - An invalid result never carries a partially sanitized value.
//! - Reserved keys never survive sanitization, at any depth.

pub mod file;
pub mod manifest;
pub mod object;
pub mod string;
pub mod url_policy;

pub use file::{mime_for_file_name, validate_file, MAX_FILE_SIZE_BYTES};
pub use manifest::{
    validate_manifest, MAX_DESCRIPTION_LENGTH, MAX_MANIFEST_IMAGES, MAX_MANIFEST_KEY_LENGTH,
};
pub use object::{
    sanitize_object, validate_object_keys, SanitizeError, MAX_ARRAY_LENGTH, MAX_SANITIZE_DEPTH,
};
pub use string::{
    decode_entities, sanitize_html, validate_str, validate_string, DEFAULT_MAX_STRING_LENGTH,
};
pub use url_policy::{validate_url, validate_url_str};

/// Property names that could re-materialize as prototype hooks in a dynamic
/// object model. Matched case-insensitively.
const RESERVED_KEYS: &[&str] = &[
    "__proto__",
    "constructor",
    "prototype",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
    "toString",
    "valueOf",
    "hasOwnProperty",
];

/// Returns the reserved key set.
pub fn reserved_keys() -> &'static [&'static str] {
    RESERVED_KEYS
}

/// Returns whether `key` equals a reserved key, ignoring ASCII case.
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(key))
}

/// Returns whether `value` contains any reserved key as a substring,
/// ignoring ASCII case.
pub fn contains_reserved_key(value: &str) -> bool {
    let lowered = value.to_ascii_lowercase();
    RESERVED_KEYS
        .iter()
        .any(|reserved| lowered.contains(&reserved.to_ascii_lowercase()))
}

/// Outcome of one validator call.
///
/// `Valid` carries the sanitized value; `Invalid` carries every error found
/// and deliberately nothing else.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult<T> {
    Valid(T),
    Invalid(Vec<String>),
}

impl<T> ValidationResult<T> {
    /// Builds an invalid result with a single error message.
    pub fn invalid(error: impl Into<String>) -> Self {
        Self::Invalid(vec![error.into()])
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Returns collected errors; empty for valid results.
    pub fn errors(&self) -> &[String] {
        match self {
            Self::Valid(_) => &[],
            Self::Invalid(errors) => errors,
        }
    }

    pub fn sanitized_value(&self) -> Option<&T> {
        match self {
            Self::Valid(value) => Some(value),
            Self::Invalid(_) => None,
        }
    }

    pub fn into_result(self) -> Result<T, Vec<String>> {
        match self {
            Self::Valid(value) => Ok(value),
            Self::Invalid(errors) => Err(errors),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ValidationResult<U> {
        match self {
            Self::Valid(value) => ValidationResult::Valid(f(value)),
            Self::Invalid(errors) => ValidationResult::Invalid(errors),
        }
    }
}
