//! Object key validation and recursive sanitization of untyped trees.
//!
//! # Responsibility
//! - Reject objects carrying reserved keys (`validate_object_keys`).
//! - Rebuild untyped JSON trees with every string sanitized and every
//!   reserved key dropped (`sanitize_object`).
//!
//! # Invariants
//! - Depth above `MAX_SANITIZE_DEPTH` or arrays longer than
//!   `MAX_ARRAY_LENGTH` are fatal: the whole payload is treated as malicious.
//! - `serde_json::Value` is an owned tree, so cyclic input cannot be built.

use super::string::{validate_str, DEFAULT_MAX_STRING_LENGTH};
use super::{is_reserved_key, ValidationResult};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Deepest nesting level a sanitized value may sit at (root is level 0).
pub const MAX_SANITIZE_DEPTH: usize = 10;
/// Longest array accepted by the sanitizer.
pub const MAX_ARRAY_LENGTH: usize = 1_000;

/// Fatal sanitizer failure. Callers must reject the whole operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizeError {
    DepthExceeded { max: usize },
    ArrayTooLong { len: usize, max: usize },
    UnsafeString { errors: Vec<String> },
}

impl SanitizeError {
    /// Whether the failure signals a size/depth abuse rather than bad content.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::DepthExceeded { .. } | Self::ArrayTooLong { .. })
    }
}

impl Display for SanitizeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DepthExceeded { max } => {
                write!(f, "object nesting exceeds maximum depth of {max}")
            }
            Self::ArrayTooLong { len, max } => {
                write!(f, "array length {len} exceeds maximum of {max}")
            }
            Self::UnsafeString { errors } => {
                write!(f, "object contains an unsafe string: {}", errors.join("; "))
            }
        }
    }
}

impl Error for SanitizeError {}

/// Rejects non-objects and objects owning any reserved key.
///
/// Only the top level is inspected; nested levels are handled by
/// `sanitize_object`.
pub fn validate_object_keys(value: &Value) -> ValidationResult<()> {
    let Value::Object(map) = value else {
        return ValidationResult::invalid("Value must be an object");
    };

    let errors = map
        .keys()
        .filter(|key| is_reserved_key(key))
        .map(|key| format!("Reserved key is not allowed: {key}"))
        .collect::<Vec<_>>();
    if errors.is_empty() {
        ValidationResult::Valid(())
    } else {
        ValidationResult::Invalid(errors)
    }
}

/// Recursively rebuilds `value` with sanitized strings and no reserved keys.
///
/// Numbers, booleans and nulls pass through untouched.
///
/// # Errors
/// - `DepthExceeded` when any value sits deeper than `MAX_SANITIZE_DEPTH`.
/// - `ArrayTooLong` when any array holds more than `MAX_ARRAY_LENGTH` items.
/// - `UnsafeString` when a string fails `validate_str`.
pub fn sanitize_object(value: &Value) -> Result<Value, SanitizeError> {
    sanitize_at_depth(value, 0)
}

fn sanitize_at_depth(value: &Value, depth: usize) -> Result<Value, SanitizeError> {
    if depth > MAX_SANITIZE_DEPTH {
        return Err(SanitizeError::DepthExceeded {
            max: MAX_SANITIZE_DEPTH,
        });
    }

    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(value.clone()),
        Value::String(raw) => match validate_str(raw, DEFAULT_MAX_STRING_LENGTH) {
            ValidationResult::Valid(clean) => Ok(Value::String(clean)),
            ValidationResult::Invalid(errors) => Err(SanitizeError::UnsafeString { errors }),
        },
        Value::Array(items) => {
            if items.len() > MAX_ARRAY_LENGTH {
                return Err(SanitizeError::ArrayTooLong {
                    len: items.len(),
                    max: MAX_ARRAY_LENGTH,
                });
            }
            items
                .iter()
                .map(|item| sanitize_at_depth(item, depth + 1))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        Value::Object(map) => {
            let mut clean = Map::new();
            for (key, item) in map {
                if is_reserved_key(key) {
                    continue;
                }
                clean.insert(key.clone(), sanitize_at_depth(item, depth + 1)?);
            }
            Ok(Value::Object(clean))
        }
    }
}
