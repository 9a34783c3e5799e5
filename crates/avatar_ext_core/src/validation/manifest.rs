//! Manifest validation.
//!
//! # Responsibility
//! - Check an untyped manifest tree field by field and collect every error.
//! - Return the sanitized tree converted into a typed `Manifest`.
//!
//! # Invariants
//! - The untyped tree is dropped once the typed manifest is built.
//! - Manifest and image keys never contain markup or control characters
//!   and are unchanged by sanitization.

use super::object::{sanitize_object, validate_object_keys, SanitizeError};
use super::string::{sanitize_html, validate_string};
use super::url_policy::validate_url;
use super::ValidationResult;
use crate::model::Manifest;
use serde_json::{Map, Value};

pub const MAX_MANIFEST_KEY_LENGTH: usize = 64;
pub const MAX_DESCRIPTION_LENGTH: usize = 500;
pub const MAX_MANIFEST_IMAGES: usize = 50;
const MAX_IMAGE_FILE_NAME_LENGTH: usize = 255;
const FORBIDDEN_KEY_CHARS: &[char] = &['<', '>', '&', '"', '\''];

/// Validates and sanitizes an untyped manifest.
///
/// Ordinary malformed input yields `Ok(Invalid(errors))`.
///
/// # Errors
/// Returns `SanitizeError` when the tree trips a fatal sanitizer limit.
pub fn validate_manifest(value: &Value) -> Result<ValidationResult<Manifest>, SanitizeError> {
    if let ValidationResult::Invalid(errors) = validate_object_keys(value) {
        return Ok(ValidationResult::Invalid(errors));
    }
    let Value::Object(fields) = value else {
        return Ok(ValidationResult::invalid("Manifest must be an object"));
    };

    let mut errors = Vec::new();
    check_key(fields, &mut errors);
    check_field(
        fields,
        "description",
        "Manifest description",
        MAX_DESCRIPTION_LENGTH,
        &mut errors,
    );
    check_images(fields.get("images"), &mut errors);
    if !errors.is_empty() {
        return Ok(ValidationResult::Invalid(errors));
    }

    let sanitized = sanitize_object(value)?;
    Ok(match serde_json::from_value::<Manifest>(sanitized) {
        Ok(manifest) => ValidationResult::Valid(manifest),
        Err(_) => ValidationResult::invalid("Manifest has an invalid shape"),
    })
}

fn check_key(fields: &Map<String, Value>, errors: &mut Vec<String>) {
    check_identifier(fields, "Manifest key", errors);
}

/// Checks a `key` field that is used verbatim as a storage key.
///
/// The raw key must already be in sanitized form, so two distinct raw keys
/// can never land on the same record.
fn check_identifier(fields: &Map<String, Value>, label: &str, errors: &mut Vec<String>) {
    let before = errors.len();
    check_field(fields, "key", label, MAX_MANIFEST_KEY_LENGTH, errors);
    if errors.len() > before {
        return;
    }
    if let Some(Value::String(key)) = fields.get("key") {
        if key.trim().is_empty() {
            errors.push(format!("{label} must not be empty"));
        } else if key
            .chars()
            .any(|ch| ch.is_control() || FORBIDDEN_KEY_CHARS.contains(&ch))
            || sanitize_html(key) != *key
        {
            errors.push(format!("{label} contains invalid characters"));
        }
    }
}

fn check_images(images: Option<&Value>, errors: &mut Vec<String>) {
    let entries = match images {
        None | Some(Value::Null) => return,
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            errors.push("Manifest images must be an array".to_string());
            return;
        }
    };
    if entries.len() > MAX_MANIFEST_IMAGES {
        errors.push(format!(
            "Manifest declares more than {MAX_MANIFEST_IMAGES} images"
        ));
        return;
    }

    for (position, entry) in entries.iter().enumerate() {
        let label = format!("Image {position}");
        if let ValidationResult::Invalid(entry_errors) = validate_object_keys(entry) {
            errors.extend(entry_errors.into_iter().map(|e| format!("{label}: {e}")));
            continue;
        }
        let Value::Object(image) = entry else {
            continue;
        };

        check_identifier(image, &format!("{label} key"), errors);
        match (image.get("sourceUrl"), image.get("fileName")) {
            (Some(url), None) => {
                if let ValidationResult::Invalid(url_errors) = validate_url(url) {
                    errors.extend(url_errors.into_iter().map(|e| format!("{label}: {e}")));
                }
            }
            (None, Some(file_name)) => {
                let before = errors.len();
                check_value(
                    file_name,
                    &format!("{label} fileName"),
                    MAX_IMAGE_FILE_NAME_LENGTH,
                    errors,
                );
                if errors.len() == before
                    && file_name.as_str().is_some_and(|name| name.trim().is_empty())
                {
                    errors.push(format!("{label} fileName must not be empty"));
                }
            }
            _ => errors.push(format!(
                "{label} must declare exactly one of sourceUrl or fileName"
            )),
        }
    }
}

fn check_field(
    fields: &Map<String, Value>,
    name: &str,
    label: &str,
    max_length: usize,
    errors: &mut Vec<String>,
) {
    check_value(
        fields.get(name).unwrap_or(&Value::Null),
        label,
        max_length,
        errors,
    );
}

fn check_value(value: &Value, label: &str, max_length: usize, errors: &mut Vec<String>) {
    if let ValidationResult::Invalid(field_errors) = validate_string(value, max_length) {
        errors.extend(
            field_errors
                .into_iter()
                .map(|error| format!("{label}: {error}")),
        );
    }
}
