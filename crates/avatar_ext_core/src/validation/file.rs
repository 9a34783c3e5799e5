//! Local file validation: name policy, size cap and MIME allow-list.

use super::{contains_reserved_key, ValidationResult};
use crate::model::LocalFile;

/// Largest file accepted for import (10 MiB).
pub const MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_FILE_NAME_LENGTH: usize = 255;

/// Accepted extensions and the MIME type each one must declare.
const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("json", "application/json"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

/// Returns the required MIME type for `name`'s extension, if allowed.
pub fn mime_for_file_name(name: &str) -> Option<&'static str> {
    let (_, extension) = name.rsplit_once('.')?;
    ALLOWED_TYPES
        .iter()
        .find(|(allowed, _)| allowed.eq_ignore_ascii_case(extension))
        .map(|(_, mime)| *mime)
}

/// Validates a user-supplied file descriptor and its content.
///
/// Every failing rule is reported; the name rules are checked first.
pub fn validate_file(file: &LocalFile) -> ValidationResult<()> {
    let mut errors = Vec::new();
    let name = file.name.as_str();

    if name.trim().is_empty() {
        errors.push("File name is required".to_string());
    } else {
        if name.chars().count() > MAX_FILE_NAME_LENGTH {
            errors.push(format!(
                "File name exceeds maximum length of {MAX_FILE_NAME_LENGTH} characters"
            ));
        }
        if name.contains(['/', '\\']) || name.contains("..") || name.chars().any(char::is_control)
        {
            errors.push("File name contains invalid characters".to_string());
        }
        if contains_reserved_key(name) {
            errors.push("File name contains a reserved word".to_string());
        }
    }

    if file.size > MAX_FILE_SIZE_BYTES {
        errors.push(format!(
            "File exceeds maximum size of {MAX_FILE_SIZE_BYTES} bytes"
        ));
    } else if !file.is_readable() {
        errors.push("File content does not match its declared size".to_string());
    }

    match mime_for_file_name(name) {
        None => errors.push("File type is not allowed".to_string()),
        Some(expected) if !expected.eq_ignore_ascii_case(file.mime_type.trim()) => {
            errors.push(format!("File type must be {expected}"));
        }
        Some(_) => {}
    }

    if errors.is_empty() {
        ValidationResult::Valid(())
    } else {
        ValidationResult::Invalid(errors)
    }
}
