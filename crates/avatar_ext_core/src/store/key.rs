//! Primary/index keys and key paths.
//!
//! # Invariants
//! - Keys persist as canonical JSON text (`"a"`, `7`, `["a","b"]`), so equal
//!   keys always produce equal encodings.
//! - Text keys equal to a reserved name are never accepted.

use super::{StoreError, StoreResult};
use crate::validation::is_reserved_key;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// Longest accepted text key component, in chars.
pub const MAX_TEXT_KEY_LENGTH: usize = 1_024;

/// Record key: text, integer, or an ordered compound of keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreKey {
    Text(String),
    Integer(i64),
    Compound(Vec<StoreKey>),
}

impl StoreKey {
    pub fn compound(parts: impl IntoIterator<Item = StoreKey>) -> Self {
        Self::Compound(parts.into_iter().collect())
    }

    /// Checks reserved names, length and control characters.
    pub fn validate(&self) -> StoreResult<()> {
        match self {
            Self::Text(text) => {
                if is_reserved_key(text) {
                    return Err(StoreError::InvalidKey(
                        "key must not be a reserved name".to_string(),
                    ));
                }
                if text.chars().count() > MAX_TEXT_KEY_LENGTH {
                    return Err(StoreError::InvalidKey(format!(
                        "key exceeds maximum length of {MAX_TEXT_KEY_LENGTH} characters"
                    )));
                }
                if text.chars().any(char::is_control) {
                    return Err(StoreError::InvalidKey(
                        "key must not contain control characters".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Integer(_) => Ok(()),
            Self::Compound(parts) => {
                if parts.is_empty() {
                    return Err(StoreError::InvalidKey(
                        "compound key must not be empty".to_string(),
                    ));
                }
                parts.iter().try_for_each(StoreKey::validate)
            }
        }
    }

    /// Canonical persisted encoding.
    pub(crate) fn encode(&self) -> String {
        match self {
            Self::Text(text) => Value::String(text.clone()).to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Compound(parts) => {
                let inner = parts.iter().map(StoreKey::encode).collect::<Vec<_>>();
                format!("[{}]", inner.join(","))
            }
        }
    }

    pub(crate) fn decode(encoded: &str) -> Option<Self> {
        serde_json::from_str(encoded).ok()
    }

    /// Reads a key out of a JSON scalar; only strings and integers qualify.
    fn from_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(Self::Text(text.clone())),
            Value::Number(number) => number.as_i64().map(Self::Integer),
            _ => None,
        }
    }
}

impl Display for StoreKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<&str> for StoreKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for StoreKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for StoreKey {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// Where a store's primary key (or an index's value) lives inside a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    /// One top-level field.
    Field(String),
    /// Several top-level fields, combined into a compound key in order.
    Compound(Vec<String>),
}

impl KeyPath {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    pub fn compound<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Compound(names.into_iter().map(Into::into).collect())
    }

    pub(crate) fn fields(&self) -> Vec<&str> {
        match self {
            Self::Field(name) => vec![name.as_str()],
            Self::Compound(names) => names.iter().map(String::as_str).collect(),
        }
    }

    /// Extracts the key this path designates; `None` when a field is absent
    /// or not a string/integer.
    pub fn extract(&self, value: &Value) -> Option<StoreKey> {
        match self {
            Self::Field(name) => value.get(name).and_then(StoreKey::from_scalar),
            Self::Compound(names) => names
                .iter()
                .map(|name| value.get(name).and_then(StoreKey::from_scalar))
                .collect::<Option<Vec<_>>>()
                .map(StoreKey::Compound),
        }
    }
}
