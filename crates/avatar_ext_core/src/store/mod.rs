//! Generic named-store object database.
//!
//! # Responsibility
//! - Persist JSON records (plus an optional binary attachment) in named
//!   stores, keyed by a key path or an explicit key, with secondary indexes.
//! - Keep SQL details inside the store boundary.
//!
//! # Invariants
//! - Store, index and key names are allow-listed before any transaction opens.
//! - Every record tree passes `sanitize_object` before it is written.
//! - Engine errors are logged with detail and surfaced only as
//!   `StoreError::Operation`, whose message names the operation and nothing else.
//! - Each record operation is its own transaction; nothing spans several.

use crate::logging::sanitize_for_log;
use crate::validation::SanitizeError;
use log::error;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod cache;
mod key;
mod object_store;
mod schema;

pub use cache::HandleCache;
pub use key::{KeyPath, StoreKey, MAX_TEXT_KEY_LENGTH};
pub use object_store::{ObjectStore, Record, StoreLocation};
pub use schema::{validate_store_name, IndexDescriptor, SchemaUpgrade, StoreDescriptor};

pub type StoreResult<T> = Result<T, StoreError>;

/// Operation names used in caller-facing failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Open,
    Get,
    Put,
    Delete,
    GetAll,
    GetAllKeys,
    Clear,
    ClearByIndex,
    Count,
}

impl StoreOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Get => "get",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::GetAll => "get all",
            Self::GetAllKeys => "get all keys",
            Self::Clear => "clear",
            Self::ClearByIndex => "clear by index",
            Self::Count => "count",
        }
    }
}

impl Display for StoreOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object store error.
#[derive(Debug)]
pub enum StoreError {
    InvalidName(String),
    InvalidKey(String),
    InvalidVersion(u32),
    UnknownStore(String),
    UnknownIndex { store: String, index: String },
    VersionDowngrade { requested: u32, current: u32 },
    SchemaConflict(String),
    Sanitize(SanitizeError),
    InvalidData(String),
    /// Engine failure; detail was logged, never carried.
    Operation(StoreOperation),
}

impl StoreError {
    /// Logs an engine failure and converts it into an information-free error.
    pub(crate) fn engine(operation: StoreOperation, store: &str, err: impl Display) -> Self {
        error!(
            "event=store_op module=store status=error op={} store={} error={}",
            operation.as_str().replace(' ', "_"),
            store,
            sanitize_for_log(&err.to_string())
        );
        Self::Operation(operation)
    }

    pub(crate) fn engine_open(err: rusqlite::Error) -> Self {
        Self::engine(StoreOperation::Open, "-", err)
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "store name is not allowed: {name:?}"),
            Self::InvalidKey(reason) => write!(f, "invalid key: {reason}"),
            Self::InvalidVersion(version) => write!(f, "invalid database version: {version}"),
            Self::UnknownStore(name) => write!(f, "unknown store: {name}"),
            Self::UnknownIndex { store, index } => {
                write!(f, "unknown index `{index}` on store `{store}`")
            }
            Self::VersionDowngrade { requested, current } => write!(
                f,
                "requested database version {requested} is lower than existing version {current}"
            ),
            Self::SchemaConflict(name) => {
                write!(f, "store `{name}` already exists with a different key path")
            }
            Self::Sanitize(err) => write!(f, "{err}"),
            Self::InvalidData(what) => write!(f, "invalid persisted data: {what}"),
            Self::Operation(operation) => write!(f, "Failed to {operation} data"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sanitize(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SanitizeError> for StoreError {
    fn from(value: SanitizeError) -> Self {
        Self::Sanitize(value)
    }
}
