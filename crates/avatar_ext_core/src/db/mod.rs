//! SQLite engine bootstrap for the object store.
//!
//! # Responsibility
//! - Open and configure SQLite connections.
//! - Apply engine schema migrations (record, index and registry tables) in
//!   deterministic order.
//!
//! # Invariants
//! - Engine schema version is tracked via `PRAGMA user_version`; the logical
//!   database version lives in `database_meta` and is owned by `store`.
//! - No record is read or written before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Failure to open or prepare an object store file.
#[derive(Debug)]
pub enum DbError {
    /// SQLite refused to open the file or run an engine schema step.
    Sqlite(rusqlite::Error),
    /// The file's engine tables were laid out by a newer build.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "object store engine failure: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "object store file uses engine layout {db_version}; this build reads up to {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
