//! Engine schema steps for the object store tables.
//!
//! # Responsibility
//! - Create the registry (`database_meta`, `object_stores`, `object_indexes`),
//!   record (`records`) and secondary index (`index_entries`) tables.
//! - Add the index-value lookup used by `clear_by_index`.
//!
//! # Invariants
//! - Steps are ordered by `version` and each runs at most once per file.
//! - All pending steps commit together; `PRAGMA user_version` ends at the
//!   last applied step.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

/// One engine schema step.
#[derive(Debug, Clone, Copy)]
struct EngineStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const ENGINE_STEPS: &[EngineStep] = &[
    EngineStep {
        version: 1,
        name: "object_store_tables",
        sql: include_str!("0001_object_store.sql"),
    },
    EngineStep {
        version: 2,
        name: "index_value_lookup",
        sql: include_str!("0002_index_lookup.sql"),
    },
];

/// Latest engine schema version this build can open.
pub fn latest_version() -> u32 {
    ENGINE_STEPS.last().map_or(0, |step| step.version)
}

/// Brings the engine tables of `conn` up to `latest_version`.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file was written by a newer build.
/// - `Sqlite` when a step fails; nothing from the batch is kept.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let on_disk = engine_version(conn)?;
    let latest = latest_version();
    if on_disk > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: on_disk,
            latest_supported: latest,
        });
    }

    let pending = ENGINE_STEPS
        .iter()
        .filter(|step| step.version > on_disk)
        .collect::<Vec<_>>();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in &pending {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
    }
    tx.commit()?;

    for step in pending {
        info!(
            "event=engine_migrate module=db status=ok version={} step={}",
            step.version, step.name
        );
    }
    Ok(())
}

fn engine_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))?)
}
