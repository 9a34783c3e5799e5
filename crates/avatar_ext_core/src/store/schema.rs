//! Logical store schema: descriptors, name policy and version upgrades.
//!
//! # Responsibility
//! - Describe named stores, their key paths and secondary indexes.
//! - Allow-list store, index and database names before anything is opened.
//! - Run the one-time upgrade callback when a higher version is opened.
//!
//! # Invariants
//! - Upgrades run inside a single transaction together with the version bump.
//! - Opening the current version never touches the registry.
//! - Opening a lower version than persisted is rejected.

use super::key::KeyPath;
use super::{StoreError, StoreResult};
use crate::validation::is_reserved_key;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeMap;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid store name regex"));

/// Names the engine keeps for itself.
const ENGINE_RESERVED_NAMES: &[&str] = &["sqlite_master", "sqlite_sequence"];

/// Declaration of one named store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDescriptor {
    pub name: String,
    /// `None` means out-of-line keys: callers pass the key to `put`.
    pub key_path: Option<KeyPath>,
    pub indexes: Vec<IndexDescriptor>,
}

impl StoreDescriptor {
    pub fn new(name: impl Into<String>, key_path: Option<KeyPath>) -> Self {
        Self {
            name: name.into(),
            key_path,
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Validates the store name, index names and key-path field names.
    pub fn validate(&self) -> StoreResult<()> {
        validate_store_name(&self.name)?;
        if let Some(key_path) = &self.key_path {
            validate_key_path(key_path)?;
        }
        for index in &self.indexes {
            validate_store_name(&index.name)?;
            validate_key_path(&index.key_path)?;
        }
        Ok(())
    }
}

/// Declaration of one secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub key_path: KeyPath,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>, key_path: KeyPath) -> Self {
        Self {
            name: name.into(),
            key_path,
        }
    }
}

/// Applies the store/index/database name allow-list.
///
/// Accepted names are 1-64 chars of `[A-Za-z0-9_-]` and not reserved.
pub fn validate_store_name(name: &str) -> StoreResult<()> {
    if !NAME_RE.is_match(name)
        || is_reserved_key(name)
        || ENGINE_RESERVED_NAMES
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn validate_key_path(key_path: &KeyPath) -> StoreResult<()> {
    let fields = key_path.fields();
    if fields.is_empty() {
        return Err(StoreError::InvalidName(String::new()));
    }
    fields.into_iter().try_for_each(validate_store_name)
}

/// Handle passed to an upgrade callback.
///
/// Only valid while the upgrade transaction is open.
pub struct SchemaUpgrade<'tx> {
    tx: &'tx Transaction<'tx>,
    old_version: Option<u32>,
    new_version: u32,
}

impl SchemaUpgrade<'_> {
    /// Persisted version before this upgrade; `None` for a new database.
    pub fn old_version(&self) -> Option<u32> {
        self.old_version
    }

    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    /// Creates a store and its indexes; existing identical declarations are
    /// kept as-is.
    ///
    /// # Errors
    /// - `InvalidName` for names outside the allow-list.
    /// - `SchemaConflict` when the store exists with a different key path.
    pub fn create_store(&mut self, descriptor: &StoreDescriptor) -> StoreResult<()> {
        descriptor.validate()?;
        let key_path = encode_key_path(descriptor.key_path.as_ref());

        let existing: Option<String> = self
            .tx
            .query_row(
                "SELECT key_path FROM object_stores WHERE name = ?1;",
                [descriptor.name.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::engine_open)?;
        match existing {
            Some(persisted) if persisted != key_path => {
                return Err(StoreError::SchemaConflict(descriptor.name.clone()));
            }
            Some(_) => {}
            None => {
                self.tx
                    .execute(
                        "INSERT INTO object_stores (name, key_path) VALUES (?1, ?2);",
                        params![descriptor.name, key_path],
                    )
                    .map_err(StoreError::engine_open)?;
            }
        }

        for index in &descriptor.indexes {
            self.tx
                .execute(
                    "INSERT INTO object_indexes (store_name, name, key_path)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(store_name, name) DO UPDATE SET key_path = excluded.key_path;",
                    params![
                        descriptor.name,
                        index.name,
                        encode_key_path(Some(&index.key_path))
                    ],
                )
                .map_err(StoreError::engine_open)?;
        }
        Ok(())
    }
}

/// Brings the logical database `name` to `requested` (or keeps the current
/// version when `None`), running `upgrade` only when the version grows.
///
/// Returns the effective version.
pub(crate) fn upgrade_if_needed<F>(
    conn: &mut Connection,
    name: &str,
    requested: Option<u32>,
    upgrade: F,
) -> StoreResult<u32>
where
    F: FnOnce(&mut SchemaUpgrade<'_>) -> StoreResult<()>,
{
    let current = persisted_version(conn, name)?;
    let target = match (requested, current) {
        (Some(requested), _) => requested,
        (None, Some(current)) => current,
        (None, None) => 1,
    };
    if target == 0 {
        return Err(StoreError::InvalidVersion(target));
    }

    if let Some(current) = current {
        if target < current {
            return Err(StoreError::VersionDowngrade {
                requested: target,
                current,
            });
        }
        if target == current {
            return Ok(current);
        }
    }

    let tx = conn.transaction().map_err(StoreError::engine_open)?;
    {
        let mut handle = SchemaUpgrade {
            tx: &tx,
            old_version: current,
            new_version: target,
        };
        upgrade(&mut handle)?;
    }
    tx.execute(
        "INSERT INTO database_meta (name, version) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET version = excluded.version;",
        params![name, target],
    )
    .map_err(StoreError::engine_open)?;
    tx.commit().map_err(StoreError::engine_open)?;

    info!(
        "event=schema_upgrade module=store status=ok database={} from={} to={}",
        name,
        current.map_or_else(|| "none".to_string(), |v| v.to_string()),
        target
    );
    Ok(target)
}

/// Loads every registered store with its indexes.
pub(crate) fn load_registry(conn: &Connection) -> StoreResult<BTreeMap<String, StoreDescriptor>> {
    let mut registry = BTreeMap::new();

    let mut stmt = conn
        .prepare("SELECT name, key_path FROM object_stores ORDER BY name;")
        .map_err(StoreError::engine_open)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(StoreError::engine_open)?;
    for row in rows {
        let (name, key_path) = row.map_err(StoreError::engine_open)?;
        let key_path = decode_key_path(&key_path)
            .ok_or_else(|| StoreError::InvalidData(format!("store `{name}` key path")))?;
        registry.insert(name.clone(), StoreDescriptor::new(name, key_path));
    }

    let mut stmt = conn
        .prepare("SELECT store_name, name, key_path FROM object_indexes ORDER BY store_name, name;")
        .map_err(StoreError::engine_open)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(StoreError::engine_open)?;
    for row in rows {
        let (store_name, name, key_path) = row.map_err(StoreError::engine_open)?;
        let key_path = decode_key_path(&key_path)
            .flatten()
            .ok_or_else(|| StoreError::InvalidData(format!("index `{store_name}.{name}`")))?;
        if let Some(store) = registry.get_mut(&store_name) {
            store.indexes.push(IndexDescriptor::new(name, key_path));
        }
    }

    Ok(registry)
}

fn persisted_version(conn: &Connection, name: &str) -> StoreResult<Option<u32>> {
    conn.query_row(
        "SELECT version FROM database_meta WHERE name = ?1;",
        [name],
        |row| row.get::<_, u32>(0),
    )
    .optional()
    .map_err(StoreError::engine_open)
}

fn encode_key_path(key_path: Option<&KeyPath>) -> String {
    serde_json::to_string(&key_path).unwrap_or_else(|_| "null".to_string())
}

fn decode_key_path(encoded: &str) -> Option<Option<KeyPath>> {
    serde_json::from_str(encoded).ok()
}
