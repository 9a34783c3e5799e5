//! SQLite-backed object store handle and per-record operations.

use super::key::StoreKey;
use super::schema::{
    load_registry, upgrade_if_needed, validate_store_name, SchemaUpgrade, StoreDescriptor,
};
use super::{StoreError, StoreOperation, StoreResult};
use crate::db::{open_db, open_db_in_memory};
use crate::validation::sanitize_object;
use log::{debug, error, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Where logical databases are kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreLocation {
    /// One `<name>.sqlite3` file per logical database inside this directory.
    Directory(PathBuf),
    /// Process-private in-memory databases.
    Memory,
}

impl StoreLocation {
    fn mode(&self) -> &'static str {
        match self {
            Self::Directory(_) => "file",
            Self::Memory => "memory",
        }
    }
}

/// One stored object: a JSON tree and an optional opaque attachment.
///
/// The attachment is never inspected or sanitized.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub value: Value,
    pub attachment: Option<Vec<u8>>,
}

impl Record {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            attachment: None,
        }
    }

    pub fn with_attachment(value: Value, attachment: Vec<u8>) -> Self {
        Self {
            value,
            attachment: Some(attachment),
        }
    }
}

/// Open handle to one logical database.
#[derive(Debug)]
pub struct ObjectStore {
    name: String,
    version: u32,
    conn: Mutex<Connection>,
    stores: BTreeMap<String, StoreDescriptor>,
}

impl ObjectStore {
    /// Opens database `name`, creating `stores` when `version` is new.
    ///
    /// # Errors
    /// - `InvalidName` when any database/store/index name is not allowed.
    /// - `VersionDowngrade` when `version` is below the persisted version.
    /// - `Operation(Open)` on engine failure.
    pub fn open(
        location: &StoreLocation,
        name: &str,
        stores: &[StoreDescriptor],
        version: Option<u32>,
    ) -> StoreResult<Self> {
        for descriptor in stores {
            descriptor.validate()?;
        }
        Self::open_with_upgrade(location, name, version, |upgrade| {
            stores
                .iter()
                .try_for_each(|descriptor| upgrade.create_store(descriptor))
        })
    }

    /// Opens database `name`, running `upgrade` once if `version` is higher
    /// than the persisted one (or the database is new).
    pub fn open_with_upgrade<F>(
        location: &StoreLocation,
        name: &str,
        version: Option<u32>,
        upgrade: F,
    ) -> StoreResult<Self>
    where
        F: FnOnce(&mut SchemaUpgrade<'_>) -> StoreResult<()>,
    {
        validate_store_name(name)?;
        let started_at = Instant::now();

        let opened = match location {
            StoreLocation::Directory(dir) => {
                std::fs::create_dir_all(dir)
                    .map_err(|err| StoreError::engine(StoreOperation::Open, name, err))?;
                open_db(dir.join(format!("{name}.sqlite3")))
            }
            StoreLocation::Memory => open_db_in_memory(),
        };
        let mut conn = opened.map_err(|err| StoreError::engine(StoreOperation::Open, name, err))?;

        let version = upgrade_if_needed(&mut conn, name, version, upgrade)?;
        let stores = load_registry(&conn)?;

        info!(
            "event=store_open module=store status=ok mode={} database={} version={} stores={} duration_ms={}",
            location.mode(),
            name,
            version,
            stores.len(),
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            name: name.to_string(),
            version,
            conn: Mutex::new(conn),
            stores,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Registered store names, sorted.
    pub fn store_names(&self) -> Vec<&str> {
        self.stores.keys().map(String::as_str).collect()
    }

    pub fn store(&self, name: &str) -> Option<&StoreDescriptor> {
        self.stores.get(name)
    }

    pub fn get(&self, store: &str, key: &StoreKey) -> StoreResult<Option<Record>> {
        self.descriptor(store)?;
        key.validate()?;

        let row = self
            .lock()
            .query_row(
                "SELECT value, attachment FROM records
                 WHERE store_name = ?1 AND primary_key = ?2;",
                params![store, key.encode()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<Vec<u8>>>(1)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| StoreError::engine(StoreOperation::Get, store, err))?;

        row.map(|(value, attachment)| decode_record(store, &value, attachment))
            .transpose()
    }

    /// Upserts `record` and returns its primary key.
    ///
    /// The record tree is sanitized first; the key comes from the store's
    /// key path, or from `key` for out-of-line stores.
    pub fn put(&self, store: &str, record: &Record, key: Option<&StoreKey>) -> StoreResult<StoreKey> {
        let descriptor = self.descriptor(store)?;
        let value = sanitize_object(&record.value)?;

        let primary_key = match (&descriptor.key_path, key) {
            (Some(path), None) => path.extract(&value).ok_or_else(|| {
                StoreError::InvalidKey(format!("record is missing key fields for store `{store}`"))
            })?,
            (Some(_), Some(_)) => {
                return Err(StoreError::InvalidKey(format!(
                    "store `{store}` uses inline keys; explicit key is not allowed"
                )));
            }
            (None, Some(key)) => key.clone(),
            (None, None) => {
                return Err(StoreError::InvalidKey(format!(
                    "store `{store}` uses out-of-line keys; a key is required"
                )));
            }
        };
        primary_key.validate()?;

        let index_entries = descriptor
            .indexes
            .iter()
            .filter_map(|index| {
                index
                    .key_path
                    .extract(&value)
                    .map(|index_value| (index.name.as_str(), index_value.encode()))
            })
            .collect::<Vec<_>>();

        let encoded_key = primary_key.encode();
        let payload = value.to_string();
        write_record(
            &mut self.lock(),
            store,
            &encoded_key,
            &payload,
            record.attachment.as_deref(),
            &index_entries,
        )
        .map_err(|err| StoreError::engine(StoreOperation::Put, store, err))?;

        debug!(
            "event=store_put module=store status=ok store={} indexes={} attachment_bytes={}",
            store,
            index_entries.len(),
            record.attachment.as_ref().map_or(0, Vec::len)
        );
        Ok(primary_key)
    }

    /// Deletes one record; deleting a missing key is a no-op.
    pub fn delete(&self, store: &str, key: &StoreKey) -> StoreResult<()> {
        self.descriptor(store)?;
        key.validate()?;

        // index_entries rows go with the record (ON DELETE CASCADE).
        self.lock()
            .execute(
                "DELETE FROM records WHERE store_name = ?1 AND primary_key = ?2;",
                params![store, key.encode()],
            )
            .map_err(|err| StoreError::engine(StoreOperation::Delete, store, err))?;
        Ok(())
    }

    /// Returns every record of `store`, ordered by encoded primary key.
    pub fn get_all(&self, store: &str) -> StoreResult<Vec<Record>> {
        self.descriptor(store)?;

        let rows = {
            let conn = self.lock();
            query_rows(
                &conn,
                "SELECT value, attachment FROM records
                 WHERE store_name = ?1
                 ORDER BY primary_key;",
                params![store],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<Vec<u8>>>(1)?,
                    ))
                },
            )
            .map_err(|err| StoreError::engine(StoreOperation::GetAll, store, err))?
        };

        rows.into_iter()
            .map(|(value, attachment)| decode_record(store, &value, attachment))
            .collect()
    }

    pub fn get_all_keys(&self, store: &str) -> StoreResult<Vec<StoreKey>> {
        self.descriptor(store)?;

        let encoded = {
            let conn = self.lock();
            query_rows(
                &conn,
                "SELECT primary_key FROM records
                 WHERE store_name = ?1
                 ORDER BY primary_key;",
                params![store],
                |row| row.get::<_, String>(0),
            )
            .map_err(|err| StoreError::engine(StoreOperation::GetAllKeys, store, err))?
        };
        decode_keys(store, encoded)
    }

    /// Primary keys of records whose `index` value equals `value`.
    pub fn get_all_keys_by_index(
        &self,
        store: &str,
        index: &str,
        value: &StoreKey,
    ) -> StoreResult<Vec<StoreKey>> {
        let descriptor = self.descriptor(store)?;
        if descriptor.index(index).is_none() {
            return Err(StoreError::UnknownIndex {
                store: store.to_string(),
                index: index.to_string(),
            });
        }
        value.validate()?;

        let encoded = {
            let conn = self.lock();
            query_rows(
                &conn,
                "SELECT primary_key FROM index_entries
                 WHERE store_name = ?1 AND index_name = ?2 AND index_value = ?3
                 ORDER BY primary_key;",
                params![store, index, value.encode()],
                |row| row.get::<_, String>(0),
            )
            .map_err(|err| StoreError::engine(StoreOperation::GetAllKeys, store, err))?
        };
        decode_keys(store, encoded)
    }

    pub fn clear(&self, store: &str) -> StoreResult<()> {
        self.descriptor(store)?;

        let removed = self
            .lock()
            .execute("DELETE FROM records WHERE store_name = ?1;", params![store])
            .map_err(|err| StoreError::engine(StoreOperation::Clear, store, err))?;
        info!(
            "event=store_clear module=store status=ok store={} removed={}",
            store, removed
        );
        Ok(())
    }

    /// Deletes every record whose `index` value equals `value`.
    ///
    /// Keys are read first and deleted one by one, each in its own
    /// transaction; a failure part-way leaves the earlier deletions applied.
    /// Re-running is safe. Returns the number of deleted records.
    pub fn clear_by_index(&self, store: &str, index: &str, value: &StoreKey) -> StoreResult<usize> {
        let keys = self.get_all_keys_by_index(store, index, value)?;
        for (deleted, key) in keys.iter().enumerate() {
            if let Err(err) = self.delete(store, key) {
                warn!(
                    "event=store_clear_by_index module=store status=error store={} index={} deleted={} remaining={}",
                    store,
                    index,
                    deleted,
                    keys.len() - deleted
                );
                return Err(match err {
                    StoreError::Operation(_) => StoreError::Operation(StoreOperation::ClearByIndex),
                    other => other,
                });
            }
        }
        debug!(
            "event=store_clear_by_index module=store status=ok store={} index={} deleted={}",
            store,
            index,
            keys.len()
        );
        Ok(keys.len())
    }

    pub fn count(&self, store: &str) -> StoreResult<u64> {
        self.descriptor(store)?;

        self.lock()
            .query_row(
                "SELECT COUNT(*) FROM records WHERE store_name = ?1;",
                params![store],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| u64::try_from(count).unwrap_or_default())
            .map_err(|err| StoreError::engine(StoreOperation::Count, store, err))
    }

    fn descriptor(&self, store: &str) -> StoreResult<&StoreDescriptor> {
        self.stores
            .get(store)
            .ok_or_else(|| StoreError::UnknownStore(store.to_string()))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_record(
    conn: &mut Connection,
    store: &str,
    key: &str,
    payload: &str,
    attachment: Option<&[u8]>,
    index_entries: &[(&str, String)],
) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO records (store_name, primary_key, value, attachment)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(store_name, primary_key) DO UPDATE SET
            value = excluded.value,
            attachment = excluded.attachment,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![store, key, payload, attachment],
    )?;
    tx.execute(
        "DELETE FROM index_entries WHERE store_name = ?1 AND primary_key = ?2;",
        params![store, key],
    )?;
    for (index_name, index_value) in index_entries {
        tx.execute(
            "INSERT INTO index_entries (store_name, index_name, index_value, primary_key)
             VALUES (?1, ?2, ?3, ?4);",
            params![store, index_name, index_value, key],
        )?;
    }
    tx.commit()
}

fn query_rows<T, F>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    map: F,
) -> rusqlite::Result<Vec<T>>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    rows.collect()
}

fn decode_record(store: &str, value: &str, attachment: Option<Vec<u8>>) -> StoreResult<Record> {
    let value = serde_json::from_str(value).map_err(|err| {
        error!(
            "event=store_decode module=store status=error store={} error={}",
            store, err
        );
        StoreError::InvalidData(format!("record in store `{store}`"))
    })?;
    Ok(Record { value, attachment })
}

fn decode_keys(store: &str, encoded: Vec<String>) -> StoreResult<Vec<StoreKey>> {
    encoded
        .iter()
        .map(|raw| {
            StoreKey::decode(raw)
                .ok_or_else(|| StoreError::InvalidData(format!("key in store `{store}`")))
        })
        .collect()
}
