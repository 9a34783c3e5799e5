//! Persisted extension records and the `avatars` database layout.
//!
//! # Invariants
//! - Abstract records are keyed by the extension key alone.
//! - Image records are keyed by `(key, extensionKey)` and indexed by
//!   `extensionKey`.
//! - Image bytes live in the record attachment, never in the JSON tree.

use crate::store::{
    IndexDescriptor, KeyPath, Record, StoreDescriptor, StoreError, StoreKey, StoreResult,
};
use serde::{Deserialize, Serialize};

pub const AVATARS_DATABASE: &str = "avatars";
pub const AVATARS_SCHEMA_VERSION: u32 = 1;
pub const ABSTRACTS_STORE: &str = "abstracts";
pub const IMAGES_STORE: &str = "images";
pub const EXTENSION_KEY_INDEX: &str = "extensionKey";

/// Store declarations of the `avatars` database.
pub fn avatars_schema() -> Vec<StoreDescriptor> {
    vec![
        StoreDescriptor::new(ABSTRACTS_STORE, Some(KeyPath::field("key"))),
        StoreDescriptor::new(
            IMAGES_STORE,
            Some(KeyPath::compound(["key", "extensionKey"])),
        )
        .with_index(IndexDescriptor::new(
            EXTENSION_KEY_INDEX,
            KeyPath::field("extensionKey"),
        )),
    ]
}

/// Metadata of one ingested extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstractRecord {
    pub key: String,
    pub description: String,
    /// Manifest URL for downloaded extensions; absent for local imports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl AbstractRecord {
    pub fn to_record(&self) -> StoreResult<Record> {
        Ok(Record::new(to_tree(self)?))
    }

    pub fn from_record(record: Record) -> StoreResult<Self> {
        from_tree(record.value, ABSTRACTS_STORE)
    }
}

/// One stored image of an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Role of the image within the extension, e.g. `standard`.
    pub key: String,
    pub extension_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip)]
    pub blob: Vec<u8>,
}

impl ImageRecord {
    /// Primary key of the image `key` within extension `extension_key`.
    pub fn store_key(key: &str, extension_key: &str) -> StoreKey {
        StoreKey::compound([StoreKey::from(key), StoreKey::from(extension_key)])
    }

    pub fn to_record(&self) -> StoreResult<Record> {
        Ok(Record::with_attachment(to_tree(self)?, self.blob.clone()))
    }

    pub fn from_record(record: Record) -> StoreResult<Self> {
        let mut image: Self = from_tree(record.value, IMAGES_STORE)?;
        image.blob = record.attachment.unwrap_or_default();
        Ok(image)
    }
}

fn to_tree<T: Serialize>(value: &T) -> StoreResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|err| StoreError::InvalidData(err.to_string()))
}

fn from_tree<T: for<'de> Deserialize<'de>>(value: serde_json::Value, store: &str) -> StoreResult<T> {
    serde_json::from_value(value)
        .map_err(|_| StoreError::InvalidData(format!("record in store `{store}`")))
}
