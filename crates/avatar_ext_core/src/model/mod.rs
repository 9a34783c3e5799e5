//! Typed domain model for extension ingestion.
//!
//! # Responsibility
//! - Define the manifest shape accepted from untrusted sources.
//! - Define the closed record types persisted in the `avatars` database.
//!
//! # Invariants
//! - Typed values are built only from validated, sanitized trees.
//! - Records are closed structs; open JSON maps never outlive validation.

pub mod file;
pub mod manifest;
pub mod records;

pub use file::LocalFile;
pub use manifest::{ImageDescriptor, LocalImage, Manifest, UrlImage};
pub use records::{
    avatars_schema, AbstractRecord, ImageRecord, ABSTRACTS_STORE, AVATARS_DATABASE,
    AVATARS_SCHEMA_VERSION, EXTENSION_KEY_INDEX, IMAGES_STORE,
};
