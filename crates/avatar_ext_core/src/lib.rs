//! Core logic for community avatar extensions.
//! This crate is the single source of truth for validation, storage and
//! ingestion invariants.

pub mod config;
pub mod db;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod rate_limit;
pub mod service;
pub mod store;
pub mod validation;

pub use config::IngestConfig;
pub use fetch::{AssetFetcher, FetchError, HttpFetcher};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::{AbstractRecord, ImageDescriptor, ImageRecord, LocalFile, Manifest};
pub use rate_limit::{RateLimitEntry, RateLimiter};
pub use service::{
    ExtensionService, IngestError, IngestReport, IngestResult, SkipReason, SkippedAsset,
};
pub use store::{
    HandleCache, KeyPath, ObjectStore, Record, StoreDescriptor, StoreError, StoreKey,
    StoreLocation, StoreResult,
};
pub use validation::ValidationResult;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
