//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate validation, fetching and object-store calls into the
//!   extension ingestion API.
//! - Keep CLI callers decoupled from storage and transport details.

pub mod extension_service;
pub mod ingest_state;

pub use extension_service::{
    ExtensionService, IngestError, IngestReport, IngestResult, SkipReason, SkippedAsset,
};
pub use ingest_state::{AssetState, IngestRun, IngestSource, IngestStage};
