//! Extension ingestion use-case service.
//!
//! # Responsibility
//! - Ingest extensions from a manifest URL or from local manifest/image files.
//! - Expose stored abstracts and images, and delete whole extensions.
//!
//! # Invariants
//! - Manifest-level validation, resource-limit and storage failures abort
//!   the run before any image is written.
//! - A failing asset is skipped and reported; it never fails the run.
//! - Old images of an extension are cleared before its abstract and new
//!   images are written. Re-running an ingestion is the recovery path for a
//!   run interrupted between those steps.
//! - At most `IngestConfig::max_in_flight_assets` assets resolve at once.

use super::ingest_state::{AssetState, IngestRun, IngestSource, IngestStage};
use crate::config::IngestConfig;
use crate::fetch::{AssetFetcher, FetchError};
use crate::logging::sanitize_for_log;
use crate::model::{
    avatars_schema, AbstractRecord, ImageDescriptor, ImageRecord, LocalFile, LocalImage, Manifest,
    UrlImage, ABSTRACTS_STORE, AVATARS_DATABASE, AVATARS_SCHEMA_VERSION, EXTENSION_KEY_INDEX,
    IMAGES_STORE,
};
use crate::rate_limit::RateLimiter;
use crate::store::{HandleCache, ObjectStore, StoreError, StoreKey};
use crate::validation::{
    decode_entities, mime_for_file_name, validate_file, validate_manifest,
    validate_url_str, SanitizeError, ValidationResult,
};
use futures::stream::{self, StreamExt};
use log::{info, warn};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

const JSON_MIME_TYPE: &str = "application/json";

pub type IngestResult<T> = Result<T, IngestError>;

/// Caller-facing ingestion failure.
///
/// Messages never carry engine text, file paths or response bodies.
#[derive(Debug)]
pub enum IngestError {
    /// Malformed or unsafe input.
    Validation(Vec<String>),
    /// Oversized or too deeply nested payload.
    ResourceLimit(String),
    /// The manifest URL was throttled.
    RateLimited,
    /// The manifest source could not be reached or read.
    ManifestUnavailable(String),
    /// Object store failure.
    Storage(StoreError),
}

impl IngestError {
    /// Short stable name used in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ResourceLimit(_) => "resource_limit",
            Self::RateLimited => "rate_limited",
            Self::ManifestUnavailable(_) => "manifest_unavailable",
            Self::Storage(_) => "storage",
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }
}

impl Display for IngestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(errors) => write!(f, "validation failed: {}", errors.join("; ")),
            Self::ResourceLimit(message) => write!(f, "resource limit exceeded: {message}"),
            Self::RateLimited => write!(f, "too many requests; try again later"),
            Self::ManifestUnavailable(message) => write!(f, "manifest unavailable: {message}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SanitizeError> for IngestError {
    fn from(value: SanitizeError) -> Self {
        match value {
            SanitizeError::UnsafeString { errors } => Self::Validation(errors),
            other => Self::ResourceLimit(other.to_string()),
        }
    }
}

impl From<StoreError> for IngestError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Sanitize(err) => err.into(),
            StoreError::InvalidKey(reason) => Self::Validation(vec![reason]),
            other => Self::Storage(other),
        }
    }
}

/// Why one asset was not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    InvalidUrl(Vec<String>),
    RateLimited,
    Fetch(FetchError),
    TooLarge { limit: u64 },
    MissingFile,
    InvalidFile(Vec<String>),
    /// Store rejected or failed the write; detail was logged.
    Storage(String),
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUrl(errors) => write!(f, "invalid url: {}", errors.join("; ")),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Fetch(err) => write!(f, "fetch failed: {err}"),
            Self::TooLarge { limit } => write!(f, "asset exceeds {limit} bytes"),
            Self::MissingFile => write!(f, "no matching file provided"),
            Self::InvalidFile(errors) => write!(f, "invalid file: {}", errors.join("; ")),
            Self::Storage(message) => write!(f, "storage failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedAsset {
    pub image_key: String,
    pub reason: SkipReason,
}

/// Outcome of one successful ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub extension_key: String,
    /// Image keys written, in completion order.
    pub stored: Vec<String>,
    pub skipped: Vec<SkippedAsset>,
}

/// Ingestion pipeline over the `avatars` database.
pub struct ExtensionService<F: AssetFetcher> {
    store: Arc<ObjectStore>,
    fetcher: F,
    limiter: RateLimiter,
    config: IngestConfig,
}

impl<F: AssetFetcher> ExtensionService<F> {
    /// Creates a service over an already opened `avatars` handle.
    pub fn new(store: Arc<ObjectStore>, fetcher: F, config: IngestConfig) -> Self {
        Self {
            store,
            fetcher,
            limiter: RateLimiter::new(),
            config,
        }
    }

    /// Opens (creating if needed) the `avatars` database through `cache`.
    pub fn open(cache: &HandleCache, fetcher: F, config: IngestConfig) -> IngestResult<Self> {
        let store = cache.open(AVATARS_DATABASE, &avatars_schema(), AVATARS_SCHEMA_VERSION)?;
        Ok(Self::new(store, fetcher, config))
    }

    /// Replaces the service's rate limiter.
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Downloads the manifest at `url` and ingests it with its URL images.
    ///
    /// # Errors
    /// - `Validation` for a bad URL or manifest.
    /// - `RateLimited` when `url` exhausted its window budget.
    /// - `ManifestUnavailable` when the manifest cannot be fetched.
    /// - `ResourceLimit` / `Storage` per the manifest-level policy.
    pub async fn download_from_url(&self, url: &str) -> IngestResult<IngestReport> {
        let run = IngestRun::start(IngestSource::Url);
        let result = self.download(&run, url).await;
        finish(&run, &result);
        result
    }

    /// Ingests each manifest file in order, matching `LocalImage` entries
    /// against `image_files` by exact name.
    ///
    /// Every manifest is read and validated before anything is written.
    pub async fn import_from_files(
        &self,
        manifest_files: &[LocalFile],
        image_files: &[LocalFile],
    ) -> IngestResult<Vec<IngestReport>> {
        if manifest_files.is_empty() {
            return Err(IngestError::validation("At least one manifest file is required"));
        }

        let mut prepared: Vec<(IngestRun, Manifest)> = Vec::with_capacity(manifest_files.len());
        for file in manifest_files {
            let run = IngestRun::start(IngestSource::Files);
            match read_manifest_file(&run, file) {
                Ok(manifest) => prepared.push((run, manifest)),
                Err(err) => {
                    run.reject(&err);
                    for (earlier, _) in &prepared {
                        earlier.reject(&err);
                    }
                    return Err(err);
                }
            }
        }

        let mut reports = Vec::with_capacity(prepared.len());
        for (run, manifest) in prepared {
            let result = self.resolve(&run, manifest, None, image_files).await;
            finish(&run, &result);
            reports.push(result?);
        }
        Ok(reports)
    }

    /// Every stored extension abstract, ordered by key.
    pub async fn get_abstracts(&self) -> IngestResult<Vec<AbstractRecord>> {
        let records = self.store.get_all(ABSTRACTS_STORE)?;
        Ok(records
            .into_iter()
            .map(AbstractRecord::from_record)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// The image `image_key` of extension `extension_key`, if stored.
    pub async fn get_image(
        &self,
        extension_key: &str,
        image_key: &str,
    ) -> IngestResult<Option<ImageRecord>> {
        // Keys are stored verbatim; validation rejects any key sanitizing would alter.
        let key = ImageRecord::store_key(image_key, extension_key);
        self.store
            .get(IMAGES_STORE, &key)?
            .map(ImageRecord::from_record)
            .transpose()
            .map_err(IngestError::from)
    }

    /// Deletes every image of `extension_key`, then its abstract.
    ///
    /// The abstract deletion is attempted even when clearing images fails;
    /// the first failure is returned. Deleting an unknown key is a no-op.
    pub async fn delete(&self, extension_key: &str) -> IngestResult<()> {
        let key = StoreKey::from(extension_key);
        let cleared = self
            .store
            .clear_by_index(IMAGES_STORE, EXTENSION_KEY_INDEX, &key);
        if let Err(err) = &cleared {
            warn!(
                "event=extension_delete module=service status=error step=clear_images extension={} error={}",
                sanitize_for_log(extension_key),
                err
            );
        }
        let removed = self.store.delete(ABSTRACTS_STORE, &key);

        let images = cleared?;
        removed?;
        info!(
            "event=extension_delete module=service status=ok extension={} images={}",
            sanitize_for_log(extension_key),
            images
        );
        Ok(())
    }

    async fn download(&self, run: &IngestRun, url: &str) -> IngestResult<IngestReport> {
        let url = match validate_url_str(url) {
            ValidationResult::Valid(url) => url,
            ValidationResult::Invalid(errors) => return Err(IngestError::Validation(errors)),
        };
        if !self.limiter.check_and_consume(
            &url,
            self.config.manifest_rate_limit,
            self.config.rate_window,
        ) {
            return Err(IngestError::RateLimited);
        }

        let body = self
            .fetcher
            .fetch(&url, self.config.max_asset_bytes)
            .await
            .map_err(|err| match err {
                FetchError::TooLarge { limit } => {
                    IngestError::ResourceLimit(format!("manifest exceeds {limit} bytes"))
                }
                other => IngestError::ManifestUnavailable(other.to_string()),
            })?;

        run.advance(IngestStage::ValidatingManifest);
        let tree: Value = serde_json::from_slice(&body)
            .map_err(|_| IngestError::validation("Manifest is not valid JSON"))?;
        let manifest = checked_manifest(&tree)?;
        drop(tree);

        self.resolve(run, manifest, Some(url), &[]).await
    }

    async fn resolve(
        &self,
        run: &IngestRun,
        manifest: Manifest,
        source: Option<String>,
        files: &[LocalFile],
    ) -> IngestResult<IngestReport> {
        run.advance(IngestStage::ClearingOldAssets);
        let extension_key = StoreKey::from(manifest.key.as_str());
        let cleared = self
            .store
            .clear_by_index(IMAGES_STORE, EXTENSION_KEY_INDEX, &extension_key)?;

        run.advance(IngestStage::WritingAbstract);
        let abstract_record = AbstractRecord {
            key: manifest.key.clone(),
            description: manifest.description.clone(),
            source,
        };
        self.store
            .put(ABSTRACTS_STORE, &abstract_record.to_record()?, None)?;

        run.advance(IngestStage::ResolvingAssets);
        info!(
            "event=ingest_assets module=service status=start run_id={} extension={} cleared={} declared={}",
            run.run_id(),
            sanitize_for_log(&manifest.key),
            cleared,
            manifest.images.len()
        );
        let outcomes = stream::iter(
            manifest
                .images
                .iter()
                .map(|image| self.resolve_asset(run, &manifest.key, image, files)),
        )
        .buffer_unordered(self.config.max_in_flight_assets.max(1))
        .collect::<Vec<_>>()
        .await;

        let mut report = IngestReport {
            run_id: run.run_id(),
            extension_key: manifest.key,
            stored: Vec::new(),
            skipped: Vec::new(),
        };
        for outcome in outcomes {
            match outcome {
                Ok(image_key) => report.stored.push(image_key),
                Err(skipped) => report.skipped.push(skipped),
            }
        }
        Ok(report)
    }

    async fn resolve_asset(
        &self,
        run: &IngestRun,
        extension_key: &str,
        image: &ImageDescriptor,
        files: &[LocalFile],
    ) -> Result<String, SkippedAsset> {
        match image {
            ImageDescriptor::Url(image) => self.resolve_url_asset(run, extension_key, image).await,
            ImageDescriptor::Local(image) => self.resolve_local_asset(run, extension_key, image, files),
        }
    }

    async fn resolve_url_asset(
        &self,
        run: &IngestRun,
        extension_key: &str,
        image: &UrlImage,
    ) -> Result<String, SkippedAsset> {
        let mut progress = run.asset(&image.key);

        let url = match validate_url_str(&decode_entities(&image.source_url)) {
            ValidationResult::Valid(url) => url,
            ValidationResult::Invalid(errors) => {
                return Err(progress.skip(SkipReason::InvalidUrl(errors)))
            }
        };
        if !self.limiter.check_and_consume(
            &url,
            self.config.asset_rate_limit,
            self.config.rate_window,
        ) {
            return Err(progress.skip(SkipReason::RateLimited));
        }

        progress.advance(AssetState::Fetching);
        let limit = self.config.max_asset_bytes;
        let blob = match self.fetcher.fetch(&url, limit).await {
            Ok(blob) => blob,
            Err(FetchError::TooLarge { limit }) => {
                return Err(progress.skip(SkipReason::TooLarge { limit }))
            }
            Err(err) => return Err(progress.skip(SkipReason::Fetch(err))),
        };

        progress.advance(AssetState::Validating);
        if u64::try_from(blob.len()).unwrap_or(u64::MAX) > limit {
            return Err(progress.skip(SkipReason::TooLarge { limit }));
        }

        let record = ImageRecord {
            key: image.key.clone(),
            extension_key: extension_key.to_string(),
            source_url: Some(image.source_url.clone()),
            blob,
        };
        match self.write_image(&record) {
            Ok(()) => Ok(progress.stored()),
            Err(reason) => Err(progress.skip(reason)),
        }
    }

    fn resolve_local_asset(
        &self,
        run: &IngestRun,
        extension_key: &str,
        image: &LocalImage,
        files: &[LocalFile],
    ) -> Result<String, SkippedAsset> {
        let mut progress = run.asset(&image.key);

        let file_name = decode_entities(&image.file_name);
        let Some(file) = files.iter().find(|file| file.name == file_name) else {
            return Err(progress.skip(SkipReason::MissingFile));
        };

        progress.advance(AssetState::Reading);
        progress.advance(AssetState::Validating);
        if let ValidationResult::Invalid(errors) = validate_file(file) {
            return Err(progress.skip(SkipReason::InvalidFile(errors)));
        }
        if !mime_for_file_name(&file.name).is_some_and(|mime| mime.starts_with("image/")) {
            return Err(progress.skip(SkipReason::InvalidFile(vec![
                "File must be an image".to_string()
            ])));
        }
        let limit = self.config.max_asset_bytes;
        if file.size > limit {
            return Err(progress.skip(SkipReason::TooLarge { limit }));
        }

        let record = ImageRecord {
            key: image.key.clone(),
            extension_key: extension_key.to_string(),
            source_url: None,
            blob: file.bytes().to_vec(),
        };
        match self.write_image(&record) {
            Ok(()) => Ok(progress.stored()),
            Err(reason) => Err(progress.skip(reason)),
        }
    }

    fn write_image(&self, record: &ImageRecord) -> Result<(), SkipReason> {
        let stored = record
            .to_record()
            .and_then(|payload| self.store.put(IMAGES_STORE, &payload, None));
        stored
            .map(|_| ())
            .map_err(|err| SkipReason::Storage(err.to_string()))
    }
}

fn finish(run: &IngestRun, result: &IngestResult<IngestReport>) {
    match result {
        Ok(report) => run.complete(report),
        Err(err) => run.reject(err),
    }
}

fn read_manifest_file(run: &IngestRun, file: &LocalFile) -> IngestResult<Manifest> {
    if let ValidationResult::Invalid(errors) = validate_file(file) {
        return Err(IngestError::Validation(errors));
    }
    if mime_for_file_name(&file.name) != Some(JSON_MIME_TYPE) {
        return Err(IngestError::validation("Manifest file must be a JSON file"));
    }

    run.advance(IngestStage::ValidatingManifest);
    let tree: Value = serde_json::from_slice(file.bytes())
        .map_err(|_| IngestError::validation("Manifest file is not valid JSON"))?;
    checked_manifest(&tree)
}

fn checked_manifest(tree: &Value) -> IngestResult<Manifest> {
    match validate_manifest(tree)? {
        ValidationResult::Valid(manifest) => Ok(manifest),
        ValidationResult::Invalid(errors) => Err(IngestError::Validation(errors)),
    }
}
