use async_trait::async_trait;
use avatar_ext_core::fetch::{AssetFetcher, FetchError};
use avatar_ext_core::model::{
    AbstractRecord, LocalFile, ABSTRACTS_STORE, AVATARS_DATABASE, IMAGES_STORE,
};
use avatar_ext_core::service::{ExtensionService, IngestError, SkipReason};
use avatar_ext_core::store::{
    HandleCache, KeyPath, ObjectStore, StoreDescriptor, StoreError, StoreLocation,
};
use avatar_ext_core::IngestConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const MANIFEST_URL: &str = "https://ext.test/knights.json";
const KNIGHT_PNG: &str = "https://cdn.test/knight.png";
const SQUIRE_PNG: &str = "https://cdn.test/squire.png";
const MISSING_PNG: &str = "https://cdn.test/missing.png";

/// Serves canned bodies; unknown URLs answer 404.
#[derive(Clone, Default)]
struct StaticFetcher {
    bodies: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl StaticFetcher {
    fn serve(&self, url: &str, body: impl Into<Vec<u8>>) -> &Self {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.into());
        self
    }

    fn serve_json(&self, url: &str, body: Value) -> &Self {
        self.serve(url, body.to_string())
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetFetcher for StaticFetcher {
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let body = self.bodies.lock().unwrap().get(url).cloned();
        match body {
            Some(body) if body.len() as u64 > max_bytes => {
                Err(FetchError::TooLarge { limit: max_bytes })
            }
            Some(body) => Ok(body),
            None => Err(FetchError::Status(404)),
        }
    }
}

fn service_with(
    fetcher: &StaticFetcher,
    config: IngestConfig,
) -> ExtensionService<StaticFetcher> {
    let cache = HandleCache::new(StoreLocation::Memory);
    ExtensionService::open(&cache, fetcher.clone(), config).unwrap()
}

fn service(fetcher: &StaticFetcher) -> ExtensionService<StaticFetcher> {
    service_with(fetcher, IngestConfig::default())
}

fn url_manifest(key: &str, images: &[(&str, &str)]) -> Value {
    let images = images
        .iter()
        .map(|(image_key, url)| json!({ "key": image_key, "sourceUrl": url }))
        .collect::<Vec<_>>();
    json!({ "key": key, "description": "Pixel knights", "images": images })
}

fn png(name: &str, bytes: &[u8]) -> LocalFile {
    LocalFile::new(name, "image/png", bytes.to_vec())
}

fn manifest_file(name: &str, manifest: &Value) -> LocalFile {
    LocalFile::new(name, "application/json", manifest.to_string().into_bytes())
}

#[tokio::test]
async fn one_unreachable_image_is_skipped_not_fatal() {
    let fetcher = StaticFetcher::default();
    fetcher
        .serve_json(
            MANIFEST_URL,
            url_manifest("knights", &[("standard", KNIGHT_PNG), ("wounded", MISSING_PNG)]),
        )
        .serve(KNIGHT_PNG, vec![1, 2, 3]);
    let service = service(&fetcher);

    let report = service.download_from_url(MANIFEST_URL).await.unwrap();

    assert_eq!(report.extension_key, "knights");
    assert_eq!(report.stored, ["standard"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].image_key, "wounded");
    assert_eq!(
        report.skipped[0].reason,
        SkipReason::Fetch(FetchError::Status(404))
    );

    let abstracts = service.get_abstracts().await.unwrap();
    assert_eq!(abstracts.len(), 1);
    assert_eq!(abstracts[0].key, "knights");
    assert_eq!(abstracts[0].source.as_deref(), Some(MANIFEST_URL));
    assert_eq!(service.store().count(IMAGES_STORE).unwrap(), 1);

    let image = service.get_image("knights", "standard").await.unwrap().unwrap();
    assert_eq!(image.blob, vec![1, 2, 3]);
    assert_eq!(image.source_url.as_deref(), Some(KNIGHT_PNG));
    assert!(service.get_image("knights", "wounded").await.unwrap().is_none());
}

#[tokio::test]
async fn script_key_is_rejected_before_any_write() {
    let fetcher = StaticFetcher::default();
    fetcher.serve_json(
        MANIFEST_URL,
        url_manifest("<script>alert(1)</script>", &[("standard", KNIGHT_PNG)]),
    );
    let service = service(&fetcher);

    let err = service.download_from_url(MANIFEST_URL).await.unwrap_err();

    assert!(matches!(err, IngestError::Validation(_)));
    assert_eq!(service.store().count(ABSTRACTS_STORE).unwrap(), 0);
    assert_eq!(service.store().count(IMAGES_STORE).unwrap(), 0);
    assert_eq!(fetcher.calls(), [MANIFEST_URL]);
}

#[tokio::test]
async fn reingest_replaces_all_prior_images() {
    let fetcher = StaticFetcher::default();
    fetcher
        .serve_json(
            MANIFEST_URL,
            url_manifest("knights", &[("standard", KNIGHT_PNG), ("wounded", SQUIRE_PNG)]),
        )
        .serve(KNIGHT_PNG, vec![1])
        .serve(SQUIRE_PNG, vec![2]);
    let service = service(&fetcher);
    service.download_from_url(MANIFEST_URL).await.unwrap();
    assert_eq!(service.store().count(IMAGES_STORE).unwrap(), 2);

    fetcher.serve_json(
        MANIFEST_URL,
        url_manifest("knights", &[("victory", SQUIRE_PNG)]),
    );
    let report = service.download_from_url(MANIFEST_URL).await.unwrap();

    assert_eq!(report.stored, ["victory"]);
    assert_eq!(service.store().count(IMAGES_STORE).unwrap(), 1);
    assert!(service.get_image("knights", "standard").await.unwrap().is_none());
    assert!(service.get_image("knights", "wounded").await.unwrap().is_none());
    assert_eq!(
        service
            .get_image("knights", "victory")
            .await
            .unwrap()
            .unwrap()
            .blob,
        vec![2]
    );
}

#[tokio::test]
async fn reingest_leaves_other_extensions_alone() {
    let fetcher = StaticFetcher::default();
    let other_url = "https://ext.test/dogs.json";
    fetcher
        .serve_json(MANIFEST_URL, url_manifest("knights", &[("standard", KNIGHT_PNG)]))
        .serve_json(other_url, url_manifest("dogs", &[("standard", KNIGHT_PNG)]))
        .serve(KNIGHT_PNG, vec![9]);
    let service = service(&fetcher);

    service.download_from_url(MANIFEST_URL).await.unwrap();
    service.download_from_url(other_url).await.unwrap();
    service.download_from_url(MANIFEST_URL).await.unwrap();

    assert!(service.get_image("dogs", "standard").await.unwrap().is_some());
    assert_eq!(service.store().count(IMAGES_STORE).unwrap(), 2);
}

#[tokio::test]
async fn deleting_unknown_key_is_a_noop() {
    let fetcher = StaticFetcher::default();
    fetcher
        .serve_json(MANIFEST_URL, url_manifest("knights", &[("standard", KNIGHT_PNG)]))
        .serve(KNIGHT_PNG, vec![1]);
    let service = service(&fetcher);
    service.download_from_url(MANIFEST_URL).await.unwrap();

    service.delete("never-ingested").await.unwrap();

    assert_eq!(service.store().count(ABSTRACTS_STORE).unwrap(), 1);
    assert_eq!(service.store().count(IMAGES_STORE).unwrap(), 1);
}

#[tokio::test]
async fn delete_removes_abstract_and_images() {
    let fetcher = StaticFetcher::default();
    fetcher
        .serve_json(
            MANIFEST_URL,
            url_manifest("knights", &[("standard", KNIGHT_PNG), ("wounded", SQUIRE_PNG)]),
        )
        .serve(KNIGHT_PNG, vec![1])
        .serve(SQUIRE_PNG, vec![2]);
    let service = service(&fetcher);
    service.download_from_url(MANIFEST_URL).await.unwrap();

    service.delete("knights").await.unwrap();

    assert!(service.get_abstracts().await.unwrap().is_empty());
    assert_eq!(service.store().count(IMAGES_STORE).unwrap(), 0);
}

#[tokio::test]
async fn abstract_is_deleted_even_when_clearing_images_fails() {
    // An images store without its extension index makes the clear step fail.
    let stores = [
        StoreDescriptor::new(ABSTRACTS_STORE, Some(KeyPath::field("key"))),
        StoreDescriptor::new(IMAGES_STORE, Some(KeyPath::compound(["key", "extensionKey"]))),
    ];
    let handle =
        ObjectStore::open(&StoreLocation::Memory, AVATARS_DATABASE, &stores, Some(1)).unwrap();
    let service = ExtensionService::new(
        Arc::new(handle),
        StaticFetcher::default(),
        IngestConfig::default(),
    );
    let knights = AbstractRecord {
        key: "knights".to_string(),
        description: "Pixel knights".to_string(),
        source: None,
    };
    service
        .store()
        .put(ABSTRACTS_STORE, &knights.to_record().unwrap(), None)
        .unwrap();

    let err = service.delete("knights").await.unwrap_err();

    assert!(matches!(
        err,
        IngestError::Storage(StoreError::UnknownIndex { .. })
    ));
    assert!(service.get_abstracts().await.unwrap().is_empty());
}

#[tokio::test]
async fn keys_altered_by_sanitizing_never_reach_another_extension() {
    let cats = json!({
        "key": "cats",
        "description": "A",
        "images": [{ "key": "standard", "fileName": "cat.png" }]
    });
    let impostor = json!({ "key": "javascript:cats", "description": "B" });
    let service = service(&StaticFetcher::default());
    service
        .import_from_files(&[manifest_file("cats.json", &cats)], &[png("cat.png", &[1])])
        .await
        .unwrap();

    let err = service
        .import_from_files(&[manifest_file("impostor.json", &impostor)], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Validation(_)));

    service.delete("javascript:cats").await.unwrap();
    assert!(service
        .get_image("javascript:cats", "standard")
        .await
        .unwrap()
        .is_none());

    let abstracts = service.get_abstracts().await.unwrap();
    assert_eq!(abstracts.len(), 1);
    assert_eq!(abstracts[0].key, "cats");
    assert_eq!(abstracts[0].description, "A");
    assert!(service.get_image("cats", "standard").await.unwrap().is_some());
}

#[tokio::test]
async fn unreachable_manifest_is_fatal() {
    let fetcher = StaticFetcher::default();
    let service = service(&fetcher);

    let err = service.download_from_url(MANIFEST_URL).await.unwrap_err();

    assert!(matches!(err, IngestError::ManifestUnavailable(_)));
    assert_eq!(err.to_string(), "manifest unavailable: server responded with status 404");
}

#[tokio::test]
async fn unsafe_manifest_url_is_never_fetched() {
    let fetcher = StaticFetcher::default();
    let service = service(&fetcher);

    for url in ["http://localhost/m.json", "ftp://ext.test/m.json", ""] {
        let err = service.download_from_url(url).await.unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)), "{url}");
    }
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn manifest_fetches_are_rate_limited_per_url() {
    let fetcher = StaticFetcher::default();
    fetcher.serve_json(MANIFEST_URL, url_manifest("knights", &[]));
    let config = IngestConfig {
        manifest_rate_limit: 2,
        ..IngestConfig::default()
    };
    let service = service_with(&fetcher, config);

    service.download_from_url(MANIFEST_URL).await.unwrap();
    service.download_from_url(MANIFEST_URL).await.unwrap();
    let err = service.download_from_url(MANIFEST_URL).await.unwrap_err();

    assert!(matches!(err, IngestError::RateLimited));
    assert_eq!(fetcher.calls().len(), 2);
}

#[tokio::test]
async fn asset_rate_limit_skips_only_the_throttled_asset() {
    let fetcher = StaticFetcher::default();
    fetcher
        .serve_json(
            MANIFEST_URL,
            url_manifest(
                "knights",
                &[("standard", KNIGHT_PNG), ("copy", KNIGHT_PNG), ("squire", SQUIRE_PNG)],
            ),
        )
        .serve(KNIGHT_PNG, vec![1])
        .serve(SQUIRE_PNG, vec![2]);
    let config = IngestConfig {
        asset_rate_limit: 1,
        ..IngestConfig::default()
    };
    let service = service_with(&fetcher, config);

    let report = service.download_from_url(MANIFEST_URL).await.unwrap();

    assert_eq!(report.stored.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].reason, SkipReason::RateLimited);
}

#[tokio::test]
async fn oversized_assets_are_skipped() {
    let fetcher = StaticFetcher::default();
    fetcher
        .serve_json(
            MANIFEST_URL,
            url_manifest("knights", &[("huge", KNIGHT_PNG), ("small", SQUIRE_PNG)]),
        )
        .serve(KNIGHT_PNG, vec![0; 4_096])
        .serve(SQUIRE_PNG, vec![1; 16]);
    let config = IngestConfig {
        max_asset_bytes: 2_048,
        ..IngestConfig::default()
    };
    let service = service_with(&fetcher, config);

    let report = service.download_from_url(MANIFEST_URL).await.unwrap();

    assert_eq!(report.stored, ["small"]);
    assert_eq!(
        report.skipped[0].reason,
        SkipReason::TooLarge { limit: 2_048 }
    );
}

#[tokio::test]
async fn oversized_manifest_is_a_resource_limit() {
    let fetcher = StaticFetcher::default();
    fetcher.serve(MANIFEST_URL, vec![b' '; 4_096]);
    let config = IngestConfig {
        max_asset_bytes: 1_024,
        ..IngestConfig::default()
    };
    let service = service_with(&fetcher, config);

    let err = service.download_from_url(MANIFEST_URL).await.unwrap_err();
    assert!(matches!(err, IngestError::ResourceLimit(_)));
}

#[tokio::test]
async fn deeply_nested_manifest_is_a_resource_limit() {
    let mut deep = json!("leaf");
    for _ in 0..12 {
        deep = json!({ "n": deep });
    }
    let mut manifest = url_manifest("knights", &[]);
    manifest["extra"] = deep;
    let fetcher = StaticFetcher::default();
    fetcher.serve_json(MANIFEST_URL, manifest);
    let service = service(&fetcher);

    let err = service.download_from_url(MANIFEST_URL).await.unwrap_err();

    assert!(matches!(err, IngestError::ResourceLimit(_)));
    assert_eq!(service.store().count(ABSTRACTS_STORE).unwrap(), 0);
}

#[tokio::test]
async fn encoded_query_strings_reach_the_original_url() {
    let query_url = "https://cdn.test/img?id=1&size=2";
    let fetcher = StaticFetcher::default();
    fetcher
        .serve_json(MANIFEST_URL, url_manifest("knights", &[("standard", query_url)]))
        .serve(query_url, vec![7]);
    let service = service(&fetcher);

    let report = service.download_from_url(MANIFEST_URL).await.unwrap();

    assert_eq!(report.stored, ["standard"]);
    assert!(fetcher.calls().contains(&query_url.to_string()));
}

#[tokio::test]
async fn in_flight_assets_are_bounded() {
    let images = (0..8)
        .map(|i| (format!("img{i}"), format!("https://cdn.test/{i}.png")))
        .collect::<Vec<_>>();
    let fetcher = StaticFetcher::default();
    for (_, url) in &images {
        fetcher.serve(url, vec![1]);
    }
    let pairs = images
        .iter()
        .map(|(key, url)| (key.as_str(), url.as_str()))
        .collect::<Vec<_>>();
    fetcher.serve_json(MANIFEST_URL, url_manifest("knights", &pairs));
    let config = IngestConfig {
        max_in_flight_assets: 2,
        ..IngestConfig::default()
    };
    let service = service_with(&fetcher, config);

    let report = service.download_from_url(MANIFEST_URL).await.unwrap();

    assert_eq!(report.stored.len(), 8);
    assert!(fetcher.peak_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn import_matches_local_images_by_name() {
    let manifest = json!({
        "key": "cats",
        "description": "Hand-drawn cats",
        "images": [
            { "key": "standard", "fileName": "cat.png" },
            { "key": "sleepy", "fileName": "sleepy.png" },
            { "key": "fake", "fileName": "fake.png" }
        ]
    });
    let fetcher = StaticFetcher::default();
    let service = service(&fetcher);

    let reports = service
        .import_from_files(
            &[manifest_file("cats.json", &manifest)],
            &[
                png("cat.png", &[1, 2]),
                LocalFile::new("fake.png", "image/gif", vec![3]),
            ],
        )
        .await
        .unwrap();

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.stored, ["standard"]);
    let mut skipped = report
        .skipped
        .iter()
        .map(|skip| (skip.image_key.as_str(), &skip.reason))
        .collect::<Vec<_>>();
    skipped.sort_by_key(|(key, _)| *key);
    assert!(matches!(skipped[0], ("fake", SkipReason::InvalidFile(_))));
    assert!(matches!(skipped[1], ("sleepy", SkipReason::MissingFile)));

    let abstracts = service.get_abstracts().await.unwrap();
    assert_eq!(abstracts[0].source, None);
    let image = service.get_image("cats", "standard").await.unwrap().unwrap();
    assert_eq!(image.blob, vec![1, 2]);
    assert!(image.source_url.is_none());
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn import_processes_every_manifest_in_order() {
    let first = json!({ "key": "a", "description": "A", "images": [{ "key": "s", "fileName": "shared.png" }] });
    let second = json!({ "key": "b", "description": "B", "images": [{ "key": "s", "fileName": "shared.png" }] });
    let service = service(&StaticFetcher::default());

    let reports = service
        .import_from_files(
            &[manifest_file("a.json", &first), manifest_file("b.json", &second)],
            &[png("shared.png", &[5])],
        )
        .await
        .unwrap();

    let keys = reports
        .iter()
        .map(|report| report.extension_key.as_str())
        .collect::<Vec<_>>();
    assert_eq!(keys, ["a", "b"]);
    assert_eq!(service.store().count(IMAGES_STORE).unwrap(), 2);
}

#[tokio::test]
async fn bad_manifest_file_aborts_the_whole_import() {
    let good = json!({ "key": "a", "description": "A" });
    let service = service(&StaticFetcher::default());

    let not_json = LocalFile::new("b.json", "application/json", b"{ not json".to_vec());
    let err = service
        .import_from_files(&[manifest_file("a.json", &good), not_json], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Validation(_)));

    let wrong_type = png("manifest.png", b"{}");
    let err = service
        .import_from_files(&[wrong_type], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Validation(_)));

    let err = service.import_from_files(&[], &[]).await.unwrap_err();
    assert!(matches!(err, IngestError::Validation(_)));

    assert_eq!(service.store().count(ABSTRACTS_STORE).unwrap(), 0);
}

#[tokio::test]
async fn local_file_from_path_feeds_the_import() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("owls.json");
    let image_path = dir.path().join("owl.png");
    tokio::fs::write(
        &manifest_path,
        json!({
            "key": "owls",
            "description": "Night owls",
            "images": [{ "key": "standard", "fileName": "owl.png" }]
        })
        .to_string(),
    )
    .await
    .unwrap();
    tokio::fs::write(&image_path, [0x89, b'P', b'N', b'G']).await.unwrap();

    let manifest = LocalFile::from_path(&manifest_path).await.unwrap();
    let image = LocalFile::from_path(&image_path).await.unwrap();
    assert_eq!(manifest.mime_type, "application/json");
    assert_eq!(image.mime_type, "image/png");

    let service = service(&StaticFetcher::default());
    let reports = service.import_from_files(&[manifest], &[image]).await.unwrap();
    assert_eq!(reports[0].stored, ["standard"]);
}
