use avatar_ext_core::store::{
    HandleCache, IndexDescriptor, KeyPath, ObjectStore, Record, StoreDescriptor, StoreError,
    StoreKey, StoreLocation,
};
use avatar_ext_core::validation::sanitize_object;
use serde_json::json;

fn images_store() -> StoreDescriptor {
    StoreDescriptor::new("images", Some(KeyPath::compound(["key", "extensionKey"]))).with_index(
        IndexDescriptor::new("extensionKey", KeyPath::field("extensionKey")),
    )
}

fn notes_store() -> StoreDescriptor {
    StoreDescriptor::new("notes", None)
}

fn open_memory() -> ObjectStore {
    ObjectStore::open(
        &StoreLocation::Memory,
        "testdb",
        &[images_store(), notes_store()],
        Some(1),
    )
    .unwrap()
}

fn image(key: &str, extension: &str) -> Record {
    Record::with_attachment(
        json!({ "key": key, "extensionKey": extension }),
        vec![key.len() as u8],
    )
}

#[test]
fn put_then_get_returns_sanitized_value() {
    let db = open_memory();
    let raw = json!({
        "title": "<b>bold</b> & <script>x()</script>",
        "constructor": { "polluted": true },
        "nested": { "__proto__": 1, "ok": [1, 2, 3] }
    });
    let key = StoreKey::from("note-1");

    db.put("notes", &Record::new(raw.clone()), Some(&key)).unwrap();
    let stored = db.get("notes", &key).unwrap().unwrap();

    assert_eq!(stored.value, sanitize_object(&raw).unwrap());
    assert!(stored.value.get("constructor").is_none());
    assert!(stored.value["nested"].get("__proto__").is_none());
    assert!(stored.attachment.is_none());
}

#[test]
fn put_is_an_upsert() {
    let db = open_memory();
    let key = StoreKey::from(7);
    db.put("notes", &Record::new(json!({ "v": 1 })), Some(&key))
        .unwrap();
    db.put("notes", &Record::new(json!({ "v": 2 })), Some(&key))
        .unwrap();

    assert_eq!(db.count("notes").unwrap(), 1);
    assert_eq!(db.get("notes", &key).unwrap().unwrap().value, json!({ "v": 2 }));
}

#[test]
fn inline_keys_come_from_the_record() {
    let db = open_memory();
    let key = db.put("images", &image("standard", "cats"), None).unwrap();
    assert_eq!(
        key,
        StoreKey::compound([StoreKey::from("standard"), StoreKey::from("cats")])
    );

    let stored = db.get("images", &key).unwrap().unwrap();
    assert_eq!(stored.attachment, Some(vec![8]));

    let explicit = db.put("images", &image("a", "b"), Some(&StoreKey::from("x")));
    assert!(matches!(explicit, Err(StoreError::InvalidKey(_))));
    let missing = db.put("images", &Record::new(json!({ "key": "a" })), None);
    assert!(matches!(missing, Err(StoreError::InvalidKey(_))));
}

#[test]
fn out_of_line_store_requires_a_key() {
    let db = open_memory();
    let result = db.put("notes", &Record::new(json!({})), None);
    assert!(matches!(result, Err(StoreError::InvalidKey(_))));
}

#[test]
fn reserved_keys_are_rejected_before_any_write() {
    let db = open_memory();
    for key in ["__proto__", "Constructor", "prototype"] {
        let key = StoreKey::from(key);
        assert!(matches!(
            db.put("notes", &Record::new(json!({})), Some(&key)),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(db.get("notes", &key), Err(StoreError::InvalidKey(_))));
        assert!(matches!(db.delete("notes", &key), Err(StoreError::InvalidKey(_))));
    }
    assert_eq!(db.count("notes").unwrap(), 0);
}

#[test]
fn oversized_records_are_rejected_whole() {
    let db = open_memory();
    let too_long = json!({ "items": vec![0; 1_001] });
    let result = db.put("notes", &Record::new(too_long), Some(&StoreKey::from("n")));
    assert!(matches!(result, Err(StoreError::Sanitize(_))));
    assert_eq!(db.count("notes").unwrap(), 0);
}

#[test]
fn get_all_and_keys_are_ordered_by_key() {
    let db = open_memory();
    for key in ["b", "c", "a"] {
        db.put("notes", &Record::new(json!({ "k": key })), Some(&StoreKey::from(key)))
            .unwrap();
    }

    let keys = db.get_all_keys("notes").unwrap();
    assert_eq!(
        keys,
        vec![StoreKey::from("a"), StoreKey::from("b"), StoreKey::from("c")]
    );
    let values = db
        .get_all("notes")
        .unwrap()
        .into_iter()
        .map(|record| record.value["k"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(values, ["a", "b", "c"]);
}

#[test]
fn delete_and_clear_remove_records() {
    let db = open_memory();
    let key = StoreKey::from("gone");
    db.put("notes", &Record::new(json!({})), Some(&key)).unwrap();
    db.delete("notes", &key).unwrap();
    assert!(db.get("notes", &key).unwrap().is_none());

    db.delete("notes", &StoreKey::from("never-existed")).unwrap();

    db.put("images", &image("a", "x"), None).unwrap();
    db.put("images", &image("b", "y"), None).unwrap();
    db.clear("images").unwrap();
    assert_eq!(db.count("images").unwrap(), 0);
}

#[test]
fn clear_by_index_removes_only_matching_records() {
    let db = open_memory();
    db.put("images", &image("standard", "cats"), None).unwrap();
    db.put("images", &image("wounded", "cats"), None).unwrap();
    db.put("images", &image("standard", "dogs"), None).unwrap();

    let removed = db
        .clear_by_index("images", "extensionKey", &StoreKey::from("cats"))
        .unwrap();
    assert_eq!(removed, 2);

    let remaining = db.get_all("images").unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining
        .iter()
        .all(|record| record.value["extensionKey"] != json!("cats")));

    // Safe to re-run.
    assert_eq!(
        db.clear_by_index("images", "extensionKey", &StoreKey::from("cats"))
            .unwrap(),
        0
    );
}

#[test]
fn index_entries_follow_record_updates() {
    let tags = StoreDescriptor::new("tags", Some(KeyPath::field("id")))
        .with_index(IndexDescriptor::new("color", KeyPath::field("color")));
    let db = ObjectStore::open(&StoreLocation::Memory, "testdb", &[tags], Some(1)).unwrap();

    db.put("tags", &Record::new(json!({ "id": "t1", "color": "red" })), None)
        .unwrap();
    db.put("tags", &Record::new(json!({ "id": "t1", "color": "blue" })), None)
        .unwrap();

    let red = db
        .get_all_keys_by_index("tags", "color", &StoreKey::from("red"))
        .unwrap();
    let blue = db
        .get_all_keys_by_index("tags", "color", &StoreKey::from("blue"))
        .unwrap();
    assert!(red.is_empty());
    assert_eq!(blue, vec![StoreKey::from("t1")]);
}

#[test]
fn unknown_stores_and_indexes_are_errors() {
    let db = open_memory();
    assert!(matches!(
        db.get_all("missing"),
        Err(StoreError::UnknownStore(_))
    ));
    assert!(matches!(
        db.clear_by_index("images", "byColor", &StoreKey::from("red")),
        Err(StoreError::UnknownIndex { .. })
    ));
}

#[test]
fn invalid_store_names_fail_open() {
    for name in ["bad name", "__proto__", "sqlite_master", ""] {
        let result = ObjectStore::open(
            &StoreLocation::Memory,
            "testdb",
            &[StoreDescriptor::new(name, None)],
            Some(1),
        );
        assert!(matches!(result, Err(StoreError::InvalidName(_))), "{name}");
    }
    let bad_db = ObjectStore::open(&StoreLocation::Memory, "bad/name", &[], Some(1));
    assert!(matches!(bad_db, Err(StoreError::InvalidName(_))));
}

#[test]
fn upgrade_runs_once_per_new_version() {
    let dir = tempfile::tempdir().unwrap();
    let location = StoreLocation::Directory(dir.path().to_path_buf());

    let mut calls = 0;
    let first = ObjectStore::open_with_upgrade(&location, "versioned", Some(1), |upgrade| {
        calls += 1;
        assert_eq!(upgrade.old_version(), None);
        upgrade.create_store(&notes_store())
    })
    .unwrap();
    first
        .put("notes", &Record::new(json!({ "v": 1 })), Some(&StoreKey::from("k")))
        .unwrap();
    drop(first);

    let same = ObjectStore::open_with_upgrade(&location, "versioned", Some(1), |_| {
        calls += 1;
        Ok(())
    })
    .unwrap();
    assert_eq!(same.version(), 1);
    drop(same);

    let upgraded = ObjectStore::open_with_upgrade(&location, "versioned", Some(2), |upgrade| {
        calls += 1;
        assert_eq!(upgrade.old_version(), Some(1));
        upgrade.create_store(&images_store())
    })
    .unwrap();
    assert_eq!(calls, 2);
    assert_eq!(upgraded.version(), 2);
    assert_eq!(upgraded.store_names(), ["images", "notes"]);
    assert_eq!(upgraded.count("notes").unwrap(), 1);
    drop(upgraded);

    let downgrade = ObjectStore::open(&location, "versioned", &[], Some(1));
    assert!(matches!(
        downgrade,
        Err(StoreError::VersionDowngrade {
            requested: 1,
            current: 2
        })
    ));
}

#[test]
fn conflicting_key_path_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let location = StoreLocation::Directory(dir.path().to_path_buf());
    ObjectStore::open(&location, "conflict", &[notes_store()], Some(1)).unwrap();

    let changed = StoreDescriptor::new("notes", Some(KeyPath::field("id")));
    let result = ObjectStore::open(&location, "conflict", &[changed], Some(2));
    assert!(matches!(result, Err(StoreError::SchemaConflict(_))));
}

#[test]
fn handle_cache_reuses_handles_per_name_and_version() {
    let dir = tempfile::tempdir().unwrap();
    let cache = HandleCache::new(StoreLocation::Directory(dir.path().to_path_buf()));

    let first = cache.open("avatars", &[notes_store()], 1).unwrap();
    let second = cache.open("avatars", &[notes_store()], 1).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);

    first
        .put("notes", &Record::new(json!({})), Some(&StoreKey::from("shared")))
        .unwrap();
    assert_eq!(second.count("notes").unwrap(), 1);
    assert!(dir.path().join("avatars.sqlite3").exists());
}

#[test]
fn engine_failures_surface_generic_messages() {
    let err = StoreError::Operation(avatar_ext_core::store::StoreOperation::Delete);
    assert_eq!(err.to_string(), "Failed to delete data");
}
