mod helpers;

use std::collections::HashMap;
use std::fs;

use sagashark::embedding::hash::HashEmbedder;
use sagashark::embedding::EmbeddingProvider;
use sagashark::index::persist::{METADATA_FILE, VECTORS_FILE};
use sagashark::index::store::{IndexStatus, IndexStore};
use sagashark::record::{JsonDirStore, MemoryRecordStore, Record, RecordStore};
use sagashark::SagaError;
use tempfile::TempDir;

use helpers::*;

fn sample_records() -> Vec<Record> {
    let mut records = auth_and_ui();
    records.push(record(
        "3",
        "Flaky migration",
        "Schema migration raced the connection pool on startup.",
        &["database"],
    ));
    records
}

fn artifact_bytes(dir: &std::path::Path) -> (Vec<u8>, Vec<u8>) {
    (
        fs::read(dir.join(VECTORS_FILE)).unwrap(),
        fs::read(dir.join(METADATA_FILE)).unwrap(),
    )
}

#[test]
fn rebuild_twice_yields_identical_artifacts() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let provider = HashEmbedder::new(32);
    let records = sample_records();

    store.rebuild(&records, &provider, |_| {}).unwrap();
    let first = artifact_bytes(tmp.path());
    store.rebuild(&records, &provider, |_| {}).unwrap();
    let second = artifact_bytes(tmp.path());
    assert_eq!(first, second);

    let reversed: Vec<Record> = records.iter().rev().cloned().collect();
    store.rebuild(&reversed, &provider, |_| {}).unwrap();
    assert_eq!(artifact_bytes(tmp.path()), first);
}

#[test]
fn saved_index_loads_with_same_search_results() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let provider = HashEmbedder::new(64);
    let records = sample_records();

    let built = store.rebuild(&records, &provider, |_| {}).unwrap();
    let loaded = store.load_for(&provider).unwrap().unwrap();
    assert_eq!(built, loaded);

    let query = provider.embed("token timeout").unwrap();
    assert_eq!(built.search(&query, 3).unwrap(), loaded.search(&query, 3).unwrap());
}

#[test]
fn missing_half_of_the_pair_is_corrupt() {
    for missing in [VECTORS_FILE, METADATA_FILE] {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        store
            .rebuild(&sample_records(), &HashEmbedder::new(16), |_| {})
            .unwrap();
        fs::remove_file(tmp.path().join(missing)).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, SagaError::IndexCorrupt(_)), "{missing}: {err}");
        assert!(err.requires_rebuild());
    }
}

#[test]
fn row_count_mismatch_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    store
        .rebuild(&sample_records(), &HashEmbedder::new(16), |_| {})
        .unwrap();

    // Drop one slot from the metadata but keep the vector checksum valid.
    let path = tmp.path().join(METADATA_FILE);
    let mut meta: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    meta["slots"].as_array_mut().unwrap().pop();
    fs::write(&path, serde_json::to_vec_pretty(&meta).unwrap()).unwrap();

    let err = store.load().unwrap_err();
    assert!(matches!(err, SagaError::IndexCorrupt(msg) if msg.contains("row count")));
}

#[test]
fn dimension_mismatch_between_artifacts_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    store
        .rebuild(&sample_records(), &HashEmbedder::new(16), |_| {})
        .unwrap();

    let path = tmp.path().join(METADATA_FILE);
    let mut meta: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    meta["dimension"] = serde_json::json!(8);
    fs::write(&path, serde_json::to_vec_pretty(&meta).unwrap()).unwrap();

    let err = store.load().unwrap_err();
    assert!(matches!(err, SagaError::IndexCorrupt(msg) if msg.contains("dimension")));
}

#[test]
fn garbage_metadata_is_corrupt_and_rebuild_recovers() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let provider = HashEmbedder::new(16);
    let records = sample_records();
    store.rebuild(&records, &provider, |_| {}).unwrap();

    fs::write(tmp.path().join(METADATA_FILE), b"{ not json").unwrap();
    assert!(matches!(store.load(), Err(SagaError::IndexCorrupt(_))));

    let health = store.check_health(&records, Some(&provider.provider_id()));
    assert!(matches!(health.status, IndexStatus::Corrupt { .. }));

    store.rebuild(&records, &provider, |_| {}).unwrap();
    let health = store.check_health(&records, Some(&provider.provider_id()));
    assert!(health.is_clean());
}

#[test]
fn switching_provider_requires_rebuild() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let records = sample_records();
    store
        .rebuild(&records, &HashEmbedder::new(16), |_| {})
        .unwrap();

    let keyword = KeywordProvider::new(&[("timeout", 0)]);
    let err = store.load_for(&keyword).unwrap_err();
    assert!(matches!(err, SagaError::ProviderChanged { .. }));

    let r = &records[0];
    let err = store
        .update(&keyword, |index| index.insert_record(r, |t| keyword.embed(t)))
        .unwrap_err();
    assert!(matches!(err, SagaError::ProviderChanged { .. }));

    store.rebuild(&records, &keyword, |_| {}).unwrap();
    let index = store.load_for(&keyword).unwrap().unwrap();
    assert_eq!(index.provider_id(), keyword.provider_id());
    assert_eq!(index.len(), records.len());
}

#[test]
fn rebuilding_with_new_model_retags_index() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let records = sample_records();
    let hash = HashEmbedder::new(16);
    let mut index = store.rebuild(&records, &hash, |_| {}).unwrap();

    let keyword = KeywordProvider::new(&[("timeout", 0)]);
    index
        .rebuild(&records, keyword.dimensions(), keyword.provider_id(), |t| {
            keyword.embed_batch(t)
        })
        .unwrap();
    assert_eq!(index.provider_id(), keyword.provider_id());
    store.save(&index).unwrap();

    assert!(matches!(store.load_for(&hash), Err(SagaError::ProviderChanged { .. })));
    assert_eq!(store.load_for(&keyword).unwrap().unwrap(), index);
}

#[test]
fn similar_skips_records_edited_since_indexing() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let provider = HashEmbedder::new(32);
    let mut records = sample_records();
    store.rebuild(&records, &provider, |_| {}).unwrap();

    records[1] = records[1].with_body("Timeout in the settings sync.");
    let current: HashMap<&str, &str> = records.iter().map(|r| (r.id(), r.content_hash())).collect();
    let index = store.load().unwrap().unwrap();

    let found = index.find_similar("1", 5, &current);
    assert_eq!(found.stale, vec!["2".to_string()]);
    assert!(found.hits.iter().all(|(id, _)| id != "2"));
    assert_eq!(found.hits.len(), 1);
}

#[test]
fn index_remove_on_fresh_install_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("index");
    let store = IndexStore::new(&dir);
    assert!(!store.remove(&HashEmbedder::new(16), "1").unwrap());
    assert!(!dir.join(METADATA_FILE).exists());
    assert!(!dir.join(VECTORS_FILE).exists());
}

#[test]
fn incremental_updates_tombstone_and_persist() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let provider = HashEmbedder::new(16);
    let records = sample_records();
    store.rebuild(&records, &provider, |_| {}).unwrap();

    let edited = records[0].with_body("Clock skew fixed by allowing 30 seconds of leeway.");
    let slot = store
        .update(&provider, |index| index.insert_record(&edited, |t| provider.embed(t)))
        .unwrap();
    assert_eq!(slot, records.len());

    let removed = store.update(&provider, |index| Ok(index.remove("2"))).unwrap();
    assert!(removed);

    let index = store.load().unwrap().unwrap();
    let stats = index.stats();
    assert_eq!(stats.live, 2);
    assert_eq!(stats.tombstoned, 2);
    assert_eq!(stats.slots, 4);
    assert!(!index.get("1").unwrap().is_stale_for(&edited));
}

#[test]
fn concurrent_writers_do_not_lose_updates() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let provider = HashEmbedder::new(16);

    std::thread::scope(|scope| {
        for writer in 0..4 {
            let store = store.clone();
            let provider = &provider;
            scope.spawn(move || {
                for n in 0..5 {
                    let id = format!("w{writer}-{n}");
                    let r = record(&id, &format!("Entry {id}"), "body", &[]);
                    store
                        .update(provider, |index| index.insert_record(&r, |t| provider.embed(t)))
                        .unwrap();
                }
            });
        }
        for _ in 0..4 {
            let store = store.clone();
            scope.spawn(move || {
                for _ in 0..10 {
                    // Readers must never observe a torn pair.
                    if let Err(e) = store.load() {
                        panic!("reader saw {e}");
                    }
                }
            });
        }
    });

    let index = store.load().unwrap().unwrap();
    assert_eq!(index.len(), 20);
    assert_eq!(index.stats().tombstoned, 0);
}

#[test]
fn json_dir_records_feed_index_and_health() {
    let tmp = TempDir::new().unwrap();
    let records_dir = tmp.path().join("sagas");
    let json = JsonDirStore::new(&records_dir);
    for r in sample_records() {
        json.write(&r).unwrap();
    }
    fs::write(records_dir.join("broken.json"), b"{}").unwrap();

    let loaded = json.records().unwrap();
    assert_eq!(loaded.len(), 3);

    let store = IndexStore::new(tmp.path().join("index"));
    let provider = HashEmbedder::new(16);
    store.rebuild(&loaded, &provider, |_| {}).unwrap();

    let mut memory = MemoryRecordStore::new(loaded);
    memory.push(record("4", "New saga", "not yet indexed", &[]));
    let health = store.check_health(&memory.records().unwrap(), Some(&provider.provider_id()));
    assert_eq!(health.status, IndexStatus::Healthy);
    assert_eq!(health.unindexed_ids, vec!["4".to_string()]);
    assert_eq!(health.live, 3);
}
