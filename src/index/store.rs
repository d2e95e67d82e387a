//! Locked access to an index directory.
//!
//! Every public method takes the directory lock exactly once and then works
//! through the unlocked helpers in [`super::persist`].

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use super::lock::IndexLock;
use super::persist::{self, ArtifactPresence};
use super::VectorIndex;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, SagaError};
use crate::record::Record;

#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
    /// Longest a writer waits for the directory lock; `None` blocks.
    write_timeout: Option<Duration>,
}

/// Overall state of an index directory as seen by [`IndexStore::check_health`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexStatus {
    /// Neither artifact exists yet.
    Missing,
    Healthy,
    Corrupt { reason: String },
    ProviderChanged { stored: String, configured: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: IndexStatus,
    pub vectors_present: bool,
    pub metadata_present: bool,
    pub provider_id: Option<String>,
    pub dimension: Option<usize>,
    pub live: usize,
    pub tombstoned: usize,
    /// Indexed records whose content has changed since embedding.
    pub stale_ids: Vec<String>,
    /// Records with no live vector.
    pub unindexed_ids: Vec<String>,
    /// Live vectors whose record no longer exists.
    pub orphaned_ids: Vec<String>,
}

impl HealthReport {
    /// True when the index loads cleanly and matches every record.
    pub fn is_clean(&self) -> bool {
        self.status == IndexStatus::Healthy
            && self.stale_ids.is_empty()
            && self.unindexed_ids.is_empty()
            && self.orphaned_ids.is_empty()
    }

    fn unreadable(presence: ArtifactPresence, status: IndexStatus) -> Self {
        Self {
            status,
            vectors_present: presence.vectors,
            metadata_present: presence.metadata,
            provider_id: None,
            dimension: None,
            live: 0,
            tombstoned: 0,
            stale_ids: Vec::new(),
            unindexed_ids: Vec::new(),
            orphaned_ids: Vec::new(),
        }
    }
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_timeout: None,
        }
    }

    /// Give up with [`SagaError::Lock`] if another writer holds the
    /// directory for longer than `timeout`.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True if at least one artifact is on disk.
    pub fn exists(&self) -> bool {
        !ArtifactPresence::probe(&self.dir).none()
    }

    /// Load the index under a shared lock. `Ok(None)` if nothing is stored.
    pub fn load(&self) -> Result<Option<VectorIndex>> {
        if !self.dir.is_dir() {
            return Ok(None);
        }
        let _lock = IndexLock::shared(&self.dir)?;
        persist::read_artifacts(&self.dir)
    }

    /// Load the index and confirm it was built by `provider`.
    pub fn load_for(&self, provider: &dyn EmbeddingProvider) -> Result<Option<VectorIndex>> {
        match self.load()? {
            Some(index) => {
                ensure_provider(&index, provider)?;
                Ok(Some(index))
            }
            None => Ok(None),
        }
    }

    /// Replace the stored index with `index`.
    pub fn save(&self, index: &VectorIndex) -> Result<()> {
        let _lock = self.write_lock()?;
        persist::write_artifacts(&self.dir, index)
    }

    /// Load (or start) the index for `provider`, apply `f`, and persist the
    /// result, all under one exclusive lock.
    pub fn update<T, F>(&self, provider: &dyn EmbeddingProvider, f: F) -> Result<T>
    where
        F: FnOnce(&mut VectorIndex) -> Result<T>,
    {
        let _lock = self.write_lock()?;
        let mut index = match persist::read_artifacts(&self.dir)? {
            Some(index) => {
                ensure_provider(&index, provider)?;
                index
            }
            None => VectorIndex::new(provider.dimensions(), provider.provider_id()),
        };
        let out = f(&mut index)?;
        persist::write_artifacts(&self.dir, &index)?;
        Ok(out)
    }

    /// Re-embed every record with `provider` and replace whatever is stored,
    /// corrupt or not. `on_progress` receives the number of records embedded
    /// after each batch.
    pub fn rebuild<F>(
        &self,
        records: &[Record],
        provider: &dyn EmbeddingProvider,
        mut on_progress: F,
    ) -> Result<VectorIndex>
    where
        F: FnMut(usize),
    {
        let mut index = VectorIndex::new(provider.dimensions(), provider.provider_id());
        index.rebuild(records, provider.dimensions(), provider.provider_id(), |texts| {
            let vectors = provider.embed_batch(texts)?;
            on_progress(texts.len());
            Ok(vectors)
        })?;

        let _lock = self.write_lock()?;
        persist::write_artifacts(&self.dir, &index)?;
        Ok(index)
    }

    /// Tombstone `record_id` in the stored index. Returns false, without
    /// creating anything, when there is no index or the record is not in it.
    pub fn remove(&self, provider: &dyn EmbeddingProvider, record_id: &str) -> Result<bool> {
        if ArtifactPresence::probe(&self.dir).none() {
            return Ok(false);
        }
        let _lock = self.write_lock()?;
        let Some(mut index) = persist::read_artifacts(&self.dir)? else {
            return Ok(false);
        };
        ensure_provider(&index, provider)?;
        if !index.remove(record_id) {
            return Ok(false);
        }
        persist::write_artifacts(&self.dir, &index)?;
        Ok(true)
    }

    /// Delete both artifacts.
    pub fn clear(&self) -> Result<()> {
        if !self.dir.is_dir() {
            return Ok(());
        }
        let _lock = self.write_lock()?;
        persist::remove_artifacts(&self.dir)
    }

    /// Inspect the stored index against the current records without
    /// modifying anything. Never fails: problems are reported in the status.
    pub fn check_health(&self, records: &[Record], configured_provider: Option<&str>) -> HealthReport {
        let presence = ArtifactPresence::probe(&self.dir);
        if presence.none() {
            return HealthReport::unreadable(presence, IndexStatus::Missing);
        }

        let index = match self.load() {
            Ok(Some(index)) => index,
            Ok(None) => return HealthReport::unreadable(presence, IndexStatus::Missing),
            Err(e) => {
                return HealthReport::unreadable(
                    presence,
                    IndexStatus::Corrupt {
                        reason: e.to_string(),
                    },
                )
            }
        };

        let status = match configured_provider {
            Some(configured) if configured != index.provider_id() => IndexStatus::ProviderChanged {
                stored: index.provider_id().to_string(),
                configured: configured.to_string(),
            },
            _ => IndexStatus::Healthy,
        };

        let current: HashMap<&str, &Record> = records.iter().map(|r| (r.id(), r)).collect();
        let mut stale_ids = BTreeSet::new();
        let mut unindexed_ids = BTreeSet::new();
        for record in records {
            match index.get(record.id()) {
                Some(entry) if entry.is_stale_for(record) => {
                    stale_ids.insert(record.id().to_string());
                }
                Some(_) => {}
                None => {
                    unindexed_ids.insert(record.id().to_string());
                }
            }
        }
        let orphaned_ids: BTreeSet<String> = index
            .slots()
            .iter()
            .filter(|slot| !slot.tombstoned && !current.contains_key(slot.entry.record_id.as_str()))
            .map(|slot| slot.entry.record_id.clone())
            .collect();

        let stats = index.stats();
        HealthReport {
            status,
            vectors_present: presence.vectors,
            metadata_present: presence.metadata,
            provider_id: Some(stats.provider_id),
            dimension: Some(stats.dimension),
            live: stats.live,
            tombstoned: stats.tombstoned,
            stale_ids: stale_ids.into_iter().collect(),
            unindexed_ids: unindexed_ids.into_iter().collect(),
            orphaned_ids: orphaned_ids.into_iter().collect(),
        }
    }

    fn write_lock(&self) -> Result<IndexLock> {
        match self.write_timeout {
            Some(timeout) => IndexLock::exclusive_with_timeout(&self.dir, timeout),
            None => IndexLock::exclusive(&self.dir),
        }
    }
}

fn ensure_provider(index: &VectorIndex, provider: &dyn EmbeddingProvider) -> Result<()> {
    let configured = provider.provider_id();
    if index.provider_id() != configured || index.dimension() != provider.dimensions() {
        return Err(SagaError::ProviderChanged {
            stored: format!("{} ({}d)", index.provider_id(), index.dimension()),
            configured: format!("{configured} ({}d)", provider.dimensions()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hash::HashEmbedder;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn record(id: &str, title: &str) -> Record {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        Record::new(id, title, "body", ["tag"], ts).unwrap()
    }

    #[test]
    fn update_creates_index_for_provider() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let provider = HashEmbedder::new(16);
        let r = record("a", "Alpha");

        store
            .update(&provider, |index| index.insert_record(&r, |t| provider.embed(t)))
            .unwrap();

        let index = store.load_for(&provider).unwrap().unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.provider_id(), "hash:fnv1a-16");
    }

    #[test]
    fn load_for_rejects_other_provider() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        store
            .rebuild(&[record("a", "Alpha")], &HashEmbedder::new(16), |_| {})
            .unwrap();
        let err = store.load_for(&HashEmbedder::new(32)).unwrap_err();
        assert!(matches!(err, SagaError::ProviderChanged { .. }));
        assert!(err.requires_rebuild());
    }

    #[test]
    fn failed_update_leaves_disk_untouched() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let provider = HashEmbedder::new(8);
        store.rebuild(&[record("a", "Alpha")], &provider, |_| {}).unwrap();
        let before = std::fs::read(tmp.path().join(persist::VECTORS_FILE)).unwrap();

        let result: Result<()> = store.update(&provider, |index| {
            index.remove("a");
            Err(SagaError::InvalidRecord("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read(tmp.path().join(persist::VECTORS_FILE)).unwrap(), before);
    }

    #[test]
    fn rebuild_reports_progress() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let records: Vec<Record> = (0..40).map(|i| record(&format!("r{i:02}"), "T")).collect();
        let mut seen = 0;
        store
            .rebuild(&records, &HashEmbedder::new(8), |n| seen += n)
            .unwrap();
        assert_eq!(seen, 40);
    }

    #[test]
    fn health_reports_missing_stale_orphaned_and_unindexed() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let provider = HashEmbedder::new(8);
        assert_eq!(store.check_health(&[], None).status, IndexStatus::Missing);

        let a = record("a", "Alpha");
        let b = record("b", "Beta");
        store.rebuild(&[a.clone(), b], &provider, |_| {}).unwrap();

        let current = vec![a.with_body("edited"), record("c", "Gamma")];
        let report = store.check_health(&current, Some("hash:fnv1a-8"));
        assert_eq!(report.status, IndexStatus::Healthy);
        assert_eq!(report.stale_ids, vec!["a"]);
        assert_eq!(report.unindexed_ids, vec!["c"]);
        assert_eq!(report.orphaned_ids, vec!["b"]);
        assert!(!report.is_clean());
    }

    #[test]
    fn health_reports_corruption_and_provider_change() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let records = [record("a", "Alpha")];
        store.rebuild(&records, &HashEmbedder::new(8), |_| {}).unwrap();

        let changed = store.check_health(&records, Some("local:all-MiniLM-L6-v2"));
        assert!(matches!(changed.status, IndexStatus::ProviderChanged { .. }));

        std::fs::remove_file(tmp.path().join(persist::METADATA_FILE)).unwrap();
        let corrupt = store.check_health(&records, None);
        assert!(matches!(corrupt.status, IndexStatus::Corrupt { .. }));
        assert!(corrupt.vectors_present);
        assert!(!corrupt.metadata_present);
    }

    #[test]
    fn remove_without_index_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("index");
        let store = IndexStore::new(&dir);
        let provider = HashEmbedder::new(8);

        assert!(!store.remove(&provider, "a").unwrap());
        assert!(!store.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn remove_tombstones_and_persists() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let provider = HashEmbedder::new(8);
        store
            .rebuild(&[record("a", "Alpha"), record("b", "Beta")], &provider, |_| {})
            .unwrap();
        let before = std::fs::read(tmp.path().join(persist::METADATA_FILE)).unwrap();

        assert!(!store.remove(&provider, "zzz").unwrap());
        assert_eq!(std::fs::read(tmp.path().join(persist::METADATA_FILE)).unwrap(), before);

        assert!(store.remove(&provider, "a").unwrap());
        let index = store.load().unwrap().unwrap();
        assert!(!index.contains("a"));
        assert_eq!(index.stats().tombstoned, 1);
    }

    #[test]
    fn writer_gives_up_after_timeout() {
        let tmp = TempDir::new().unwrap();
        let provider = HashEmbedder::new(8);
        let store = IndexStore::new(tmp.path()).with_write_timeout(Duration::from_millis(50));
        let _held = IndexLock::exclusive(tmp.path()).unwrap();

        let r = record("a", "Alpha");
        let err = store
            .update(&provider, |index| index.insert_record(&r, |t| provider.embed(t)))
            .unwrap_err();
        assert!(matches!(err, SagaError::Lock(_)));
    }

    #[test]
    fn clear_removes_artifacts() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        store.rebuild(&[record("a", "Alpha")], &HashEmbedder::new(8), |_| {}).unwrap();
        assert!(store.exists());
        store.clear().unwrap();
        assert!(!store.exists());
        assert!(store.load().unwrap().is_none());
    }
}
