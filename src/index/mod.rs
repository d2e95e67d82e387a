//! Append-only vector index over record embeddings.
//!
//! Each insertion takes the next slot; slots are never reused, even after a
//! record is removed or re-inserted, so slot positions stay valid for the life
//! of the index. Removal only tombstones. The whole index carries one
//! dimension and one provider identifier: vectors from different providers
//! never share an index, and switching providers means [`VectorIndex::rebuild`].
//!
//! On-disk persistence lives in [`persist`], locking in [`lock`], and the
//! directory-level API callers use in [`store`].

pub mod lock;
pub mod persist;
pub mod store;

use std::collections::HashMap;

use serde::Serialize;

use crate::embedding::record_text;
use crate::error::{Result, SagaError};
use crate::record::Record;

/// Texts embedded per provider call during a rebuild.
const REBUILD_BATCH: usize = 32;

/// One stored vector and the record content it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub record_id: String,
    pub vector: Vec<f32>,
    /// `Record::content_hash` at the time the vector was computed.
    pub content_hash: String,
}

impl IndexEntry {
    /// True if the record has changed since this entry was embedded.
    pub fn is_stale_for(&self, record: &Record) -> bool {
        self.content_hash != record.content_hash()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Slot {
    pub(crate) entry: IndexEntry,
    pub(crate) tombstoned: bool,
}

/// Result of [`VectorIndex::search_fresh`] and [`VectorIndex::find_similar`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreshSearch {
    /// Up to `k` `(record_id, similarity)` pairs, best first.
    pub hits: Vec<(String, f32)>,
    /// Records whose stored vector no longer matches their content, sorted.
    pub stale: Vec<String>,
}

/// Counters reported by [`VectorIndex::stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub live: usize,
    pub tombstoned: usize,
    pub slots: usize,
    pub dimension: usize,
    pub provider_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    provider_id: String,
    slots: Vec<Slot>,
    live: HashMap<String, usize>,
}

impl VectorIndex {
    pub fn new(dimension: usize, provider_id: impl Into<String>) -> Self {
        Self {
            dimension,
            provider_id: provider_id.into(),
            slots: Vec::new(),
            live: HashMap::new(),
        }
    }

    /// Reassemble an index from persisted slots. Two live slots for the same
    /// record or a wrongly sized vector mean the artifacts are corrupt.
    pub(crate) fn from_slots(
        dimension: usize,
        provider_id: String,
        slots: Vec<Slot>,
    ) -> Result<Self> {
        let mut live = HashMap::with_capacity(slots.len());
        for (pos, slot) in slots.iter().enumerate() {
            if slot.entry.vector.len() != dimension {
                return Err(SagaError::IndexCorrupt(format!(
                    "slot {pos} has {} values, index dimension is {dimension}",
                    slot.entry.vector.len()
                )));
            }
            if check_finite(&slot.entry.vector).is_err() {
                return Err(SagaError::IndexCorrupt(format!(
                    "slot {pos} holds a non-finite value"
                )));
            }
            if slot.tombstoned {
                continue;
            }
            if live.insert(slot.entry.record_id.clone(), pos).is_some() {
                return Err(SagaError::IndexCorrupt(format!(
                    "record {} has more than one live slot",
                    slot.entry.record_id
                )));
            }
        }
        Ok(Self {
            dimension,
            provider_id,
            slots,
            live,
        })
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Number of live (searchable) entries.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn contains(&self, record_id: &str) -> bool {
        self.live.contains_key(record_id)
    }

    /// The live entry for `record_id`, if any.
    pub fn get(&self, record_id: &str) -> Option<&IndexEntry> {
        self.live.get(record_id).map(|&pos| &self.slots[pos].entry)
    }

    /// Append a vector for `record_id` and return its slot. A previous live
    /// slot for the same record is tombstoned first. Vectors of the wrong
    /// length or with NaN/infinite values are rejected.
    pub fn insert(
        &mut self,
        record_id: impl Into<String>,
        vector: Vec<f32>,
        content_hash: impl Into<String>,
    ) -> Result<usize> {
        self.check_vector(&vector)?;
        let record_id = record_id.into();
        if let Some(old) = self.live.remove(&record_id) {
            self.slots[old].tombstoned = true;
        }
        let pos = self.slots.len();
        self.slots.push(Slot {
            entry: IndexEntry {
                record_id: record_id.clone(),
                vector,
                content_hash: content_hash.into(),
            },
            tombstoned: false,
        });
        self.live.insert(record_id, pos);
        Ok(pos)
    }

    /// Embed and insert a record with the given embedding function.
    pub fn insert_record<F>(&mut self, record: &Record, embed: F) -> Result<usize>
    where
        F: FnOnce(&str) -> anyhow::Result<Vec<f32>>,
    {
        let text = record_text(record.title(), record.body());
        let vector = embed(&text).map_err(|e| SagaError::ProviderUnavailable(e.to_string()))?;
        self.insert(record.id(), vector, record.content_hash())
    }

    /// Tombstone the live slot for `record_id`. Returns false if there was none.
    pub fn remove(&mut self, record_id: &str) -> bool {
        match self.live.remove(record_id) {
            Some(pos) => {
                self.slots[pos].tombstoned = true;
                true
            }
            None => false,
        }
    }

    /// Up to `k` live entries by descending cosine similarity. Equal
    /// similarities keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        self.check_vector(query)?;
        let candidates = self.live_slots().map(|(pos, entry)| (pos, entry, cosine(query, &entry.vector)));
        Ok(top_k(candidates, k))
    }

    /// Like [`search`](Self::search), restricted to records in `current`
    /// (`record_id -> content_hash`) whose hash still matches the entry.
    /// Entries for records missing from `current` are ignored; entries whose
    /// hash differs are reported in [`FreshSearch::stale`] and never returned.
    pub fn search_fresh(
        &self,
        query: &[f32],
        k: usize,
        current: &HashMap<&str, &str>,
    ) -> Result<FreshSearch> {
        self.check_vector(query)?;
        Ok(self.fresh_neighbours(query, k, current, None))
    }

    /// Nearest neighbours of a stored record, excluding the record itself,
    /// under the same freshness rules as [`search_fresh`](Self::search_fresh).
    ///
    /// If the record is not indexed or is absent from `current` there is
    /// nothing to compare. If its own entry is stale, no neighbours are
    /// returned and the record is reported in [`FreshSearch::stale`].
    pub fn find_similar(
        &self,
        record_id: &str,
        k: usize,
        current: &HashMap<&str, &str>,
    ) -> FreshSearch {
        let Some(&origin) = self.live.get(record_id) else {
            return FreshSearch::default();
        };
        let entry = &self.slots[origin].entry;
        match current.get(record_id) {
            None => FreshSearch::default(),
            Some(hash) if *hash != entry.content_hash => FreshSearch {
                hits: Vec::new(),
                stale: vec![record_id.to_string()],
            },
            Some(_) => self.fresh_neighbours(&entry.vector, k, current, Some(origin)),
        }
    }

    /// Discard every slot and re-embed `records` from scratch with a provider
    /// producing `dimension`-wide vectors, identified by `provider_id`.
    ///
    /// Records are embedded in id order, in batches, so the same records give
    /// the same slots whatever order the store returned them in. The existing
    /// state, including the provider identity, is replaced only once every
    /// record has embedded successfully.
    pub fn rebuild<F>(
        &mut self,
        records: &[Record],
        dimension: usize,
        provider_id: impl Into<String>,
        mut embed_batch: F,
    ) -> Result<()>
    where
        F: FnMut(&[&str]) -> anyhow::Result<Vec<Vec<f32>>>,
    {
        let mut ordered: Vec<&Record> = records.iter().collect();
        ordered.sort_by(|a, b| a.id().cmp(b.id()));

        let mut fresh = VectorIndex::new(dimension, provider_id);
        for chunk in ordered.chunks(REBUILD_BATCH) {
            let texts: Vec<String> = chunk
                .iter()
                .map(|r| record_text(r.title(), r.body()))
                .collect();
            let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let vectors = embed_batch(&text_refs)
                .map_err(|e| SagaError::ProviderUnavailable(e.to_string()))?;
            if vectors.len() != chunk.len() {
                return Err(SagaError::ProviderUnavailable(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    chunk.len()
                )));
            }
            for (record, vector) in chunk.iter().zip(vectors) {
                fresh.insert(record.id(), vector, record.content_hash())?;
            }
        }

        tracing::info!(records = fresh.len(), provider = %fresh.provider_id, "vector index rebuilt");
        *self = fresh;
        Ok(())
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            live: self.live.len(),
            tombstoned: self.slots.len() - self.live.len(),
            slots: self.slots.len(),
            dimension: self.dimension,
            provider_id: self.provider_id.clone(),
        }
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(SagaError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        check_finite(vector)
    }

    /// Score live entries whose record is in `current` with a matching hash;
    /// collect the mismatches as stale. `exclude` skips one slot.
    fn fresh_neighbours(
        &self,
        query: &[f32],
        k: usize,
        current: &HashMap<&str, &str>,
        exclude: Option<usize>,
    ) -> FreshSearch {
        let mut stale = Vec::new();
        let mut candidates = Vec::new();
        for (pos, entry) in self.live_slots() {
            if Some(pos) == exclude {
                continue;
            }
            match current.get(entry.record_id.as_str()) {
                None => continue,
                Some(hash) if *hash != entry.content_hash => stale.push(entry.record_id.clone()),
                Some(_) => candidates.push((pos, entry, cosine(query, &entry.vector))),
            }
        }
        stale.sort();
        FreshSearch {
            hits: top_k(candidates.into_iter(), k),
            stale,
        }
    }

    fn live_slots(&self) -> impl Iterator<Item = (usize, &IndexEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.tombstoned)
            .map(|(pos, slot)| (pos, &slot.entry))
    }
}

/// Cosine similarity in [-1, 1]. Zero vectors, and inputs whose products
/// overflow to a non-finite result, score 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let sim = dot / (norm_a * norm_b);
    if norm_a == 0.0 || norm_b == 0.0 || !sim.is_finite() {
        0.0
    } else {
        sim.clamp(-1.0, 1.0)
    }
}

fn check_finite(vector: &[f32]) -> Result<()> {
    match vector.iter().position(|x| !x.is_finite()) {
        Some(position) => Err(SagaError::NonFiniteVector { position }),
        None => Ok(()),
    }
}

fn top_k<'a>(
    candidates: impl Iterator<Item = (usize, &'a IndexEntry, f32)>,
    k: usize,
) -> Vec<(String, f32)> {
    if k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(usize, &IndexEntry, f32)> = candidates.collect();
    scored.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
        .into_iter()
        .map(|(_, entry, sim)| (entry.record_id.clone(), sim))
        .collect()
}
