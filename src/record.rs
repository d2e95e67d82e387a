//! Saga records and the stores that supply them.
//!
//! A [`Record`] is the read-only unit the retrieval core ranks. It is built
//! through [`Record::new`], which validates its fields and derives the
//! content hash used to detect stale vector-index entries. Records come from
//! a [`RecordStore`]: [`MemoryRecordStore`] for callers that already hold
//! records, [`JsonDirStore`] for a directory with one JSON file per record.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SagaError};

/// What kind of work a saga documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Bug hunts, incident fixes.
    Debugging,
    /// New functionality.
    Feature,
    /// Refactors and design decisions.
    Architecture,
    /// Performance work.
    Optimization,
    #[default]
    General,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debugging => "debugging",
            Self::Feature => "feature",
            Self::Architecture => "architecture",
            Self::Optimization => "optimization",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "debugging" => Ok(Self::Debugging),
            "feature" => Ok(Self::Feature),
            "architecture" => Ok(Self::Architecture),
            "optimization" => Ok(Self::Optimization),
            "general" => Ok(Self::General),
            _ => Err(format!("unknown record kind: {s}")),
        }
    }
}

/// A saga as seen by the retrieval core.
///
/// Fields are private so the content hash can never drift from the content:
/// the only way to change the title, body or tags is to build a new record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    id: String,
    title: String,
    body: String,
    tags: BTreeSet<String>,
    timestamp: DateTime<Utc>,
    kind: RecordKind,
    branch: Option<String>,
    content_hash: String,
}

impl Record {
    /// Validate and build a record. Tags are trimmed, lower-cased and
    /// deduplicated; empty tags are dropped.
    pub fn new<I, S>(
        id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        tags: I,
        timestamp: DateTime<Utc>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = id.into();
        let title = title.into();
        let body = body.into();

        if id.trim().is_empty() {
            return Err(SagaError::InvalidRecord("id must not be empty".into()));
        }
        if title.trim().is_empty() {
            return Err(SagaError::InvalidRecord(format!(
                "record {id} has an empty title"
            )));
        }

        let tags: BTreeSet<String> = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let content_hash = content_hash(&title, &body, &tags);

        Ok(Self {
            id,
            title,
            body,
            tags,
            timestamp,
            kind: RecordKind::default(),
            branch: None,
            content_hash,
        })
    }

    /// Set the record kind. Does not affect the content hash.
    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the branch the saga was captured on. Does not affect the content hash.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        self.branch = if branch.trim().is_empty() {
            None
        } else {
            Some(branch)
        };
        self
    }

    /// A copy of this record with a new body and a recomputed hash.
    pub fn with_body(&self, body: impl Into<String>) -> Self {
        let body = body.into();
        let content_hash = content_hash(&self.title, &body, &self.tags);
        Self {
            body,
            content_hash,
            ..self.clone()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Hex SHA-256 over title, body and the sorted tag set.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

/// SHA-256 over the hash-relevant fields. Fields are separated by NUL and
/// tags by the ASCII unit separator so `("ab", "c")` and `("a", "bc")` differ.
fn content_hash(title: &str, body: &str, tags: &BTreeSet<String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(body.as_bytes());
    hasher.update([0u8]);
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(tag.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// On-disk shape of a record file read by [`JsonDirStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFile {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub kind: Option<RecordKind>,
    #[serde(default)]
    pub branch: Option<String>,
}

impl TryFrom<RecordFile> for Record {
    type Error = SagaError;

    fn try_from(file: RecordFile) -> Result<Self> {
        let mut record = Record::new(file.id, file.title, file.body, file.tags, file.timestamp)?;
        if let Some(kind) = file.kind {
            record = record.with_kind(kind);
        }
        if let Some(branch) = file.branch {
            record = record.with_branch(branch);
        }
        Ok(record)
    }
}

impl From<&Record> for RecordFile {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            body: record.body.clone(),
            tags: record.tags.iter().cloned().collect(),
            timestamp: record.timestamp,
            kind: Some(record.kind),
            branch: record.branch.clone(),
        }
    }
}

/// Supplies the records the core ranks. No ordering guarantee.
pub trait RecordStore {
    fn records(&self) -> Result<Vec<Record>>;
}

/// A store over records already held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Vec<Record>,
}

impl MemoryRecordStore {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }
}

impl RecordStore for MemoryRecordStore {
    fn records(&self) -> Result<Vec<Record>> {
        Ok(self.records.clone())
    }
}

/// A directory holding one `*.json` [`RecordFile`] per record.
///
/// Files that fail to parse are skipped with a warning; a missing or
/// unreadable directory is an error.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a record as `<id>.json`, replacing any previous file.
    pub fn write(&self, record: &Record) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", record.id()));
        let json = serde_json::to_vec_pretty(&RecordFile::from(record))?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    fn read_file(path: &Path) -> Result<Record> {
        let bytes = std::fs::read(path)?;
        let file: RecordFile = serde_json::from_slice(&bytes)?;
        Record::try_from(file)
    }
}

impl RecordStore for JsonDirStore {
    fn records(&self) -> Result<Vec<Record>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::read_file(&path) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record file");
                }
            }
        }
        tracing::debug!(dir = %self.dir.display(), count = records.len(), "records loaded");
        Ok(records)
    }
}

/// The `limit` most recent records, newest first (ties by id).
pub fn recent(records: &[Record], limit: usize) -> Vec<&Record> {
    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));
    sorted.truncate(limit);
    sorted
}

/// Records carrying a tag that contains `tag` (case-insensitive), newest first.
pub fn by_tag<'a>(records: &'a [Record], tag: &str) -> Vec<&'a Record> {
    let needle = tag.trim().to_lowercase();
    let mut matched: Vec<&Record> = records
        .iter()
        .filter(|r| r.tags.iter().any(|t| t.contains(&needle)))
        .collect();
    matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn new_rejects_empty_id_and_title() {
        let err = Record::new("", "title", "", Vec::<String>::new(), ts(1)).unwrap_err();
        assert!(matches!(err, SagaError::InvalidRecord(_)));
        let err = Record::new("r1", "   ", "", Vec::<String>::new(), ts(1)).unwrap_err();
        assert!(matches!(err, SagaError::InvalidRecord(_)));
    }

    #[test]
    fn tags_are_normalized() {
        let r = Record::new("r1", "t", "", [" Auth ", "auth", "", "JWT"], ts(1)).unwrap();
        let tags: Vec<&str> = r.tags().iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["auth", "jwt"]);
    }

    #[test]
    fn hash_tracks_title_body_and_tags_only() {
        let base = Record::new("r1", "JWT timeout fix", "body", ["auth"], ts(1)).unwrap();
        let same = Record::new("r1", "JWT timeout fix", "body", ["auth"], ts(9))
            .unwrap()
            .with_kind(RecordKind::Debugging)
            .with_branch("hotfix/jwt");
        assert_eq!(base.content_hash(), same.content_hash());

        let new_body = base.with_body("different body");
        assert_ne!(base.content_hash(), new_body.content_hash());

        let new_tags = Record::new("r1", "JWT timeout fix", "body", ["auth", "jwt"], ts(1)).unwrap();
        assert_ne!(base.content_hash(), new_tags.content_hash());

        let new_title = Record::new("r1", "JWT timeout fixed", "body", ["auth"], ts(1)).unwrap();
        assert_ne!(base.content_hash(), new_title.content_hash());
    }

    #[test]
    fn field_boundaries_affect_hash() {
        let a = Record::new("r1", "ab", "c", Vec::<String>::new(), ts(1)).unwrap();
        let b = Record::new("r1", "a", "bc", Vec::<String>::new(), ts(1)).unwrap();
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn record_kind_round_trips_through_str() {
        for kind in [
            RecordKind::Debugging,
            RecordKind::Feature,
            RecordKind::Architecture,
            RecordKind::Optimization,
            RecordKind::General,
        ] {
            assert_eq!(kind.as_str().parse::<RecordKind>().unwrap(), kind);
        }
        assert!("incident".parse::<RecordKind>().is_err());
    }

    #[test]
    fn recent_orders_newest_first() {
        let records = vec![
            Record::new("a", "old", "", Vec::<String>::new(), ts(1)).unwrap(),
            Record::new("b", "new", "", Vec::<String>::new(), ts(5)).unwrap(),
            Record::new("c", "mid", "", Vec::<String>::new(), ts(3)).unwrap(),
        ];
        let ids: Vec<&str> = recent(&records, 2).iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn by_tag_matches_substring() {
        let records = vec![
            Record::new("a", "one", "", ["authentication"], ts(1)).unwrap(),
            Record::new("b", "two", "", ["ui"], ts(2)).unwrap(),
        ];
        let ids: Vec<&str> = by_tag(&records, "Auth").iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn json_dir_store_skips_bad_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = JsonDirStore::new(tmp.path());
        let record = Record::new("saga-1", "JWT timeout fix", "body", ["auth"], ts(2))
            .unwrap()
            .with_kind(RecordKind::Debugging);
        store.write(&record).unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let loaded = store.records().unwrap();
        assert_eq!(loaded, vec![record]);
    }

    #[test]
    fn json_dir_store_missing_dir_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = JsonDirStore::new(tmp.path().join("absent"));
        assert!(matches!(store.records(), Err(SagaError::Io(_))));
    }
}
