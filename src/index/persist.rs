//! On-disk format of the vector index: a binary vector file and a JSON
//! metadata file that always travel together.
//!
//! `vectors.bin` layout (little-endian):
//!
//! ```text
//! magic "SGVX" | format u32 | dimension u32 | rows u64 | rows * dimension f32
//! ```
//!
//! `index.json` holds the provider identifier, the slot table and the SHA-256
//! of the exact vector bytes it was written with. A metadata file paired with
//! a vector file from another write fails that checksum and is reported as
//! [`SagaError::IndexCorrupt`].
//!
//! Both files are written to a temporary name, synced and renamed into place,
//! vectors first. These functions do no locking; see [`super::store`].

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{IndexEntry, Slot, VectorIndex};
use crate::error::{Result, SagaError};

pub const VECTORS_FILE: &str = "vectors.bin";
pub const METADATA_FILE: &str = "index.json";

const MAGIC: &[u8; 4] = b"SGVX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;
const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub format_version: u32,
    pub provider_id: String,
    pub dimension: usize,
    pub row_count: usize,
    pub vectors_sha256: String,
    pub slots: Vec<SlotMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotMetadata {
    pub record_id: String,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tombstoned: bool,
}

/// Which of the two artifacts exist in `dir`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactPresence {
    pub vectors: bool,
    pub metadata: bool,
}

impl ArtifactPresence {
    pub fn probe(dir: &Path) -> Self {
        Self {
            vectors: dir.join(VECTORS_FILE).is_file(),
            metadata: dir.join(METADATA_FILE).is_file(),
        }
    }

    pub fn none(&self) -> bool {
        !self.vectors && !self.metadata
    }
}

/// Serialize every slot's vector, tombstones included, in slot order.
pub fn encode_vectors(index: &VectorIndex) -> Vec<u8> {
    let slots = index.slots();
    let mut buf = Vec::with_capacity(HEADER_LEN + slots.len() * index.dimension() * 4);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(index.dimension() as u32).to_le_bytes());
    buf.extend_from_slice(&(slots.len() as u64).to_le_bytes());
    for slot in slots {
        for value in &slot.entry.vector {
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
    buf
}

/// Parse a vector file into `(dimension, rows)`.
pub fn decode_vectors(bytes: &[u8]) -> Result<(usize, Vec<Vec<f32>>)> {
    if bytes.len() < HEADER_LEN {
        return Err(SagaError::IndexCorrupt(format!(
            "{VECTORS_FILE} is {} bytes, shorter than its header",
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC {
        return Err(SagaError::IndexCorrupt(format!("{VECTORS_FILE} has bad magic")));
    }
    let version = u32::from_le_bytes(read_array(&bytes[4..8]));
    if version != FORMAT_VERSION {
        return Err(SagaError::IndexCorrupt(format!(
            "{VECTORS_FILE} format {version} is not supported (expected {FORMAT_VERSION})"
        )));
    }
    let dimension = u32::from_le_bytes(read_array(&bytes[8..12])) as usize;
    let rows = u64::from_le_bytes(read_array(&bytes[12..20])) as usize;

    let body = &bytes[HEADER_LEN..];
    let expected = rows
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| SagaError::IndexCorrupt(format!("{VECTORS_FILE} header overflows")))?;
    if body.len() != expected {
        return Err(SagaError::IndexCorrupt(format!(
            "{VECTORS_FILE} holds {} payload bytes, header promises {expected}",
            body.len()
        )));
    }
    if dimension == 0 {
        return Ok((0, vec![Vec::new(); rows]));
    }

    let vectors = body
        .chunks_exact(dimension * 4)
        .map(|row| {
            row.chunks_exact(4)
                .map(|b| f32::from_le_bytes(read_array(b)))
                .collect()
        })
        .collect();
    Ok((dimension, vectors))
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Build the metadata document for `index`, binding it to `vector_bytes`.
pub fn metadata_for(index: &VectorIndex, vector_bytes: &[u8]) -> IndexMetadata {
    IndexMetadata {
        format_version: FORMAT_VERSION,
        provider_id: index.provider_id().to_string(),
        dimension: index.dimension(),
        row_count: index.slots().len(),
        vectors_sha256: sha256_hex(vector_bytes),
        slots: index
            .slots()
            .iter()
            .map(|slot| SlotMetadata {
                record_id: slot.entry.record_id.clone(),
                content_hash: slot.entry.content_hash.clone(),
                tombstoned: slot.tombstoned,
            })
            .collect(),
    }
}

/// Write both artifacts. Vectors go first: a crash between the two renames
/// leaves a pair whose checksum no longer matches.
pub fn write_artifacts(dir: &Path, index: &VectorIndex) -> Result<()> {
    fs::create_dir_all(dir)?;
    remove_temp_files(dir);

    let vector_bytes = encode_vectors(index);
    let metadata = metadata_for(index, &vector_bytes);
    let mut metadata_bytes = serde_json::to_vec_pretty(&metadata)?;
    metadata_bytes.push(b'\n');

    write_atomic(dir, VECTORS_FILE, &vector_bytes)?;
    write_atomic(dir, METADATA_FILE, &metadata_bytes)?;
    sync_dir(dir)?;

    tracing::debug!(
        dir = %dir.display(),
        rows = metadata.row_count,
        live = index.len(),
        "index artifacts written"
    );
    Ok(())
}

/// Read and cross-check both artifacts. `Ok(None)` when neither exists.
pub fn read_artifacts(dir: &Path) -> Result<Option<VectorIndex>> {
    let presence = ArtifactPresence::probe(dir);
    match (presence.vectors, presence.metadata) {
        (false, false) => return Ok(None),
        (true, false) => {
            return Err(SagaError::IndexCorrupt(format!(
                "{VECTORS_FILE} present without {METADATA_FILE}"
            )))
        }
        (false, true) => {
            return Err(SagaError::IndexCorrupt(format!(
                "{METADATA_FILE} present without {VECTORS_FILE}"
            )))
        }
        (true, true) => {}
    }

    let metadata_bytes = fs::read(dir.join(METADATA_FILE))?;
    let metadata: IndexMetadata = serde_json::from_slice(&metadata_bytes)
        .map_err(|e| SagaError::IndexCorrupt(format!("{METADATA_FILE} unreadable: {e}")))?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(SagaError::IndexCorrupt(format!(
            "{METADATA_FILE} format {} is not supported (expected {FORMAT_VERSION})",
            metadata.format_version
        )));
    }

    let vector_bytes = fs::read(dir.join(VECTORS_FILE))?;
    let actual_sha = sha256_hex(&vector_bytes);
    if actual_sha != metadata.vectors_sha256 {
        return Err(SagaError::IndexCorrupt(format!(
            "{VECTORS_FILE} checksum {actual_sha} does not match {METADATA_FILE} ({})",
            metadata.vectors_sha256
        )));
    }

    let (dimension, vectors) = decode_vectors(&vector_bytes)?;
    if dimension != metadata.dimension {
        return Err(SagaError::IndexCorrupt(format!(
            "{VECTORS_FILE} dimension {dimension} differs from {METADATA_FILE} dimension {}",
            metadata.dimension
        )));
    }
    if vectors.len() != metadata.row_count || metadata.slots.len() != metadata.row_count {
        return Err(SagaError::IndexCorrupt(format!(
            "row count mismatch: {} vectors, {} slots, metadata says {}",
            vectors.len(),
            metadata.slots.len(),
            metadata.row_count
        )));
    }

    let slots = metadata
        .slots
        .into_iter()
        .zip(vectors)
        .map(|(meta, vector)| Slot {
            entry: IndexEntry {
                record_id: meta.record_id,
                vector,
                content_hash: meta.content_hash,
            },
            tombstoned: meta.tombstoned,
        })
        .collect();

    VectorIndex::from_slots(dimension, metadata.provider_id, slots).map(Some)
}

/// Delete both artifacts. Missing files are not an error.
pub fn remove_artifacts(dir: &Path) -> Result<()> {
    for name in [METADATA_FILE, VECTORS_FILE] {
        match fs::remove_file(dir.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let tmp = dir.join(format!(".{name}.{}{TMP_SUFFIX}", uuid::Uuid::now_v7()));
    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, dir.join(name))?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Leftovers from a writer that died before its rename.
fn remove_temp_files(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') && name.ends_with(TMP_SUFFIX) {
            tracing::debug!(file = %name, "removing stale temporary index file");
            let _ = fs::remove_file(entry.path());
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
