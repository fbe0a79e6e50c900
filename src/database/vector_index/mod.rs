
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::embeddings::{EmbeddingVector, dot, ensure_dimension, l2_normalize};
use crate::{RagError, Result};

pub const INDEX_FILE_NAME: &str = "knowledge.index";
pub const METADATA_FILE_NAME: &str = "metadata.json";

const INDEX_MAGIC: &[u8; 8] = b"SRAGIDX1";
const HEADER_LEN: usize = 8 + 4 + 8;

/// Payload stored next to every indexed vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub knowledge_id: i64,
    pub title: String,
    pub category: Option<String>,
    pub text_preview: String,
}

/// One search result from the index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub record_id: u64,
    pub metadata: RecordMetadata,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_vectors: usize,
    pub dimension: usize,
    pub index_size_mb: f64,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone)]
struct IndexRecord {
    id: u64,
    vector: EmbeddingVector,
}

/// Immutable view of the index. Searches hold one of these for their whole duration.
#[derive(Debug, Clone, Default)]
struct IndexSnapshot {
    records: Vec<IndexRecord>,
    metadata: BTreeMap<u64, RecordMetadata>,
    next_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
    id_to_metadata: BTreeMap<u64, RecordMetadata>,
    next_id: u64,
    dimension: usize,
}

/// Brute-force cosine index over L2-normalised vectors, persisted as a binary
/// vector file plus a JSON metadata sidecar.
///
/// Records are append-only. Mutations are serialised through a writer lock and
/// publish a fresh snapshot only after both files have been replaced, so readers
/// always see a complete pre- or post-mutation state.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    index_path: PathBuf,
    metadata_path: PathBuf,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
}

impl VectorIndex {
    /// Open the index stored in `dir`, starting empty if the files are missing,
    /// unreadable, or were written for a different dimension.
    #[inline]
    pub fn open<P: AsRef<Path>>(dir: P, dimension: usize) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| {
            RagError::Persistence(format!(
                "Failed to create index directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let index_path = dir.join(INDEX_FILE_NAME);
        let metadata_path = dir.join(METADATA_FILE_NAME);

        let snapshot = if index_path.exists() || metadata_path.exists() {
            match load_snapshot(&index_path, &metadata_path, dimension) {
                Ok(snapshot) => {
                    info!(
                        "Loaded vector index with {} records from {}",
                        snapshot.records.len(),
                        dir.display()
                    );
                    snapshot
                }
                Err(e) => {
                    warn!(
                        "Discarding unreadable vector index in {}: {:#}",
                        dir.display(),
                        e
                    );
                    IndexSnapshot::default()
                }
            }
        } else {
            debug!("No vector index in {}, starting empty", dir.display());
            IndexSnapshot::default()
        };

        Ok(Self {
            dimension,
            index_path,
            metadata_path,
            snapshot: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.current().records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a vector and flush both files. Returns the new record id.
    #[inline]
    pub fn add(&self, vector: &[f32], metadata: RecordMetadata) -> Result<u64> {
        ensure_dimension(self.dimension, vector.len())?;
        let mut vector = vector.to_vec();
        l2_normalize(&mut vector);

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = IndexSnapshot::clone(&self.current());

        let id = next.next_id;
        next.records.push(IndexRecord { id, vector });
        next.metadata.insert(id, metadata);
        next.next_id += 1;

        self.publish(next)?;
        debug!("Added record {} to vector index", id);
        Ok(id)
    }

    /// Rank stored vectors against `query` by cosine similarity.
    ///
    /// Results are filtered by `category` when given and by `score >= min_score`,
    /// sorted by descending score with lower record ids first on ties, and cut to
    /// `top_k`. A query of the wrong length is a configuration error.
    #[inline]
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        category: Option<&str>,
        min_score: f32,
    ) -> Result<Vec<IndexHit>> {
        ensure_dimension(self.dimension, query.len())?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        l2_normalize(&mut query);

        let snapshot = self.current();
        let mut hits = Vec::new();
        for record in &snapshot.records {
            let Some(metadata) = snapshot.metadata.get(&record.id) else {
                continue;
            };
            if category.is_some_and(|c| metadata.category.as_deref() != Some(c)) {
                continue;
            }

            let score = dot(&query, &record.vector)?;
            if score >= min_score {
                hits.push(IndexHit {
                    record_id: record.id,
                    metadata: metadata.clone(),
                    score,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Replace the whole index with `entries`, inserted in the order given.
    /// Record ids restart from zero.
    #[inline]
    pub fn rebuild(&self, entries: Vec<(EmbeddingVector, RecordMetadata)>) -> Result<usize> {
        let mut next = IndexSnapshot::default();
        for (mut vector, metadata) in entries {
            ensure_dimension(self.dimension, vector.len())?;
            l2_normalize(&mut vector);

            let id = next.next_id;
            next.records.push(IndexRecord { id, vector });
            next.metadata.insert(id, metadata);
            next.next_id += 1;
        }
        let count = next.records.len();

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.publish(next)?;
        info!("Rebuilt vector index with {} records", count);
        Ok(count)
    }

    /// Records are never removed individually. Inactive entries are filtered out
    /// by the knowledge store and dropped on the next [`VectorIndex::rebuild`].
    #[inline]
    pub fn remove(&self, knowledge_id: i64) -> bool {
        debug!(
            "Ignoring removal of entry {} from vector index; rebuild to compact",
            knowledge_id
        );
        false
    }

    #[inline]
    pub fn stats(&self) -> IndexStats {
        let snapshot = self.current();
        let size_bytes = [&self.index_path, &self.metadata_path]
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum::<u64>();

        let categories: BTreeSet<&str> = snapshot
            .metadata
            .values()
            .filter_map(|m| m.category.as_deref())
            .collect();

        IndexStats {
            total_vectors: snapshot.records.len(),
            dimension: self.dimension,
            index_size_mb: (size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            categories: categories.into_iter().map(str::to_string).collect(),
        }
    }

    fn current(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Persist `next` and make it visible. Caller holds the writer lock.
    fn publish(&self, next: IndexSnapshot) -> Result<()> {
        self.persist(&next).map_err(|e| {
            RagError::Persistence(format!("Failed to write vector index: {:#}", e))
        })?;

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(())
    }

    fn persist(&self, snapshot: &IndexSnapshot) -> anyhow::Result<()> {
        let mut index_bytes =
            Vec::with_capacity(HEADER_LEN + snapshot.records.len() * (8 + self.dimension * 4));
        index_bytes.extend_from_slice(INDEX_MAGIC);
        index_bytes.extend_from_slice(&u32::try_from(self.dimension)?.to_le_bytes());
        index_bytes.extend_from_slice(&(snapshot.records.len() as u64).to_le_bytes());
        for record in &snapshot.records {
            index_bytes.extend_from_slice(&record.id.to_le_bytes());
            for value in &record.vector {
                index_bytes.extend_from_slice(&value.to_le_bytes());
            }
        }

        let metadata = MetadataFile {
            id_to_metadata: snapshot.metadata.clone(),
            next_id: snapshot.next_id,
            dimension: self.dimension,
        };
        let metadata_json =
            serde_json::to_vec_pretty(&metadata).context("Failed to serialize index metadata")?;

        write_atomically(&self.index_path, &index_bytes)?;
        write_atomically(&self.metadata_path, &metadata_json)?;
        Ok(())
    }
}

/// Write to a temporary file in the same directory, then rename over `path`
fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?;

    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.as_file().sync_all()?;
    file.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn load_snapshot(
    index_path: &Path,
    metadata_path: &Path,
    dimension: usize,
) -> anyhow::Result<IndexSnapshot> {
    let metadata_json = fs::read(metadata_path)
        .with_context(|| format!("Failed to read {}", metadata_path.display()))?;
    let metadata: MetadataFile =
        serde_json::from_slice(&metadata_json).context("Malformed index metadata")?;
    if metadata.dimension != dimension {
        bail!(
            "index was built with dimension {}, configured dimension is {}",
            metadata.dimension,
            dimension
        );
    }

    let bytes =
        fs::read(index_path).with_context(|| format!("Failed to read {}", index_path.display()))?;
    let records = decode_records(&bytes, dimension)?;

    let record_ids: BTreeSet<u64> = records.iter().map(|r| r.id).collect();
    let metadata_ids: BTreeSet<u64> = metadata.id_to_metadata.keys().copied().collect();
    if record_ids != metadata_ids {
        bail!("vector file and metadata sidecar describe different records");
    }
    if record_ids
        .last()
        .is_some_and(|&max_id| max_id >= metadata.next_id)
    {
        bail!("next record id {} is already in use", metadata.next_id);
    }

    Ok(IndexSnapshot {
        records,
        metadata: metadata.id_to_metadata,
        next_id: metadata.next_id,
    })
}

fn decode_records(bytes: &[u8], dimension: usize) -> anyhow::Result<Vec<IndexRecord>> {
    let (header, body) = bytes
        .split_at_checked(HEADER_LEN)
        .ok_or_else(|| anyhow!("vector file is truncated"))?;
    let (magic, header) = header.split_at(INDEX_MAGIC.len());
    if magic != INDEX_MAGIC {
        bail!("vector file has an unknown format");
    }

    let (stored_dimension, count) = header.split_at(4);
    let stored_dimension = u32::from_le_bytes(stored_dimension.try_into()?) as usize;
    let count = u64::from_le_bytes(count.try_into()?);
    if stored_dimension != dimension {
        bail!(
            "vector file dimension {} does not match {}",
            stored_dimension,
            dimension
        );
    }

    let record_len = 8 + dimension * 4;
    if body.len() as u64 != count.saturating_mul(record_len as u64) {
        bail!(
            "vector file holds {} bytes for {} records",
            body.len(),
            count
        );
    }

    let mut records = Vec::with_capacity(body.len() / record_len.max(1));
    let mut last_id = None;
    for chunk in body.chunks_exact(record_len) {
        let (id, values) = chunk.split_at(8);
        let id = u64::from_le_bytes(id.try_into()?);
        if last_id.is_some_and(|last| id <= last) {
            bail!("record ids are not strictly increasing");
        }
        last_id = Some(id);

        let vector = values
            .chunks_exact(4)
            .map(|b| b.try_into().map(f32::from_le_bytes))
            .collect::<std::result::Result<Vec<f32>, _>>()?;
        records.push(IndexRecord { id, vector });
    }

    Ok(records)
}
