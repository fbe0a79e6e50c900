// Knowledge module
// Facade over the sqlite entry store, the embedding model and the vector index

pub mod documents;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, RetrievalConfig};
use crate::database::sqlite::{
    Database, KnowledgeEntry, KnowledgeQueries, KnowledgeUpdate, NewKnowledgeEntry,
};
use crate::database::{IndexStats, RecordMetadata, VectorIndex};
use crate::embeddings::{
    EmbeddingModel, EmbeddingVector, TextChunker, build_embedder, cosine_similarity,
    ensure_dimension,
};
use crate::prompt::scenario::business_context_category;
use crate::{RagError, Result};

pub use documents::{
    DocumentFormat, DocumentMetadata, ExtractedText, MAX_DOCUMENT_BYTES, ParsedDocument,
    extract_text, parse_document,
};

/// A knowledge entry together with its similarity to a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntry {
    pub entry: KnowledgeEntry,
    pub score: f32,
}

/// Preview-sized result of a search against the vector index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSearchResult {
    pub knowledge_id: i64,
    pub title: String,
    pub category: Option<String>,
    pub text_preview: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeStats {
    pub total_entries: i64,
    pub entries_with_embeddings: i64,
    /// Percentage of active entries that carry an embedding
    pub embedding_coverage: f64,
    pub categories: Vec<CategoryCount>,
    pub embedding_model: String,
    pub index: IndexStats,
}

/// A document's text to be split into knowledge entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub raw_text: String,
    /// Title shared by every chunk; defaults to `"<source> - Part <n>"`
    pub title: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub source: String,
}

impl IngestRequest {
    #[inline]
    pub fn new(raw_text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            title: None,
            category: None,
            tags: Vec::new(),
            source: source.into(),
        }
    }

    /// Business-context upload for a scenario, filed under its
    /// `<SCENARIO>_BUSINESS_CONTEXT` category
    #[inline]
    pub fn for_scenario(
        scenario_id: &str,
        raw_text: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            category: Some(business_context_category(scenario_id)),
            tags: vec![
                scenario_id.to_string(),
                "business_context".to_string(),
                "uploaded".to_string(),
            ],
            ..Self::new(raw_text, source)
        }
    }

    #[inline]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub chunks_created: usize,
    pub total_characters: usize,
    pub entries: Vec<KnowledgeEntry>,
}

/// Knowledge entries with semantic search.
///
/// Entries live in sqlite together with their embeddings; the vector index holds
/// the embeddings of active entries for preview search. Deleting is soft: an
/// inactive entry stays stored but never shows up in a read or search.
///
/// Index writers take `index_writes` for the whole database read or write that
/// the index mutation depends on, so an add never races a rebuild.
pub struct KnowledgeStore {
    database: Database,
    embedder: Arc<dyn EmbeddingModel>,
    index: Arc<VectorIndex>,
    index_writes: Mutex<()>,
    chunker: TextChunker,
    retrieval: RetrievalConfig,
}

impl std::fmt::Debug for KnowledgeStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore")
            .field("embedder", &self.embedder.name())
            .field("index", &self.index)
            .field("chunker", &self.chunker)
            .field("retrieval", &self.retrieval)
            .finish_non_exhaustive()
    }
}

impl KnowledgeStore {
    /// Open the store under the configured base directory
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RagError::Configuration(e.to_string()))?;

        let embedder = build_embedder(&config.embedding)?;
        let database = Database::new(config.database_path())
            .await
            .map_db_err()?;
        let index = VectorIndex::open(config.index_dir(), embedder.dimension())?;

        let store = Self::new(
            database,
            embedder,
            Arc::new(index),
            TextChunker::new(config.chunking),
            config.retrieval.clone(),
        );
        store.reconcile_index().await?;
        Ok(store)
    }

    #[inline]
    pub fn new(
        database: Database,
        embedder: Arc<dyn EmbeddingModel>,
        index: Arc<VectorIndex>,
        chunker: TextChunker,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            database,
            embedder,
            index,
            index_writes: Mutex::new(()),
            chunker,
            retrieval,
        }
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub fn embedder(&self) -> &Arc<dyn EmbeddingModel> {
        &self.embedder
    }

    #[inline]
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    #[inline]
    pub fn retrieval(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    /// Check that the embedding backend is reachable and serves its model
    #[inline]
    pub async fn embedder_health(&self) -> Result<()> {
        let embedder = Arc::clone(&self.embedder);
        tokio::task::spawn_blocking(move || embedder.health_check())
            .await
            .context("Health check task failed")?
    }

    /// Embed `title + " " + content` and store the entry as active
    #[inline]
    pub async fn add_entry(&self, entry: NewKnowledgeEntry) -> Result<KnowledgeEntry> {
        entry.validate()?;
        let embedding = self.embed(entry.embedding_text()).await?;

        let _writer = self.index_writes.lock().await;
        let created = KnowledgeQueries::create(self.database.pool(), &entry, Some(&embedding))
            .await
            .map_db_err()?;

        let metadata = self.record_metadata(&created);
        let record_id = self
            .with_index(move |index| index.add(&embedding, metadata))
            .await?;

        info!(
            "Added knowledge entry {} '{}' (index record {})",
            created.id, created.title, record_id
        );
        Ok(created)
    }

    /// Search active entries with the configured similarity floor
    #[inline]
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<KnowledgeEntry>> {
        let scored = self
            .search_scored(query, limit, category, self.retrieval.min_similarity)
            .await?;
        Ok(scored.into_iter().map(|hit| hit.entry).collect())
    }

    /// Rank active, embedded entries by cosine similarity to `query`.
    ///
    /// Results keep id order on equal scores, drop anything below
    /// `min_similarity` and are cut to `limit`. Stored embeddings of another
    /// dimension are a configuration error; run [`KnowledgeStore::rebuild_index`]
    /// after switching models.
    #[inline]
    pub async fn search_scored(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
        min_similarity: f32,
    ) -> Result<Vec<ScoredEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embed(query.to_string()).await?;

        let entries = KnowledgeQueries::list_active_with_embeddings(self.database.pool())
            .await
            .map_db_err()?;

        let mut scored = Vec::new();
        for entry in entries {
            if category.is_some_and(|c| entry.category.as_deref() != Some(c)) {
                continue;
            }
            let Some(embedding) = entry.embedding.as_deref() else {
                continue;
            };
            let score = cosine_similarity(&query_embedding, embedding)?;
            scored.push(ScoredEntry { entry, score });
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.retain(|hit| hit.score >= min_similarity);
        scored.truncate(limit);

        debug!(
            "Knowledge search for '{}' returned {} entries",
            query,
            scored.len()
        );
        Ok(scored)
    }

    /// Recompute one entry's embedding. Returns `false` when the id is unknown.
    #[inline]
    pub async fn update_embedding(&self, id: i64) -> Result<bool> {
        let Some(entry) = KnowledgeQueries::get_by_id(self.database.pool(), id)
            .await
            .map_db_err()?
        else {
            return Ok(false);
        };

        let embedding = self.embed(entry.embedding_text()).await?;
        let updated = KnowledgeQueries::update_embedding(self.database.pool(), id, &embedding)
            .await
            .map_db_err()?;

        if updated && entry.is_active {
            self.sync_index().await?;
        }
        Ok(updated)
    }

    /// Embed every active entry that has no embedding yet.
    ///
    /// Failures are logged and skipped; the return value counts the entries
    /// that were updated.
    #[inline]
    pub async fn bulk_update_embeddings(&self) -> Result<usize> {
        let pending = KnowledgeQueries::list_active_missing_embeddings(self.database.pool())
            .await
            .map_db_err()?;

        let texts = pending.iter().map(KnowledgeEntry::embedding_text).collect();
        let embeddings: Vec<Option<EmbeddingVector>> = match self.embed_many(texts).await {
            Ok(embeddings) => embeddings.into_iter().map(Some).collect(),
            Err(e) => {
                warn!("Batch embedding failed, retrying entries one by one: {}", e);
                let mut single = Vec::with_capacity(pending.len());
                for entry in &pending {
                    single.push(
                        self.embed(entry.embedding_text())
                            .await
                            .inspect_err(|err| {
                                warn!("Failed to embed knowledge entry {}: {}", entry.id, err);
                            })
                            .ok(),
                    );
                }
                single
            }
        };

        let mut updated = 0;
        for (entry, embedding) in pending.iter().zip(embeddings) {
            let Some(embedding) = embedding else {
                continue;
            };

            match KnowledgeQueries::update_embedding(self.database.pool(), entry.id, &embedding)
                .await
            {
                Ok(true) => updated += 1,
                Ok(false) => warn!("Knowledge entry {} disappeared during update", entry.id),
                Err(e) => warn!(
                    "Failed to store embedding for knowledge entry {}: {:#}",
                    entry.id, e
                ),
            }
        }

        if updated > 0 {
            self.sync_index().await?;
        }
        info!(
            "Updated embeddings for {} of {} knowledge entries",
            updated,
            pending.len()
        );
        Ok(updated)
    }

    /// Entries most similar to the content of entry `id`, never including `id`
    /// itself. Unknown, inactive and unembedded entries have no relatives.
    #[inline]
    pub async fn related_entries(&self, id: i64, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        let Some(source) = KnowledgeQueries::get_by_id(self.database.pool(), id)
            .await
            .map_db_err()?
            .filter(|entry| entry.is_active && entry.embedding.is_some())
        else {
            return Ok(Vec::new());
        };

        let related = self
            .search_scored(
                &source.content,
                limit.saturating_add(1),
                None,
                self.retrieval.min_similarity,
            )
            .await?;

        Ok(related
            .into_iter()
            .map(|hit| hit.entry)
            .filter(|entry| entry.id != id)
            .take(limit)
            .collect())
    }

    #[inline]
    pub async fn by_category(&self, category: &str, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        KnowledgeQueries::list_by_category(self.database.pool(), category, limit)
            .await
            .map_db_err()
    }

    /// Active entries carrying at least one of `tags`, in id order
    #[inline]
    pub async fn by_tags(&self, tags: &[String], limit: usize) -> Result<Vec<KnowledgeEntry>> {
        let entries = KnowledgeQueries::list_active(self.database.pool())
            .await
            .map_db_err()?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.tags.iter().any(|tag| tags.contains(tag)))
            .take(limit)
            .collect())
    }

    #[inline]
    pub async fn list_active(&self) -> Result<Vec<KnowledgeEntry>> {
        KnowledgeQueries::list_active(self.database.pool())
            .await
            .map_db_err()
    }

    /// Fetch an active entry
    #[inline]
    pub async fn get(&self, id: i64) -> Result<Option<KnowledgeEntry>> {
        Ok(KnowledgeQueries::get_by_id(self.database.pool(), id)
            .await
            .map_db_err()?
            .filter(|entry| entry.is_active))
    }

    /// Soft delete. Returns `false` when the id is unknown.
    #[inline]
    pub async fn deactivate(&self, id: i64) -> Result<bool> {
        self.set_active(id, false).await
    }

    #[inline]
    pub async fn reactivate(&self, id: i64) -> Result<bool> {
        self.set_active(id, true).await
    }

    /// Apply a partial edit. The embedding is recomputed when title or content
    /// change. Returns `None` for unknown ids.
    #[inline]
    pub async fn update_entry(
        &self,
        id: i64,
        update: &KnowledgeUpdate,
    ) -> Result<Option<KnowledgeEntry>> {
        let Some(existing) = KnowledgeQueries::get_by_id(self.database.pool(), id)
            .await
            .map_db_err()?
        else {
            return Ok(None);
        };

        let mut merged = existing.merge(update)?;
        if merged.needs_embedding() {
            merged.embedding = Some(self.embed(merged.embedding_text()).await?);
        }

        KnowledgeQueries::update(self.database.pool(), &merged)
            .await
            .map_db_err()?;
        if merged.is_active {
            self.sync_index().await?;
        }

        debug!("Updated knowledge entry {}", id);
        Ok(Some(merged))
    }

    #[inline]
    pub async fn stats(&self) -> Result<KnowledgeStats> {
        let pool = self.database.pool();
        let total_entries = KnowledgeQueries::count_active(pool).await.map_db_err()?;
        let entries_with_embeddings = KnowledgeQueries::count_active_with_embeddings(pool)
            .await
            .map_db_err()?;
        let categories = KnowledgeQueries::category_counts(pool)
            .await
            .map_db_err()?
            .into_iter()
            .map(|(name, count)| CategoryCount { name, count })
            .collect();

        let embedding_coverage = if total_entries > 0 {
            entries_with_embeddings as f64 / total_entries as f64 * 100.0
        } else {
            0.0
        };

        Ok(KnowledgeStats {
            total_entries,
            entries_with_embeddings,
            embedding_coverage,
            categories,
            embedding_model: self.embedder.name(),
            index: self.index.stats(),
        })
    }

    /// Search the vector index, returning previews of at most `limit` distinct
    /// active entries scoring at least the configured index floor.
    #[inline]
    pub async fn search_index(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<IndexSearchResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embed(query.to_string()).await?;
        let hits = self.index.search(
            &query_embedding,
            self.index.len(),
            category,
            self.retrieval.index_min_score,
        )?;

        let active: HashSet<i64> = KnowledgeQueries::list_active(self.database.pool())
            .await
            .map_db_err()?
            .into_iter()
            .map(|entry| entry.id)
            .collect();

        let mut seen = HashSet::new();
        Ok(hits
            .into_iter()
            .filter(|hit| active.contains(&hit.metadata.knowledge_id))
            .filter(|hit| seen.insert(hit.metadata.knowledge_id))
            .take(limit)
            .map(|hit| IndexSearchResult {
                knowledge_id: hit.metadata.knowledge_id,
                title: hit.metadata.title,
                category: hit.metadata.category,
                text_preview: hit.metadata.text_preview,
                score: hit.score,
            })
            .collect())
    }

    /// Re-embed every active entry with the current model and rebuild the index
    /// from scratch. Needed after changing embedding strategy or dimension.
    #[inline]
    pub async fn rebuild_index(&self) -> Result<usize> {
        let _writer = self.index_writes.lock().await;
        let entries = KnowledgeQueries::list_active(self.database.pool())
            .await
            .map_db_err()?;

        let texts = entries.iter().map(KnowledgeEntry::embedding_text).collect();
        let embeddings = self.embed_many(texts).await?;

        let mut records = Vec::with_capacity(entries.len());
        for (entry, embedding) in entries.iter().zip(embeddings) {
            KnowledgeQueries::update_embedding(self.database.pool(), entry.id, &embedding)
                .await
                .map_db_err()?;
            records.push((embedding, self.record_metadata(entry)));
        }

        let count = self.with_index(move |index| index.rebuild(records)).await?;
        info!(
            "Re-embedded {} knowledge entries with {}",
            count,
            self.embedder.name()
        );
        Ok(count)
    }

    /// Split a document into chunks and store each chunk as an entry
    #[inline]
    pub async fn ingest_document(&self, request: IngestRequest) -> Result<IngestOutcome> {
        if request.raw_text.trim().is_empty() {
            return Err(RagError::Ingestion(format!(
                "{} contains no text",
                request.source
            )));
        }

        let chunks: Vec<_> = self.chunker.chunk(&request.raw_text).collect();
        let mut entries = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.into_iter().enumerate() {
            let title = request
                .title
                .clone()
                .unwrap_or_else(|| format!("{} - Part {}", request.source, i + 1));

            let entry = NewKnowledgeEntry {
                title,
                content: chunk.text,
                category: request.category.clone(),
                tags: request.tags.clone(),
                source: Some(request.source.clone()),
            };
            entries.push(self.add_entry(entry).await?);
        }

        info!(
            "Ingested {} into {} knowledge entries",
            request.source,
            entries.len()
        );
        Ok(IngestOutcome {
            chunks_created: entries.len(),
            total_characters: request.raw_text.chars().count(),
            entries,
        })
    }

    async fn set_active(&self, id: i64, active: bool) -> Result<bool> {
        let changed = KnowledgeQueries::set_active(self.database.pool(), id, active)
            .await
            .map_db_err()?;
        if changed {
            if !active {
                self.index.remove(id);
            }
            self.sync_index().await?;
            info!(
                "Knowledge entry {} {}",
                id,
                if active { "reactivated" } else { "deactivated" }
            );
        }
        Ok(changed)
    }

    /// Rebuild the index from the stored embeddings of active entries, in id order
    async fn sync_index(&self) -> Result<usize> {
        let _writer = self.index_writes.lock().await;
        let entries = KnowledgeQueries::list_active_with_embeddings(self.database.pool())
            .await
            .map_db_err()?;

        let dimension = self.index.dimension();
        let records: Vec<_> = entries
            .iter()
            .filter_map(|entry| {
                let embedding = entry.embedding.clone()?;
                if embedding.len() == dimension {
                    Some((embedding, self.record_metadata(entry)))
                } else {
                    warn!(
                        "Skipping knowledge entry {} with {}-dimensional embedding; index expects {}",
                        entry.id,
                        embedding.len(),
                        dimension
                    );
                    None
                }
            })
            .collect();

        self.with_index(move |index| index.rebuild(records)).await
    }

    /// Bring the index back in line with the database after a reset or crash
    async fn reconcile_index(&self) -> Result<()> {
        let expected = KnowledgeQueries::count_active_with_embeddings(self.database.pool())
            .await
            .map_db_err()?;

        if usize::try_from(expected).ok() != Some(self.index.len()) {
            info!(
                "Vector index holds {} records but {} entries are embedded, resyncing",
                self.index.len(),
                expected
            );
            self.sync_index().await?;
        }
        Ok(())
    }

    fn record_metadata(&self, entry: &KnowledgeEntry) -> RecordMetadata {
        RecordMetadata {
            knowledge_id: entry.id,
            title: entry.title.clone(),
            category: entry.category.clone(),
            text_preview: preview(&entry.content, self.retrieval.preview_chars),
        }
    }

    async fn embed(&self, text: String) -> Result<EmbeddingVector> {
        let embedder = Arc::clone(&self.embedder);
        let embedding = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .context("Embedding task failed")??;

        ensure_dimension(self.embedder.dimension(), embedding.len())?;
        Ok(embedding)
    }

    /// Batch counterpart of [`Self::embed`]
    async fn embed_many(&self, texts: Vec<String>) -> Result<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let embedder = Arc::clone(&self.embedder);
        let embeddings = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
            .await
            .context("Embedding task failed")??;

        if embeddings.len() != expected {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, got {}",
                expected,
                embeddings.len()
            )));
        }
        for embedding in &embeddings {
            ensure_dimension(self.embedder.dimension(), embedding.len())?;
        }
        Ok(embeddings)
    }

    async fn with_index<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&VectorIndex) -> Result<T> + Send + 'static,
    {
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || f(&index))
            .await
            .context("Vector index task failed")?
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut
#[inline]
pub fn preview(text: &str, max_chars: usize) -> String {
    text.char_indices().nth(max_chars).map_or_else(
        || text.to_string(),
        |(end, _)| format!("{}...", text.get(..end).unwrap_or_default()),
    )
}

trait DatabaseResultExt<T> {
    fn map_db_err(self) -> Result<T>;
}

impl<T> DatabaseResultExt<T> for anyhow::Result<T> {
    fn map_db_err(self) -> Result<T> {
        self.map_err(|e| RagError::Database(format!("{:#}", e)))
    }
}
