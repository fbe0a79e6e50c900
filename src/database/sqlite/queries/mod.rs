
use super::models::{KnowledgeEntry, KnowledgeRow, NewKnowledgeEntry, encode_embedding};
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

const SELECT_ENTRY: &str = "SELECT id, title, content, category, tags, source, is_active, \
                            embedding, created_at, updated_at FROM knowledge_entries";

pub struct KnowledgeQueries;

impl KnowledgeQueries {
    #[inline]
    pub async fn create(
        pool: &SqlitePool,
        new_entry: &NewKnowledgeEntry,
        embedding: Option<&[f32]>,
    ) -> Result<KnowledgeEntry> {
        let now = Utc::now().naive_utc();
        let tags = serde_json::to_string(&new_entry.tags).context("Failed to encode tags")?;

        let id = sqlx::query(
            "INSERT INTO knowledge_entries \
             (title, content, category, tags, source, is_active, embedding, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)",
        )
        .bind(&new_entry.title)
        .bind(&new_entry.content)
        .bind(&new_entry.category)
        .bind(tags)
        .bind(&new_entry.source)
        .bind(embedding.map(encode_embedding))
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create knowledge entry")?
        .last_insert_rowid();

        debug!("Created knowledge entry {}", id);

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created knowledge entry"))
    }

    /// Fetch an entry regardless of its active flag
    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<KnowledgeEntry>> {
        let row = sqlx::query_as::<_, KnowledgeRow>(&format!("{} WHERE id = ?", SELECT_ENTRY))
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get knowledge entry by id")?;

        row.map(KnowledgeEntry::try_from).transpose()
    }

    #[inline]
    pub async fn list_active(pool: &SqlitePool) -> Result<Vec<KnowledgeEntry>> {
        Self::fetch_entries(
            pool,
            &format!("{} WHERE is_active = 1 ORDER BY id", SELECT_ENTRY),
        )
        .await
    }

    #[inline]
    pub async fn list_active_with_embeddings(pool: &SqlitePool) -> Result<Vec<KnowledgeEntry>> {
        Self::fetch_entries(
            pool,
            &format!(
                "{} WHERE is_active = 1 AND embedding IS NOT NULL ORDER BY id",
                SELECT_ENTRY
            ),
        )
        .await
    }

    #[inline]
    pub async fn list_active_missing_embeddings(pool: &SqlitePool) -> Result<Vec<KnowledgeEntry>> {
        Self::fetch_entries(
            pool,
            &format!(
                "{} WHERE is_active = 1 AND embedding IS NULL ORDER BY id",
                SELECT_ENTRY
            ),
        )
        .await
    }

    #[inline]
    pub async fn list_by_category(
        pool: &SqlitePool,
        category: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>> {
        let rows = sqlx::query_as::<_, KnowledgeRow>(&format!(
            "{} WHERE is_active = 1 AND category = ? ORDER BY id LIMIT ?",
            SELECT_ENTRY
        ))
        .bind(category)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(pool)
        .await
        .context("Failed to list knowledge entries by category")?;

        rows.into_iter().map(KnowledgeEntry::try_from).collect()
    }

    #[inline]
    pub async fn update_embedding(pool: &SqlitePool, id: i64, embedding: &[f32]) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            "UPDATE knowledge_entries SET embedding = ?, updated_at = ? WHERE id = ?",
        )
        .bind(encode_embedding(embedding))
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update knowledge entry embedding")?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite every editable column of an existing entry
    #[inline]
    pub async fn update(pool: &SqlitePool, entry: &KnowledgeEntry) -> Result<bool> {
        let tags = serde_json::to_string(&entry.tags).context("Failed to encode tags")?;

        let result = sqlx::query(
            "UPDATE knowledge_entries SET title = ?, content = ?, category = ?, tags = ?, \
             source = ?, embedding = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(&entry.category)
        .bind(tags)
        .bind(&entry.source)
        .bind(entry.embedding.as_deref().map(encode_embedding))
        .bind(entry.updated_at)
        .bind(entry.id)
        .execute(pool)
        .await
        .context("Failed to update knowledge entry")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn set_active(pool: &SqlitePool, id: i64, active: bool) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            "UPDATE knowledge_entries SET is_active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(active)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to change knowledge entry status")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn count_active(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_entries WHERE is_active = 1")
            .fetch_one(pool)
            .await
            .context("Failed to count active knowledge entries")
    }

    #[inline]
    pub async fn count_active_with_embeddings(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM knowledge_entries WHERE is_active = 1 AND embedding IS NOT NULL",
        )
        .fetch_one(pool)
        .await
        .context("Failed to count embedded knowledge entries")
    }

    /// Active entry counts per category, uncategorised entries excluded
    #[inline]
    pub async fn category_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
        sqlx::query_as(
            "SELECT category, COUNT(*) FROM knowledge_entries \
             WHERE is_active = 1 AND category IS NOT NULL \
             GROUP BY category ORDER BY category",
        )
        .fetch_all(pool)
        .await
        .context("Failed to count knowledge entries by category")
    }

    async fn fetch_entries(pool: &SqlitePool, sql: &str) -> Result<Vec<KnowledgeEntry>> {
        let rows = sqlx::query_as::<_, KnowledgeRow>(sql)
            .fetch_all(pool)
            .await
            .context("Failed to list knowledge entries")?;

        rows.into_iter().map(KnowledgeEntry::try_from).collect()
    }
}
