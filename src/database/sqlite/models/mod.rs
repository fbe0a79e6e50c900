
use anyhow::{Context, bail};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{RagError, Result};

/// A piece of business knowledge that can be retrieved into prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub is_active: bool,
    /// Derived from title and content; recomputed whenever either changes
    pub embedding: Option<Vec<f32>>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NewKnowledgeEntry {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub source: Option<String>,
}

/// Partial edit of a knowledge entry; `None` leaves the field unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KnowledgeUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub source: Option<String>,
}

impl KnowledgeEntry {
    /// Text fed to the embedding model
    #[inline]
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.title, self.content)
    }

    /// Apply `update` and return the edited entry. The original is untouched.
    ///
    /// The stored embedding is dropped when title or content change, since it no
    /// longer describes the entry.
    #[inline]
    pub fn merge(&self, update: &KnowledgeUpdate) -> Result<Self> {
        let merged = Self {
            id: self.id,
            title: update.title.clone().unwrap_or_else(|| self.title.clone()),
            content: update
                .content
                .clone()
                .unwrap_or_else(|| self.content.clone()),
            category: update.category.clone().or_else(|| self.category.clone()),
            tags: update.tags.clone().unwrap_or_else(|| self.tags.clone()),
            source: update.source.clone().or_else(|| self.source.clone()),
            is_active: self.is_active,
            embedding: None,
            created_at: self.created_at,
            updated_at: Utc::now().naive_utc(),
        };
        validate_text_fields(&merged.title, &merged.content)?;

        if merged.title == self.title && merged.content == self.content {
            Ok(Self {
                embedding: self.embedding.clone(),
                ..merged
            })
        } else {
            Ok(merged)
        }
    }

    #[inline]
    pub fn needs_embedding(&self) -> bool {
        self.embedding.is_none()
    }
}

impl NewKnowledgeEntry {
    #[inline]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[inline]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        validate_text_fields(&self.title, &self.content)
    }

    /// Text fed to the embedding model
    #[inline]
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.title, self.content)
    }
}

fn validate_text_fields(title: &str, content: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(RagError::InvalidInput(
            "knowledge entry title cannot be empty".to_string(),
        ));
    }
    if content.trim().is_empty() {
        return Err(RagError::InvalidInput(
            "knowledge entry content cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Raw `knowledge_entries` row
#[derive(Debug, Clone, FromRow)]
pub(crate) struct KnowledgeRow {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub tags: String,
    pub source: Option<String>,
    pub is_active: bool,
    pub embedding: Option<Vec<u8>>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<KnowledgeRow> for KnowledgeEntry {
    type Error = anyhow::Error;

    #[inline]
    fn try_from(row: KnowledgeRow) -> anyhow::Result<Self> {
        let tags: Vec<String> = serde_json::from_str(&row.tags)
            .with_context(|| format!("Malformed tags for knowledge entry {}", row.id))?;
        let embedding = row
            .embedding
            .as_deref()
            .map(decode_embedding)
            .transpose()
            .with_context(|| format!("Malformed embedding for knowledge entry {}", row.id))?;

        Ok(Self {
            id: row.id,
            title: row.title,
            content: row.content,
            category: row.category,
            tags,
            source: row.source,
            is_active: row.is_active,
            embedding,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Little-endian f32 bytes, as stored in the `embedding` column
#[inline]
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[inline]
pub fn decode_embedding(bytes: &[u8]) -> anyhow::Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        bail!("embedding blob of {} bytes is not a whole number of f32s", bytes.len());
    }

    bytes
        .chunks_exact(4)
        .map(|b| {
            b.try_into()
                .map(f32::from_le_bytes)
                .map_err(anyhow::Error::from)
        })
        .collect()
}
