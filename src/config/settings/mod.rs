
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::prompt::scenario::{CustomScenario, ScenarioKind};

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 300;
pub const BASE_DIR_ENV: &str = "SUPPORT_RAG_HOME";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Optional directory overriding the built-in scenario prompt templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts_dir: Option<PathBuf>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub scenarios: Vec<CustomScenario>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStrategy {
    /// Feature hashing, no external model
    #[default]
    Hashed,
    /// Pretrained sentence encoder served by Ollama
    Ollama,
}

impl std::fmt::Display for EmbeddingStrategy {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            EmbeddingStrategy::Hashed => write!(f, "hashed"),
            EmbeddingStrategy::Ollama => write!(f, "ollama"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub strategy: EmbeddingStrategy,
    pub dimension: u32,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            strategy: EmbeddingStrategy::Hashed,
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "all-minilm:latest".to_string(),
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Similarity floor for knowledge store searches
    pub min_similarity: f32,
    /// Score floor for vector index preview searches
    pub index_min_score: f32,
    /// Number of knowledge matches placed in a prompt
    pub prompt_top_k: usize,
    /// Number of trailing conversation turns placed in a prompt
    pub history_window: usize,
    /// Characters of content kept as an index preview
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.05,
            index_min_score: 0.3,
            prompt_top_k: 3,
            history_window: 6,
            preview_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "llama3.2:latest".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 3 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Hashed embedding dimension {0} must be a multiple of 3")]
    UnbandedDimension(u32),
    #[error("Invalid max chunk size: {0} (must be between 100 and 20000)")]
    InvalidMaxChunkSize(usize),
    #[error("Overlap ({0}) must be smaller than max chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid similarity threshold: {0} (must be between -1.0 and 1.0)")]
    InvalidSimilarity(f32),
    #[error("Invalid prompt top-k: {0} (must be between 1 and 20)")]
    InvalidTopK(usize),
    #[error("Invalid history window: {0} (must be 50 or less)")]
    InvalidHistoryWindow(usize),
    #[error("Invalid preview length: {0} (must be between 1 and 10000)")]
    InvalidPreviewLength(usize),
    #[error("Invalid generation timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid scenario '{0}': {1}")]
    InvalidScenario(String, String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Defaults rooted at `base_dir`
    #[inline]
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self::with_base_dir(config_dir));
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Resolve the base directory: explicit path, then `SUPPORT_RAG_HOME`, then the
    /// platform config directory.
    #[inline]
    pub fn resolve_base_dir(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = explicit {
            return Ok(dir);
        }
        if let Some(dir) = std::env::var_os(BASE_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }
        dirs::config_dir()
            .map(|dir| dir.join("support-rag"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.chunking.validate()?;
        self.retrieval.validate()?;
        self.generation.validate()?;
        self.validate_scenarios()?;
        Ok(())
    }

    fn validate_scenarios(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for scenario in &self.scenarios {
            let id = scenario.id.trim();
            if id.is_empty() {
                return Err(ConfigError::InvalidScenario(
                    scenario.id.clone(),
                    "id cannot be empty".to_string(),
                ));
            }
            if ScenarioKind::from_id(id).is_some() {
                return Err(ConfigError::InvalidScenario(
                    scenario.id.clone(),
                    "id collides with a built-in scenario".to_string(),
                ));
            }
            if !seen.insert(id.to_uppercase()) {
                return Err(ConfigError::InvalidScenario(
                    scenario.id.clone(),
                    "duplicate id".to_string(),
                ));
            }
            if scenario.system_prompt.trim().is_empty() {
                return Err(ConfigError::InvalidScenario(
                    scenario.id.clone(),
                    "system prompt cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite database holding knowledge entries
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("knowledge.db")
    }

    /// Get the directory holding the vector index and its metadata sidecar
    #[inline]
    pub fn index_dir(&self) -> PathBuf {
        self.get_base_dir().join("index")
    }
}

fn endpoint_url(protocol: &str, host: &str, port: u16) -> Result<Url, ConfigError> {
    let url_str = format!("{}://{}:{}", protocol, host, port);
    Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
}

fn validate_endpoint(protocol: &str, host: &str, port: u16) -> Result<(), ConfigError> {
    if protocol != "http" && protocol != "https" {
        return Err(ConfigError::InvalidProtocol(protocol.to_string()));
    }
    endpoint_url(protocol, host, port)?;
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }
    Ok(())
}

impl EmbeddingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(3..=4096).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        match self.strategy {
            EmbeddingStrategy::Hashed => {
                if self.dimension % 3 != 0 {
                    return Err(ConfigError::UnbandedDimension(self.dimension));
                }
            }
            EmbeddingStrategy::Ollama => {
                validate_endpoint(&self.protocol, &self.host, self.port)?;

                if self.model.trim().is_empty() {
                    return Err(ConfigError::InvalidModel(self.model.clone()));
                }

                if self.batch_size == 0 || self.batch_size > 1000 {
                    return Err(ConfigError::InvalidBatchSize(self.batch_size));
                }
            }
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        endpoint_url(&self.protocol, &self.host, self.port)
    }

    #[inline]
    pub fn set_strategy(&mut self, strategy: EmbeddingStrategy) -> Result<(), ConfigError> {
        let temp_config = EmbeddingConfig {
            strategy,
            ..self.clone()
        };
        temp_config.validate()?;
        self.strategy = strategy;
        Ok(())
    }

    #[inline]
    pub fn set_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        let temp_config = EmbeddingConfig {
            dimension,
            ..self.clone()
        };
        temp_config.validate()?;
        self.dimension = dimension;
        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(100..=20_000).contains(&self.max_chunk_size) {
            return Err(ConfigError::InvalidMaxChunkSize(self.max_chunk_size));
        }

        if self.overlap >= self.max_chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                self.overlap,
                self.max_chunk_size,
            ));
        }

        Ok(())
    }
}

impl RetrievalConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        for threshold in [self.min_similarity, self.index_min_score] {
            if !(-1.0..=1.0).contains(&threshold) {
                return Err(ConfigError::InvalidSimilarity(threshold));
            }
        }

        if !(1..=20).contains(&self.prompt_top_k) {
            return Err(ConfigError::InvalidTopK(self.prompt_top_k));
        }

        if self.history_window > 50 {
            return Err(ConfigError::InvalidHistoryWindow(self.history_window));
        }

        if !(1..=10_000).contains(&self.preview_chars) {
            return Err(ConfigError::InvalidPreviewLength(self.preview_chars));
        }

        Ok(())
    }
}

impl GenerationConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port)?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(1..=600).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        endpoint_url(&self.protocol, &self.host, self.port)
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        validate_endpoint(&self.protocol, &host, self.port)?;
        self.host = host;
        Ok(())
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }
}
