
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const EMBEDDING_API_KEY_ENV: &str = "NOTES_RAG_EMBEDDING_API_KEY";
pub const CHAT_API_KEY_ENV: &str = "NOTES_RAG_CHAT_API_KEY";
pub const QDRANT_API_KEY_ENV: &str = "NOTES_RAG_QDRANT_API_KEY";

/// Upper bound for the number of chunks retrieved per question
pub const MAX_TOP_K: usize = 100;

const SUPPORTED_DISTANCES: &[&str] = &["Cosine", "Euclid", "Dot", "Manhattan"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://open.bigmodel.cn/api/paas/v4".to_string(),
            api_key: String::new(),
            model: "embedding-3".to_string(),
            dimensions: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com/v1".to_string(),
            api_key: String::new(),
            model: "deepseek-chat".to_string(),
            temperature: 0.7,
            max_tokens: 8192,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub distance: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: None,
            collection: "note_vectors".to_string(),
            distance: "Cosine".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    pub top_k: usize,
    pub chunk_size: usize,
    pub embedding_concurrency: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            chunk_size: crate::embeddings::chunking::DEFAULT_MAX_CHUNK_SIZE,
            embedding_concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub chat_timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            chat_timeout_seconds: 60,
            retry_attempts: 3,
        }
    }
}

impl HttpConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    #[inline]
    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_seconds)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max tokens: {0} (must be between 1 and 65536)")]
    InvalidMaxTokens(u32),
    #[error("Invalid collection name: {0} (cannot be empty)")]
    InvalidCollection(String),
    #[error("Invalid distance metric: {0} (must be one of Cosine, Euclid, Dot, Manhattan)")]
    InvalidDistance(String),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid chunk size: {0} (must be between 100 and 8192)")]
    InvalidChunkSize(usize),
    #[error("Invalid embedding concurrency: {0} (must be between 1 and 32)")]
    InvalidConcurrency(usize),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration directory, `~/.notes-rag`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".notes-rag"))
            .or_else(|| dirs::data_dir().map(|data| data.join("notes-rag")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults when the file is absent.
    /// API keys set in the environment take precedence over the file.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();
        config.apply_env_overrides();

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

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("metadata.db")
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.chat.validate()?;
        self.qdrant.validate()?;
        self.rag.validate()?;
        self.http.validate()?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(key) = env_value(EMBEDDING_API_KEY_ENV) {
            self.embedding.api_key = key;
        }
        if let Some(key) = env_value(CHAT_API_KEY_ENV) {
            self.chat.api_key = key;
        }
        if let Some(key) = env_value(QDRANT_API_KEY_ENV) {
            self.qdrant.api_key = Some(key);
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_url(value: &str) -> Result<Url, ConfigError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        _ => Err(ConfigError::InvalidUrl(value.to_string())),
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_url(&self.base_url)?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(64..=4096).contains(&self.dimensions) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimensions));
        }

        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_dimensions(&mut self, dimensions: u32) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimensions) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimensions));
        }
        self.dimensions = dimensions;
        Ok(())
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_url(&self.base_url)?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(1..=65536).contains(&self.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        Ok(())
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidTemperature(temperature));
        }
        self.temperature = temperature;
        Ok(())
    }
}

impl QdrantConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_url(&self.url)?;

        if self.collection.trim().is_empty() {
            return Err(ConfigError::InvalidCollection(self.collection.clone()));
        }

        if !SUPPORTED_DISTANCES.contains(&self.distance.as_str()) {
            return Err(ConfigError::InvalidDistance(self.distance.clone()));
        }

        Ok(())
    }

    pub fn set_distance(&mut self, distance: String) -> Result<(), ConfigError> {
        if !SUPPORTED_DISTANCES.contains(&distance.as_str()) {
            return Err(ConfigError::InvalidDistance(distance));
        }
        self.distance = distance;
        Ok(())
    }

    #[inline]
    pub fn supported_distances() -> &'static [&'static str] {
        SUPPORTED_DISTANCES
    }
}

impl RagConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        if !(100..=8192).contains(&self.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }

        if !(1..=32).contains(&self.embedding_concurrency) {
            return Err(ConfigError::InvalidConcurrency(self.embedding_concurrency));
        }

        Ok(())
    }
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for timeout in [self.timeout_seconds, self.chat_timeout_seconds] {
            if !(1..=600).contains(&timeout) {
                return Err(ConfigError::InvalidTimeout(timeout));
            }
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }
}
