//! Configuration management for Vitaq
//!
//! Loads a TOML configuration file, applies `VITAQ_SECTION__KEY`
//! environment overrides, and validates the result before any component
//! is constructed from it.

use crate::error::{Result, VitaqError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub generation: GenerationConfig,
    pub cache: CacheConfig,
    pub corpus: CorpusConfig,
}

/// External OpenAI-compatible service endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL; `/v1/embeddings` and `/v1/chat/completions` are appended
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// Embedding adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Vector dimension; also the dimension of zero-vector fallbacks
    pub dimension: usize,
    /// Token budget per input; longer texts are truncated before sending
    pub max_input_tokens: usize,
    /// Maximum uncached texts per service request
    pub batch_size: usize,
    /// Optional tokenizer.json file for exact token counting; a
    /// whitespace approximation is used when absent
    #[serde(default)]
    pub tokenizer_file: Option<PathBuf>,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory holding the persisted index pair
    pub data_dir: PathBuf,
    /// Chunk counts at or below this use an exact flat structure
    pub flat_threshold: usize,
    /// Upper bound on cluster count for the approximate structure
    pub max_clusters: usize,
    /// Cluster count = min(max_clusters, chunk_count / cluster_divisor)
    pub cluster_divisor: usize,
    /// Clusters probed per approximate search
    pub nprobe: usize,
}

/// Hybrid search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub vector_weight: f32,
    pub keyword_weight: f32,
    /// Default result count per query
    pub top_k: usize,
}

/// Generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Stream fragments as they arrive instead of waiting for the full body
    pub streaming: bool,
}

/// Answer/embedding cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite database path; unreachable paths disable caching for the session
    pub path: PathBuf,
    /// Answer entry time-to-live in seconds; embedding entries never expire
    pub answer_ttl_secs: u64,
}

/// Corpus ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Chunk window size in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive windows
    pub chunk_overlap: usize,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VitaqError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| VitaqError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load from an explicit path, or from the default location, falling
    /// back to built-in defaults when no file exists yet.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default = Self::default_path()?;
                if default.exists() {
                    Self::load(&default)
                } else {
                    let mut config = Config::default();
                    config.apply_env_overrides();
                    ConfigValidator::validate(&config)?;
                    Ok(config)
                }
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VitaqError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| VitaqError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: VITAQ_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("VITAQ_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
            value.parse().map_err(|_| VitaqError::InvalidConfigValue {
                path: path.to_string(),
                message: format!("Cannot parse '{}'", value),
            })
        }

        match path {
            "SERVICE__BASE_URL" => self.service.base_url = value.to_string(),
            "SERVICE__API_KEY_ENV" => self.service.api_key_env = value.to_string(),
            "SERVICE__TIMEOUT_SECS" => self.service.timeout_secs = parse(path, value)?,
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__BATCH_SIZE" => self.embedding.batch_size = parse(path, value)?,
            "GENERATION__MODEL" => self.generation.model = value.to_string(),
            "GENERATION__STREAMING" => self.generation.streaming = parse(path, value)?,
            "SEARCH__TOP_K" => self.search.top_k = parse(path, value)?,
            "SEARCH__VECTOR_WEIGHT" => self.search.vector_weight = parse(path, value)?,
            "SEARCH__KEYWORD_WEIGHT" => self.search.keyword_weight = parse(path, value)?,
            "CACHE__ANSWER_TTL_SECS" => self.cache.answer_ttl_secs = parse(path, value)?,
            "INDEX__DATA_DIR" => self.index.data_dir = PathBuf::from(value),
            "CACHE__PATH" => self.cache.path = PathBuf::from(value),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| VitaqError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("vitaq").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| VitaqError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".vitaq"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = Self::default_data_dir().unwrap_or_else(|_| PathBuf::from(".vitaq"));

        Self {
            service: ServiceConfig {
                base_url: "https://api.openai.com".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                timeout_secs: 60,
            },
            embedding: EmbeddingConfig {
                model: "text-embedding-3-small".to_string(),
                dimension: 1536,
                max_input_tokens: 8191,
                batch_size: 100,
                tokenizer_file: None,
            },
            index: IndexConfig {
                data_dir: data_dir.join("index"),
                flat_threshold: 1000,
                max_clusters: 100,
                cluster_divisor: 10,
                nprobe: 8,
            },
            search: SearchConfig {
                vector_weight: 0.7,
                keyword_weight: 0.3,
                top_k: 5,
            },
            generation: GenerationConfig {
                model: "gpt-4o-mini".to_string(),
                temperature: 0.1,
                max_tokens: 1000,
                streaming: true,
            },
            cache: CacheConfig {
                path: data_dir.join("cache.db"),
                answer_ttl_secs: 86400,
            },
            corpus: CorpusConfig {
                chunk_size: 800,
                chunk_overlap: 200,
            },
        }
    }
}
