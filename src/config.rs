use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HoardConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub busy_timeout_ms: u64,
    /// Read-only connections kept open for file-backed databases.
    pub reader_pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"remote"` or `"none"`.
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub dimensions: usize,
    /// Name of the environment variable holding the bearer token, if any.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub default_top_k: usize,
    pub reindex_batch_size: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_hoard_dir()
            .join("hoard.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            busy_timeout_ms: 5000,
            reader_pool_size: 4,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "none".into(),
            endpoint: "http://127.0.0.1:8080/v1/embeddings".into(),
            model: "all-MiniLM-L6-v2".into(),
            dimensions: 384,
            api_key_env: "HOARD_EMBEDDING_API_KEY".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            reindex_batch_size: 64,
        }
    }
}

/// Returns `~/.hoard/`, or `./.hoard/` when no home directory is known.
pub fn default_hoard_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hoard")
}

/// Returns the default config file path: `~/.hoard/config.toml`
pub fn default_config_path() -> PathBuf {
    default_hoard_dir().join("config.toml")
}

impl HoardConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            HoardConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (HOARD_DB, HOARD_LOG_LEVEL, HOARD_EMBEDDING_ENDPOINT).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HOARD_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("HOARD_LOG_LEVEL") {
            self.logging.log_level = val;
        }
        if let Ok(val) = std::env::var("HOARD_EMBEDDING_ENDPOINT") {
            self.embedding.endpoint = val;
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        anyhow::ensure!(
            self.search.reindex_batch_size > 0,
            "search.reindex_batch_size must be positive"
        );
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
