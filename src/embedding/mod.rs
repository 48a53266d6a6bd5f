//! Text-to-vector embedding providers.
//!
//! The index only needs [`EmbeddingProvider::embed`]; transport and auth live in the
//! implementation. [`create_provider`] builds one from configuration.

pub mod remote;

use thiserror::Error;

use crate::config::EmbeddingConfig;

/// Failure reported by an embedding provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("embedding service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed embedding response: {0}")]
    InvalidResponse(String),

    #[error("provider returned {actual} dimensions, expected {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedding provider misconfigured: {0}")]
    Config(String),
}

/// Trait for embedding text into vectors.
///
/// Calls are blocking; async callers should go through `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed a batch of text strings. Implementations may override for batched requests.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Model identifier recorded alongside stored vectors.
    fn model(&self) -> &str;
}

/// Create an embedding provider from config.
///
/// `"none"` yields `Ok(None)`: vectors are then attached by the caller directly.
pub fn create_provider(
    config: &EmbeddingConfig,
) -> anyhow::Result<Option<Box<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "none" => Ok(None),
        "remote" => {
            let provider = remote::RemoteEmbeddingProvider::new(config)?;
            Ok(Some(Box::new(provider)))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: none, remote"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_provider_is_absent() {
        let config = EmbeddingConfig::default();
        assert!(create_provider(&config).unwrap().is_none());
    }

    #[test]
    fn unknown_provider_rejected() {
        let config = EmbeddingConfig {
            provider: "onnx".into(),
            ..EmbeddingConfig::default()
        };
        let err = create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("unknown embedding provider"));
    }
}
