//! HTTP embedding provider for OpenAI-compatible `/embeddings` endpoints.
//!
//! Sends `{"model", "input": [...]}` and expects `{"data": [{"index", "embedding"}]}`.
//! Works against hosted APIs and local servers (llama.cpp, text-embeddings-inference,
//! Ollama's OpenAI shim) alike.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{EmbeddingProvider, ProviderError};
use crate::config::EmbeddingConfig;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Blocking client for a remote embedding service.
///
/// Does not derive Debug; the bearer key lives inside.
pub struct RemoteEmbeddingProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl RemoteEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ProviderError> {
        if config.endpoint.trim().is_empty() {
            return Err(ProviderError::Config("embedding endpoint is empty".into()));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        // An unset or empty key variable means an unauthenticated endpoint
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());

        tracing::info!(
            endpoint = %config.endpoint,
            model = %config.model,
            dimensions = config.dimensions,
            authenticated = api_key.is_some(),
            "remote embedding provider configured"
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            api_key,
        })
    }

    fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "embedding request rejected");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        collect_vectors(parsed, texts.len(), self.dimensions)
    }
}

impl EmbeddingProvider for RemoteEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.request(&[text])?
            .pop()
            .ok_or_else(|| ProviderError::InvalidResponse("empty data array".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Order vectors by their `index` and check count and dimension.
fn collect_vectors(
    response: EmbeddingResponse,
    expected_count: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let mut data = response.data;
    if data.len() != expected_count {
        return Err(ProviderError::InvalidResponse(format!(
            "expected {expected_count} embeddings, got {}",
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);

    let mut vectors = Vec::with_capacity(data.len());
    for item in data {
        if item.embedding.len() != dimensions {
            return Err(ProviderError::Dimension {
                expected: dimensions,
                actual: item.embedding.len(),
            });
        }
        vectors.push(item.embedding);
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> EmbeddingResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn vectors_reordered_by_index() {
        let response = parse(
            r#"{"object":"list","data":[
                {"object":"embedding","index":1,"embedding":[0.0,1.0]},
                {"object":"embedding","index":0,"embedding":[1.0,0.0]}
            ],"model":"m"}"#,
        );
        let vectors = collect_vectors(response, 2, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn wrong_dimension_reported() {
        let response = parse(r#"{"data":[{"index":0,"embedding":[1.0,2.0,3.0]}]}"#);
        assert!(matches!(
            collect_vectors(response, 1, 2),
            Err(ProviderError::Dimension {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn wrong_count_reported() {
        let response = parse(r#"{"data":[]}"#);
        assert!(matches!(
            collect_vectors(response, 1, 2),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn empty_endpoint_rejected() {
        let config = EmbeddingConfig {
            provider: "remote".into(),
            endpoint: "  ".into(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            RemoteEmbeddingProvider::new(&config),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn request_body_shape() {
        let body = EmbeddingRequest {
            model: "all-MiniLM-L6-v2",
            input: &["a", "b"],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "all-MiniLM-L6-v2");
        assert_eq!(json["input"][1], "b");
    }
}
