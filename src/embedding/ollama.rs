//! Ollama embedding provider.
//!
//! Talks to a running Ollama server through its batch `/api/embed` endpoint.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{finish_vectors, EmbeddingError, EmbeddingProvider, Result};
use crate::config::OllamaConfig;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeds text with a model served by Ollama (e.g. `bge-m3`, `nomic-embed-text`).
pub struct OllamaEmbeddingProvider {
    http_client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

impl OllamaEmbeddingProvider {
    /// Build the HTTP client. No request is made until the first embed call.
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("ragembed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                tracing::error!(model = %config.model, error = %e, "failed to create Ollama client");
                EmbeddingError::load(&config.model, e)
            })?;

        let endpoint = format!("{}/api/embed", config.base_url.trim_end_matches('/'));
        tracing::info!(model = %config.model, %endpoint, "Ollama embedding provider ready");

        Ok(Self {
            http_client,
            endpoint,
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        tracing::debug!(count = texts.len(), model = %self.model, "embedding documents via Ollama");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: EmbedResponse = response
            .json()
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        finish_vectors(body.embeddings, texts.len(), self.dimensions)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_batch_input() {
        let texts = ["a", "b"];
        let json = serde_json::to_value(EmbedRequest {
            model: "bge-m3",
            input: &texts,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"model": "bge-m3", "input": ["a", "b"]}));
    }

    #[test]
    fn response_ignores_extra_fields() {
        let body = r#"{"model":"bge-m3","embeddings":[[0.1,0.2]],"total_duration":1234}"#;
        let parsed: EmbedResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.embeddings, vec![vec![0.1, 0.2]]);
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let provider = OllamaEmbeddingProvider::new(&OllamaConfig {
            base_url: "http://localhost:11434/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(provider.endpoint, "http://localhost:11434/api/embed");
        assert_eq!(provider.model_name(), "bge-m3");
    }

    #[test]
    fn empty_input_makes_no_request() {
        // Nothing listens on this port; an HTTP call would fail.
        let provider = OllamaEmbeddingProvider::new(&OllamaConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(provider.embed_documents(&[]).unwrap().is_empty());
    }
}
