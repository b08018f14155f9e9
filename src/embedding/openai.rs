//! OpenAI embedding provider.
//!
//! Works with any OpenAI-compatible `/embeddings` endpoint (OpenAI, Azure
//! OpenAI deployments behind a proxy, vLLM, LM Studio).

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{finish_vectors, EmbeddingError, EmbeddingProvider, Result};
use crate::config::OpenAiConfig;

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Embeds text through an OpenAI-compatible API.
pub struct OpenAiEmbeddingProvider {
    http_client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: Option<usize>,
    batch_size: usize,
}

impl OpenAiEmbeddingProvider {
    /// Build the HTTP client. Fails if no API key is configured.
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let Some(api_key) = config.api_key.clone().filter(|k| !k.is_empty()) else {
            tracing::error!(model = %config.model, "OpenAI API key is not set");
            return Err(EmbeddingError::load(
                &config.model,
                "no API key: set OPENAI_API_KEY or embedding.openai.api_key",
            ));
        };

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("ragembed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                tracing::error!(model = %config.model, error = %e, "failed to create OpenAI client");
                EmbeddingError::load(&config.model, e)
            })?;

        let endpoint = format!("{}/embeddings", config.base_url.trim_end_matches('/'));
        tracing::info!(model = %config.model, %endpoint, "OpenAI embedding provider ready");

        Ok(Self {
            http_client,
            endpoint,
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
        })
    }

    fn embed_chunk(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsRequest {
                model: &self.model,
                input: texts,
                dimensions: self.dimensions,
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

        let body: EmbeddingsResponse = response
            .json()
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        finish_vectors(into_input_order(body.data)?, texts.len(), self.dimensions)
    }
}

/// Order results by their `index` field; the API doesn't promise input order.
fn into_input_order(mut data: Vec<EmbeddingData>) -> Result<Vec<Vec<f32>>> {
    data.sort_by_key(|d| d.index);
    for (expected, d) in data.iter().enumerate() {
        if d.index != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "missing or duplicate embedding index {expected}"
            )));
        }
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        tracing::debug!(count = texts.len(), model = %self.model, "embedding documents via OpenAI");

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            results.extend(self.embed_chunk(chunk)?);
        }
        Ok(results)
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

    fn config_with_key() -> OpenAiConfig {
        OpenAiConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_api_key_is_load_error() {
        let err = OpenAiEmbeddingProvider::new(&OpenAiConfig::default()).err().unwrap();
        assert!(err.is_load());
        let empty = OpenAiConfig {
            api_key: Some(String::new()),
            ..Default::default()
        };
        assert!(OpenAiEmbeddingProvider::new(&empty).err().unwrap().is_load());
    }

    #[test]
    fn request_omits_unset_dimensions() {
        let texts = ["x"];
        let json = serde_json::to_value(EmbeddingsRequest {
            model: "text-embedding-3-small",
            input: &texts,
            dimensions: None,
        })
        .unwrap();
        assert!(json.get("dimensions").is_none());

        let json = serde_json::to_value(EmbeddingsRequest {
            model: "text-embedding-3-small",
            input: &texts,
            dimensions: Some(1024),
        })
        .unwrap();
        assert_eq!(json["dimensions"], 1024);
    }

    #[test]
    fn results_are_put_back_in_input_order() {
        let body = r#"{"object":"list","data":[
            {"object":"embedding","index":1,"embedding":[0.0,1.0]},
            {"object":"embedding","index":0,"embedding":[1.0,0.0]}
        ],"model":"text-embedding-3-small","usage":{"prompt_tokens":2,"total_tokens":2}}"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(body).unwrap();
        let ordered = into_input_order(parsed.data).unwrap();
        assert_eq!(ordered, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let data = vec![
            EmbeddingData { index: 0, embedding: vec![1.0] },
            EmbeddingData { index: 0, embedding: vec![1.0] },
        ];
        assert!(matches!(
            into_input_order(data),
            Err(EmbeddingError::InvalidResponse(_))
        ));
    }

    #[test]
    fn endpoint_is_built_from_base_url() {
        let provider = OpenAiEmbeddingProvider::new(&OpenAiConfig {
            base_url: "http://localhost:1234/v1/".into(),
            ..config_with_key()
        })
        .unwrap();
        assert_eq!(provider.endpoint, "http://localhost:1234/v1/embeddings");
        assert_eq!(provider.dimensions(), None);
    }

    #[test]
    fn default_request_leaves_dimensions_to_the_model() {
        let provider = OpenAiEmbeddingProvider::new(&OpenAiConfig {
            model: "text-embedding-ada-002".into(),
            ..config_with_key()
        })
        .unwrap();
        let texts = ["hello"];
        let json = serde_json::to_value(EmbeddingsRequest {
            model: &provider.model,
            input: &texts,
            dimensions: provider.dimensions,
        })
        .unwrap();
        assert!(json.get("dimensions").is_none(), "{json}");
    }
}
