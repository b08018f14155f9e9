//! Text-to-vector embedding providers.
//!
//! Provides the [`EmbeddingProvider`] trait and three implementations: a local
//! ONNX Runtime model ([`local`]), an Ollama server ([`ollama`]) and an
//! OpenAI-compatible API ([`openai`]). Every provider returns L2-normalized
//! vectors. Pick one from configuration with [`create_provider`].

pub mod device;
pub mod download;
pub mod local;
pub mod ollama;
pub mod openai;

use thiserror::Error;

use crate::config::EmbeddingConfig;

pub use device::Device;
pub use local::{LocalEmbeddingProvider, LocalOptions};
pub use ollama::OllamaEmbeddingProvider;
pub use openai::OpenAiEmbeddingProvider;

/// Boxed cause attached to [`EmbeddingError::Load`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while constructing or using a provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The model (or the client standing in for it) could not be loaded.
    #[error("failed to load embedding model {model}: {source}")]
    Load {
        model: String,
        #[source]
        source: BoxError,
    },

    #[error("embedding inference failed: {0}")]
    Inference(String),

    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding service returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected embedding response: {0}")]
    InvalidResponse(String),

    #[error("unknown embedding provider: {0}. Supported: local, ollama, openai")]
    UnknownProvider(String),
}

impl EmbeddingError {
    pub(crate) fn load(model: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Load {
            model: model.into(),
            source: source.into(),
        }
    }

    pub fn is_load(&self) -> bool {
        matches!(self, Self::Load { .. })
    }
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Embeds text into fixed-dimension, L2-normalized vectors.
///
/// All methods are synchronous and block until the backend answers. Callers
/// in async contexts should use `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of documents. The output has the same length and order
    /// as `texts`; an empty input yields an empty output.
    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query. Equal to the sole element of
    /// `embed_documents(&[text])`.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no vector returned for query".into()))
    }

    /// Model identifier this provider was built with.
    fn model_name(&self) -> &str;

    /// Vector size, when known ahead of the first call.
    fn dimensions(&self) -> Option<usize>;
}

/// Create an embedding provider from config.
///
/// Dispatches on `config.provider`: `"local"`, `"ollama"` or `"openai"`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = LocalEmbeddingProvider::with_options(LocalOptions::from(config))?;
            Ok(Box::new(provider))
        }
        "ollama" => {
            let provider = OllamaEmbeddingProvider::new(&config.ollama)?;
            Ok(Box::new(provider))
        }
        "openai" => {
            let provider = OpenAiEmbeddingProvider::new(&config.openai)?;
            Ok(Box::new(provider))
        }
        other => Err(EmbeddingError::UnknownProvider(other.to_string())),
    }
}

/// L2-normalize a vector in place. A zero vector is left unchanged.
pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Check a hosted response: one vector per input, each of the expected size
/// (if any), then normalize.
pub(crate) fn finish_vectors(
    mut vectors: Vec<Vec<f32>>,
    expected_len: usize,
    dimensions: Option<usize>,
) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected_len {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {expected_len} embeddings, got {}",
            vectors.len()
        )));
    }
    for v in &mut vectors {
        if let Some(dim) = dimensions {
            if v.len() != dim {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {dim}-dimension embedding, got {}",
                    v.len()
                )));
            }
        }
        l2_normalize(v);
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn finish_vectors_rejects_count_mismatch() {
        let err = finish_vectors(vec![vec![1.0]], 2, None).unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidResponse(_)));
    }

    #[test]
    fn finish_vectors_rejects_dimension_mismatch() {
        let err = finish_vectors(vec![vec![1.0, 0.0, 0.0]], 1, Some(2)).unwrap_err();
        assert!(err.to_string().contains("2-dimension"));
    }

    #[test]
    fn finish_vectors_normalizes() {
        let out = finish_vectors(vec![vec![0.0, 2.0], vec![5.0, 0.0]], 2, Some(2)).unwrap();
        assert_eq!(out, vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
    }

    struct Fixed;

    impl EmbeddingProvider for Fixed {
        fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> Option<usize> {
            Some(2)
        }
    }

    #[test]
    fn default_embed_query_uses_single_document() {
        let p = Fixed;
        assert_eq!(p.embed_query("abc").unwrap(), vec![3.0, 1.0]);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = EmbeddingConfig {
            provider: "cohere".into(),
            ..Default::default()
        };
        let err = create_provider(&config).err().unwrap();
        assert!(matches!(err, EmbeddingError::UnknownProvider(ref p) if p == "cohere"));
        assert!(!err.is_load());
    }

    #[test]
    fn load_error_keeps_cause() {
        use std::error::Error as _;
        let err = EmbeddingError::load("m", "disk on fire");
        assert!(err.is_load());
        assert_eq!(err.source().unwrap().to_string(), "disk on fire");
    }
}
