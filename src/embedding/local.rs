//! Local ONNX Runtime embedding provider.
//!
//! Implements [`EmbeddingProvider`] for sentence-transformers models exported
//! to ONNX (default `BAAI/bge-m3`, 1024 dimensions) via `ort`. Handles
//! tokenization, inference, CLS or mean pooling, and L2 normalization.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result as AnyResult};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use super::{download, l2_normalize, Device, EmbeddingError, EmbeddingProvider, Result};
use crate::config::{self, EmbeddingConfig, DEFAULT_LOCAL_MODEL};

/// Truncation length when the model doesn't publish `max_seq_length`.
const DEFAULT_MAX_SEQ_LEN: usize = 512;

/// Model families whose ONNX exports take a `token_type_ids` input.
const TOKEN_TYPE_MODELS: &[&str] = &["bert"];

/// Construction options for [`LocalEmbeddingProvider`].
#[derive(Debug, Clone)]
pub struct LocalOptions {
    /// HuggingFace model id, or a directory holding the model files.
    pub model_name: String,
    /// Where model files are cached. `None` means `~/.ragembed/models`.
    pub cache_folder: Option<PathBuf>,
    /// `cpu`, `cuda` or `cuda:<ordinal>`.
    pub device: String,
    pub batch_size: usize,
    pub auto_download: bool,
    pub intra_threads: usize,
}

impl Default for LocalOptions {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_LOCAL_MODEL.into(),
            cache_folder: None,
            device: "cpu".into(),
            batch_size: 32,
            auto_download: true,
            intra_threads: 4,
        }
    }
}

impl From<&EmbeddingConfig> for LocalOptions {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            model_name: config.model.clone(),
            cache_folder: Some(config.resolved_cache_dir()),
            device: config.device.clone(),
            batch_size: config.batch_size,
            auto_download: config.auto_download,
            intra_threads: config.intra_threads,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pooling {
    Cls,
    Mean,
}

/// What the model directory says about how to run the model.
#[derive(Debug)]
struct ModelMeta {
    pooling: Pooling,
    token_type_ids: bool,
    /// Width of the transformer's token embeddings.
    hidden_size: Option<usize>,
    /// Width of the final sentence vector: the `2_Dense` output if the model
    /// has one, else `hidden_size`.
    output_size: Option<usize>,
    max_seq_length: usize,
}

#[derive(Debug, Default, Deserialize)]
struct TransformerConfig {
    model_type: Option<String>,
    hidden_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SentenceBertConfig {
    max_seq_length: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PoolingConfig {
    pooling_mode_cls_token: bool,
    pooling_mode_mean_tokens: bool,
    pooling_mode_max_tokens: bool,
    pooling_mode_mean_sqrt_len_tokens: bool,
    pooling_mode_weightedmean_tokens: bool,
    pooling_mode_lasttoken: bool,
}

impl PoolingConfig {
    /// Only single-mode CLS or mean pooling is supported. No config at all
    /// means mean pooling.
    fn pooling(&self) -> AnyResult<Pooling> {
        let unsupported = [
            ("max_tokens", self.pooling_mode_max_tokens),
            ("mean_sqrt_len_tokens", self.pooling_mode_mean_sqrt_len_tokens),
            ("weightedmean_tokens", self.pooling_mode_weightedmean_tokens),
            ("lasttoken", self.pooling_mode_lasttoken),
        ];
        if let Some((mode, _)) = unsupported.iter().find(|(_, on)| *on) {
            anyhow::bail!("unsupported pooling mode pooling_mode_{mode}");
        }
        match (self.pooling_mode_cls_token, self.pooling_mode_mean_tokens) {
            (true, true) => anyhow::bail!("combined CLS + mean pooling is not supported"),
            (true, false) => Ok(Pooling::Cls),
            (false, _) => Ok(Pooling::Mean),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DenseConfig {
    out_features: Option<usize>,
}

impl ModelMeta {
    fn read(dir: &Path) -> AnyResult<Self> {
        let transformer: TransformerConfig = read_json_or_default(&dir.join("config.json"))?;
        let sbert: SentenceBertConfig =
            read_json_or_default(&dir.join("sentence_bert_config.json"))?;
        let pooling: PoolingConfig = read_json_or_default(&dir.join("1_Pooling/config.json"))?;
        let dense: DenseConfig = read_json_or_default(&dir.join("2_Dense/config.json"))?;

        Ok(Self {
            pooling: pooling
                .pooling()
                .context("failed to read 1_Pooling/config.json")?,
            // Without a config.json, assume a BERT export.
            token_type_ids: transformer
                .model_type
                .as_deref()
                .map_or(true, |t| TOKEN_TYPE_MODELS.contains(&t)),
            hidden_size: transformer.hidden_size,
            output_size: dense.out_features.or(transformer.hidden_size),
            max_seq_length: sbert.max_seq_length.unwrap_or(DEFAULT_MAX_SEQ_LEN),
        })
    }
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> AnyResult<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

/// Local ONNX-based embedding provider.
pub struct LocalEmbeddingProvider {
    model_name: String,
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    pooling: Pooling,
    token_type_ids: bool,
    hidden_size: Option<usize>,
    dimensions: Option<usize>,
    batch_size: usize,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex.
// The Mutex guarantees exclusive access during run().
unsafe impl Send for LocalEmbeddingProvider {}
unsafe impl Sync for LocalEmbeddingProvider {}

impl LocalEmbeddingProvider {
    /// Load `model_name` on `device`, caching files under `cache_folder`.
    pub fn new(model_name: &str, cache_folder: Option<&Path>, device: &str) -> Result<Self> {
        Self::with_options(LocalOptions {
            model_name: model_name.into(),
            cache_folder: cache_folder.map(Path::to_path_buf),
            device: device.into(),
            ..Default::default()
        })
    }

    /// Load a model with full control over batching, download and threads.
    ///
    /// Fails fast: any error is logged once and returned as
    /// [`EmbeddingError::Load`].
    pub fn with_options(options: LocalOptions) -> Result<Self> {
        tracing::info!(
            model = %options.model_name,
            device = %options.device,
            "initializing local embedding model"
        );

        match Self::load(&options) {
            Ok(provider) => {
                tracing::info!(
                    model = %provider.model_name,
                    dimensions = ?provider.dimensions,
                    "local embedding model loaded"
                );
                Ok(provider)
            }
            Err(e) => {
                let cause = format!("{e:#}");
                tracing::error!(model = %options.model_name, error = %cause, "failed to load embedding model");
                Err(EmbeddingError::load(options.model_name, e))
            }
        }
    }

    fn load(options: &LocalOptions) -> AnyResult<Self> {
        let device: Device = options.device.parse()?;
        ensure_device_supported(device)?;

        let cache_dir = options
            .cache_folder
            .clone()
            .unwrap_or_else(|| config::default_ragembed_dir().join("models"));
        let model_dir = download::model_dir(&options.model_name, &cache_dir);

        // A hub model counts as cached only once a download ran to the end; a
        // user-supplied directory only needs the required files.
        let from_hub = !Path::new(&options.model_name).is_dir();
        let ready = if from_hub {
            download::download_complete(&model_dir)
        } else {
            download::required_files_present(&model_dir)
        };
        if !ready {
            anyhow::ensure!(
                options.auto_download && from_hub,
                "model files not found in {}. Run `ragembed model download` first.",
                model_dir.display()
            );
            download::download_model_files(&options.model_name, &model_dir)?;
        }

        let meta = ModelMeta::read(&model_dir)?;
        let session =
            build_session(&model_dir.join("model.onnx"), device, options.intra_threads)?;
        let tokenizer = load_tokenizer(&model_dir.join("tokenizer.json"), meta.max_seq_length)?;

        Ok(Self {
            model_name: options.model_name.clone(),
            session: Mutex::new(session),
            tokenizer,
            pooling: meta.pooling,
            token_type_ids: meta.token_type_ids,
            hidden_size: meta.hidden_size,
            dimensions: meta.output_size,
            batch_size: options.batch_size.max(1),
        })
    }

    /// Tokenize, run and pool one batch.
    fn embed_batch(&self, texts: &[&str]) -> AnyResult<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut input_ids_flat = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask_flat = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            input_ids_flat.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask_flat.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids_tensor =
            Tensor::from_array((shape.clone(), input_ids_flat.into_boxed_slice()))?;
        let attention_mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask_flat.clone().into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = if self.token_type_ids {
            // single sentence, no segment B
            let token_type_ids = vec![0i64; batch_size * seq_len];
            let token_type_ids_tensor =
                Tensor::from_array((shape, token_type_ids.into_boxed_slice()))?;
            session.run(ort::inputs! {
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor,
            })?
        } else {
            session.run(ort::inputs! {
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
            })?
        };

        // Some exports already pool: [batch, dim].
        if let Some(pooled) = outputs
            .get("sentence_embedding")
            .or_else(|| outputs.get("dense_vecs"))
        {
            let (shape, data) = pooled
                .try_extract_tensor::<f32>()
                .context("failed to extract pooled embeddings")?;
            let dims: &[i64] = &shape;
            anyhow::ensure!(
                dims.len() == 2 && dims[0] as usize == batch_size && dims[1] > 0,
                "unexpected pooled output shape: {dims:?}, expected [{batch_size}, dim]"
            );
            // Width may differ from hidden_size (e.g. a 2_Dense projection).
            return Ok(normalize_rows(data, dims[1] as usize));
        }

        // Otherwise token embeddings: [batch, seq_len, dim].
        let token_emb_value = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);

        let (shape, data) = token_emb_value
            .try_extract_tensor::<f32>()
            .context("failed to extract token embeddings tensor")?;

        let dims: &[i64] = &shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[0] as usize == batch_size && dims[1] as usize == seq_len,
            "unexpected token embeddings shape: {dims:?}, expected [{batch_size}, {seq_len}, dim]"
        );
        let hidden_dim = dims[2] as usize;
        check_hidden_size(self.hidden_size, hidden_dim)?;

        Ok(pool(data, &attention_mask_flat, seq_len, hidden_dim, self.pooling))
    }

}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        tracing::debug!(count = texts.len(), "embedding documents");

        embed_in_chunks(texts, self.batch_size, |chunk| self.embed_batch(chunk))
            .map_err(|e| EmbeddingError::Inference(format!("{e:#}")))
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let preview: String = text.chars().take(50).collect();
        tracing::debug!(query = %preview, "embedding query");

        self.embed_batch(&[text])
            .map_err(|e| EmbeddingError::Inference(format!("{e:#}")))?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Inference("model returned no vector".into()))
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

#[cfg(feature = "cuda")]
fn ensure_device_supported(_device: Device) -> AnyResult<()> {
    Ok(())
}

#[cfg(not(feature = "cuda"))]
fn ensure_device_supported(device: Device) -> AnyResult<()> {
    anyhow::ensure!(
        device == Device::Cpu,
        "device {device} requested but ragembed was built without the `cuda` feature"
    );
    Ok(())
}

fn build_session(model_path: &Path, device: Device, intra_threads: usize) -> AnyResult<Session> {
    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?;

    let session = with_device(builder, device)?
        .commit_from_file(model_path)
        .context("failed to load ONNX model")?;

    tracing::info!(model = %model_path.display(), %device, "ONNX model loaded");
    Ok(session)
}

#[cfg(feature = "cuda")]
fn with_device(builder: SessionBuilder, device: Device) -> AnyResult<SessionBuilder> {
    use ort::execution_providers::CUDAExecutionProvider;

    match device {
        Device::Cpu => Ok(builder),
        Device::Cuda(id) => Ok(builder.with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(id)
                .build()
                .error_on_failure(),
        ])?),
    }
}

#[cfg(not(feature = "cuda"))]
fn with_device(builder: SessionBuilder, _device: Device) -> AnyResult<SessionBuilder> {
    Ok(builder)
}

fn load_tokenizer(path: &Path, max_length: usize) -> AnyResult<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

    // Keep the tokenizer's own pad token when it declares one.
    let mut padding = tokenizer.get_padding().cloned().unwrap_or_else(|| {
        let mut params = PaddingParams::default();
        if let Some(id) = tokenizer.token_to_id("<pad>") {
            params.pad_id = id;
            params.pad_token = "<pad>".into();
        }
        params
    });
    padding.strategy = PaddingStrategy::BatchLongest;
    tokenizer.with_padding(Some(padding));

    tracing::info!(tokenizer = %path.display(), max_length, "tokenizer loaded");
    Ok(tokenizer)
}

/// Run `embed` over `texts` in chunks of `batch_size`, concatenating results
/// in input order. Every chunk must yield one vector per text.
fn embed_in_chunks<F>(texts: &[&str], batch_size: usize, mut embed: F) -> AnyResult<Vec<Vec<f32>>>
where
    F: FnMut(&[&str]) -> AnyResult<Vec<Vec<f32>>>,
{
    let mut results = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(batch_size.max(1)) {
        let batch = embed(chunk)?;
        anyhow::ensure!(
            batch.len() == chunk.len(),
            "model returned {} vectors for {} texts",
            batch.len(),
            chunk.len()
        );
        results.extend(batch);
    }
    Ok(results)
}

/// Token embedding width must match `hidden_size` from config.json, if known.
fn check_hidden_size(expected: Option<usize>, actual: usize) -> AnyResult<()> {
    if let Some(expected) = expected {
        anyhow::ensure!(
            actual == expected,
            "model produced {actual}-dimension token embeddings, config.json says {expected}"
        );
    }
    Ok(())
}

/// Split an already pooled `[batch, width]` output into normalized rows.
fn normalize_rows(data: &[f32], width: usize) -> Vec<Vec<f32>> {
    data.chunks(width)
        .map(|row| {
            let mut v = row.to_vec();
            l2_normalize(&mut v);
            v
        })
        .collect()
}

/// Pool `[batch, seq_len, hidden_dim]` token embeddings into one normalized
/// vector per sequence. `mask` is `[batch, seq_len]`.
fn pool(
    data: &[f32],
    mask: &[i64],
    seq_len: usize,
    hidden_dim: usize,
    pooling: Pooling,
) -> Vec<Vec<f32>> {
    let batch_size = mask.len() / seq_len.max(1);
    let mut results = Vec::with_capacity(batch_size);

    for b in 0..batch_size {
        let mut sum = vec![0.0f32; hidden_dim];
        match pooling {
            Pooling::Cls => {
                let offset = b * seq_len * hidden_dim;
                sum.copy_from_slice(&data[offset..offset + hidden_dim]);
            }
            Pooling::Mean => {
                let mut count = 0.0f32;
                for s in 0..seq_len {
                    let m = mask[b * seq_len + s] as f32;
                    if m > 0.0 {
                        let offset = (b * seq_len + s) * hidden_dim;
                        for d in 0..hidden_dim {
                            sum[d] += data[offset + d] * m;
                        }
                        count += m;
                    }
                }
                if count > 0.0 {
                    for v in &mut sum {
                        *v /= count;
                    }
                }
            }
        }

        l2_normalize(&mut sum);
        results.push(sum);
    }

    results
}
