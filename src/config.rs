use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default local model, a multilingual 1024-dimension encoder.
pub const DEFAULT_LOCAL_MODEL: &str = "BAAI/bge-m3";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "bge-m3";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RagConfig {
    pub log: LogConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Backend name: `local`, `ollama` or `openai`.
    pub provider: String,
    /// HuggingFace model id (or a local directory) for the `local` backend.
    pub model: String,
    pub cache_dir: String,
    /// `cpu`, `cuda` or `cuda:<ordinal>`.
    pub device: String,
    pub batch_size: usize,
    /// Fetch missing model files from the HuggingFace hub on load.
    pub auto_download: bool,
    pub intra_threads: usize,
    pub ollama: OllamaConfig,
    pub openai: OpenAiConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    /// Expected vector size. Responses of another size are rejected; unset
    /// accepts whatever the model returns.
    pub dimensions: Option<usize>,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Requested vector size, sent as the `dimensions` request field. Unset
    /// leaves the model's native size, which older models require.
    pub dimensions: Option<usize>,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_ragembed_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: DEFAULT_LOCAL_MODEL.into(),
            cache_dir,
            device: "cpu".into(),
            batch_size: 32,
            auto_download: true,
            intra_threads: 4,
            ollama: OllamaConfig::default(),
            openai: OpenAiConfig::default(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_BASE_URL.into(),
            model: DEFAULT_OLLAMA_MODEL.into(),
            dimensions: None,
            timeout_secs: 60,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_BASE_URL.into(),
            api_key: None,
            model: DEFAULT_OPENAI_MODEL.into(),
            dimensions: None,
            batch_size: 256,
            timeout_secs: 60,
        }
    }
}

/// Returns `~/.ragembed/`, or `./.ragembed/` when no home directory is known.
pub fn default_ragembed_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ragembed")
}

/// Returns the default config file path: `~/.ragembed/config.toml`
pub fn default_config_path() -> PathBuf {
    default_ragembed_dir().join("config.toml")
}

impl RagConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            RagConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a variable lookup. Split out from
    /// [`Self::apply_env_overrides`] so tests don't race on process env.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("RAGEMBED_PROVIDER") {
            self.embedding.provider = val;
        }
        if let Some(val) = var("RAGEMBED_MODEL") {
            self.embedding.model = val;
        }
        if let Some(val) = var("RAGEMBED_DEVICE") {
            self.embedding.device = val;
        }
        if let Some(val) = var("RAGEMBED_CACHE_DIR") {
            self.embedding.cache_dir = val;
        }
        if let Some(val) = var("RAGEMBED_LOG_LEVEL") {
            self.log.level = val;
        }
        if let Some(val) = var("OLLAMA_BASE_URL") {
            self.embedding.ollama.base_url = val;
        }
        if let Some(val) = var("OPENAI_BASE_URL") {
            self.embedding.openai.base_url = val;
        }
        if let Some(val) = var("OPENAI_API_KEY") {
            self.embedding.openai.api_key = Some(val);
        }
    }
}

impl EmbeddingConfig {
    /// Resolve the model cache directory, expanding `~` if needed.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        expand_tilde(&self.cache_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
