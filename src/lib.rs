//! Text-embedding providers for retrieval pipelines.
//!
//! ragembed turns text into L2-normalized vectors through one interface,
//! [`embedding::EmbeddingProvider`], with three interchangeable backends:
//!
//! | Backend | Runs | Default model | Dimensions |
//! |---------|------|---------------|------------|
//! | **local** | in-process, ONNX Runtime | `BAAI/bge-m3` | 1024 |
//! | **ollama** | Ollama server, `/api/embed` | `bge-m3` | 1024 |
//! | **openai** | OpenAI-compatible `/embeddings` | `text-embedding-3-small` | 1024 |
//!
//! ```no_run
//! use ragembed::config::RagConfig;
//! use ragembed::embedding::create_provider;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = RagConfig::load()?;
//! let provider = create_provider(&config.embedding)?;
//! let docs = provider.embed_documents(&["first chunk", "second chunk"])?;
//! let query = provider.embed_query("what is in the first chunk?")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`embedding`]: The provider trait, its backends and the dispatch helper

pub mod config;
pub mod embedding;
