pub mod doctor;
pub mod embed;

use std::path::Path;

use anyhow::{Context, Result};

use ragembed::config::EmbeddingConfig;
use ragembed::embedding::download;

/// Download the configured local model's files to the cache directory.
pub fn model_download(config: &EmbeddingConfig) -> Result<()> {
    let cache_dir = config.resolved_cache_dir();
    let model_dir = download::model_dir(&config.model, &cache_dir);

    if Path::new(&config.model).is_dir() {
        println!(
            "{} is a local model directory, nothing to download.",
            model_dir.display()
        );
        return Ok(());
    }

    if download::download_complete(&model_dir) {
        println!("Model already exists at {}", model_dir.display());
        return Ok(());
    }

    println!("Downloading {} (this can take a while)...", config.model);

    download::download_model_files(&config.model, &model_dir)
        .with_context(|| format!("failed to download model {}", config.model))?;

    println!("Model files in {}. Ready for use.", model_dir.display());
    Ok(())
}
