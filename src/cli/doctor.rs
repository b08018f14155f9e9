//! CLI `doctor` command: load the configured provider and print a report.

use std::path::Path;

use anyhow::{Context, Result};

use ragembed::config::RagConfig;
use ragembed::embedding::{self, download};

const SAMPLE_TEXT: &str = "hello world";

pub fn doctor(config: &RagConfig) -> Result<()> {
    let emb = &config.embedding;

    println!("ragembed Health Report");
    println!("======================");
    println!();
    println!("Provider:          {}", emb.provider);
    match emb.provider.as_str() {
        "local" => {
            let model_dir = download::model_dir(&emb.model, &emb.resolved_cache_dir());
            let ready = if Path::new(&emb.model).is_dir() {
                download::required_files_present(&model_dir)
            } else {
                download::download_complete(&model_dir)
            };
            println!("Model:             {}", emb.model);
            println!("Model directory:   {}", model_dir.display());
            println!(
                "Model files:       {}",
                if ready {
                    "present"
                } else {
                    "missing"
                }
            );
            println!("Device:            {}", emb.device);
        }
        "ollama" => {
            println!("Model:             {}", emb.ollama.model);
            println!("Base URL:          {}", emb.ollama.base_url);
        }
        "openai" => {
            println!("Model:             {}", emb.openai.model);
            println!("Base URL:          {}", emb.openai.base_url);
            println!(
                "API key:           {}",
                if emb.openai.api_key.is_some() { "set" } else { "not set" }
            );
        }
        _ => {}
    }
    println!();

    let provider = match embedding::create_provider(emb) {
        Ok(provider) => provider,
        Err(e) => {
            println!("Load:              FAILED ({e})");
            return Ok(());
        }
    };
    println!("Load:              OK");

    let vector = provider
        .embed_query(SAMPLE_TEXT)
        .context("sample embedding failed")?;
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();

    println!("Dimensions:        {}", vector.len());
    if let Some(expected) = provider.dimensions() {
        if expected != vector.len() {
            println!("  WARNING: provider reports {expected} dimensions");
        }
    }
    println!("Norm:              {norm:.6}");

    Ok(())
}
