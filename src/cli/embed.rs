//! CLI `embed` command: embed texts and print the vectors as JSON.

use std::io::BufRead;

use anyhow::{Context, Result};

use ragembed::config::RagConfig;
use ragembed::embedding;

pub fn embed(config: &RagConfig, query: bool, texts: Vec<String>) -> Result<()> {
    let texts = if texts.is_empty() {
        read_stdin_lines()?
    } else {
        texts
    };

    let provider = embedding::create_provider(&config.embedding)
        .context("failed to create embedding provider")?;

    let output = if query {
        let text = texts.join(" ");
        serde_json::to_string(&provider.embed_query(&text)?)?
    } else {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        serde_json::to_string(&provider.embed_documents(&refs)?)?
    };

    println!("{output}");
    Ok(())
}

fn read_stdin_lines() -> Result<Vec<String>> {
    std::io::stdin()
        .lock()
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .collect::<std::io::Result<Vec<_>>>()
        .context("failed to read stdin")
}
