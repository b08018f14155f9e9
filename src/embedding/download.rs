//! Model file download from the HuggingFace hub.
//!
//! Fetches the ONNX export, tokenizer and sentence-transformers metadata for a
//! model into its cache directory. Files already on disk are left alone. A
//! marker file is written once every file has been fetched, so an interrupted
//! download is resumed rather than mistaken for a complete cache.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use reqwest::StatusCode;

/// Base URL for HuggingFace model files.
const HF_BASE: &str = "https://huggingface.co";

/// Written last by [`download_model_files`].
const COMPLETE_MARKER: &str = ".ragembed-complete";

/// A file of a model repo: local name, path in the repo, whether required.
struct ModelFile {
    local: &'static str,
    remote: &'static str,
    required: bool,
}

const MODEL_FILES: &[ModelFile] = &[
    ModelFile { local: "model.onnx", remote: "onnx/model.onnx", required: true },
    ModelFile { local: "model.onnx_data", remote: "onnx/model.onnx_data", required: false },
    ModelFile { local: "tokenizer.json", remote: "tokenizer.json", required: true },
    ModelFile { local: "config.json", remote: "config.json", required: false },
    ModelFile {
        local: "sentence_bert_config.json",
        remote: "sentence_bert_config.json",
        required: false,
    },
    ModelFile {
        local: "1_Pooling/config.json",
        remote: "1_Pooling/config.json",
        required: false,
    },
    ModelFile {
        local: "2_Dense/config.json",
        remote: "2_Dense/config.json",
        required: false,
    },
];

/// Directory holding the files of `model_name`.
///
/// An existing directory path is used as-is; otherwise the model id is
/// mapped under `cache_dir` with `/` replaced by `--`.
pub fn model_dir(model_name: &str, cache_dir: &Path) -> PathBuf {
    let as_path = Path::new(model_name);
    if as_path.is_dir() {
        return as_path.to_path_buf();
    }
    cache_dir.join(model_name.replace('/', "--"))
}

/// Check whether every required model file exists in `dir`.
pub fn required_files_present(dir: &Path) -> bool {
    MODEL_FILES
        .iter()
        .filter(|f| f.required)
        .all(|f| dir.join(f.local).exists())
}

/// Check whether a download into `dir` ran to completion.
pub fn download_complete(dir: &Path) -> bool {
    dir.join(COMPLETE_MARKER).exists() && required_files_present(dir)
}

/// Download the files of `model_name` into `dir`, skipping those present.
///
/// Missing optional files (HTTP 404) are tolerated; any other failure aborts.
/// `model_name` must be a hub id, not a local directory.
pub fn download_model_files(model_name: &str, dir: &Path) -> Result<()> {
    anyhow::ensure!(
        !Path::new(model_name).is_dir(),
        "{model_name} is a local model directory, nothing to download"
    );
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create model directory: {}", dir.display()))?;

    let client = Client::builder()
        .user_agent(concat!("ragembed/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    for file in MODEL_FILES {
        let dest = dir.join(file.local);
        if dest.exists() {
            tracing::debug!(file = file.local, "model file already present");
            continue;
        }

        let url = format!("{HF_BASE}/{model_name}/resolve/main/{}", file.remote);
        tracing::info!(%url, "downloading model file");
        match download_file(&client, &url, &dest) {
            Ok(true) => tracing::info!(dest = %dest.display(), "model file saved"),
            Ok(false) if !file.required => {
                tracing::debug!(file = file.local, "optional model file not published")
            }
            Ok(false) => anyhow::bail!("{url} not found (HTTP 404)"),
            Err(e) => return Err(e.context(format!("failed to download {}", file.local))),
        }
    }

    fs::write(dir.join(COMPLETE_MARKER), model_name)
        .with_context(|| format!("failed to mark download complete in {}", dir.display()))?;
    Ok(())
}

/// Stream one file to `dest` with a progress bar. Uses atomic write (`.part` +
/// rename). Returns `Ok(false)` on HTTP 404.
fn download_file(client: &Client, url: &str, dest: &Path) -> Result<bool> {
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("HTTP request failed for {url}"))?;

    if response.status() == StatusCode::NOT_FOUND {
        return Ok(false);
    }
    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")?
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let mut tmp_name = dest.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".part");
    let tmp_path = dest.with_file_name(tmp_name);
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    std::io::copy(&mut pb.wrap_read(response), &mut file).context("error writing to file")?;
    file.flush()?;
    drop(file);

    fs::rename(&tmp_path, dest).context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(true)
}
