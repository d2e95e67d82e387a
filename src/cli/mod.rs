pub mod doctor;
pub mod index;
pub mod list;
pub mod score;
pub mod search;
pub mod similar;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;

use sagashark::config::{expand_tilde, EmbeddingConfig, SagaConfig};
use sagashark::embedding::{self, EmbeddingProvider};
use sagashark::index::store::IndexStore;
use sagashark::record::{JsonDirStore, Record, RecordStore};

const MODEL_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json";

/// Read every saga from the configured records directory.
pub fn load_records(config: &SagaConfig) -> Result<Vec<Record>> {
    let dir = config.resolved_records_dir();
    JsonDirStore::new(&dir)
        .records()
        .with_context(|| format!("failed to read sagas from {}", dir.display()))
}

pub fn index_store(config: &SagaConfig) -> IndexStore {
    IndexStore::new(config.resolved_index_dir())
        .with_write_timeout(Duration::from_millis(config.storage.lock_timeout_ms))
}

/// The configured provider, failing if it cannot be created or is `none`.
pub fn require_provider(config: &SagaConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    embedding::create_provider(&config.embedding)
        .context("failed to create embedding provider")?
        .with_context(|| {
            format!(
                "embedding provider is '{}'; set [embedding] provider to 'local' or 'hash'",
                config.embedding.provider
            )
        })
}

pub fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar().template("  {bar:40.cyan/blue} {pos}/{len} ({eta})") {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}

/// Download the ONNX embedding model and tokenizer to the cache directory.
pub async fn model_download(config: &EmbeddingConfig) -> Result<()> {
    let cache_dir = expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    for (name, url) in [("model.onnx", MODEL_URL), ("tokenizer.json", TOKENIZER_URL)] {
        let dest = cache_dir.join(name);
        if dest.exists() {
            println!("{name} already present at {}", dest.display());
            continue;
        }
        println!("Downloading {name}...");
        download_file(url, &dest).await?;
        println!("Saved {}", dest.display());
    }

    println!("Model ready. Run `saga index rebuild` to embed existing sagas.");
    Ok(())
}

/// Stream `url` into `dest` via a temporary file and rename.
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
            {
                pb.set_style(style.progress_chars("##-"));
            }
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk)
            .await
            .context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}
