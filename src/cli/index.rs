//! CLI `index` commands: rebuild, add and remove vectors.

use std::sync::Arc;

use anyhow::{Context, Result};

use sagashark::config::SagaConfig;
use sagashark::record::Record;

/// Re-embed every saga with the configured provider and replace the index.
pub async fn rebuild(config: &SagaConfig) -> Result<()> {
    let records = super::load_records(config)?;
    let provider = super::require_provider(config)?;
    let store = super::index_store(config);

    println!(
        "Rebuilding index for {} saga(s) with '{}'...",
        records.len(),
        provider.provider_id()
    );

    let pb = super::progress_bar(records.len() as u64);
    let progress = pb.clone();
    let worker = Arc::clone(&provider);
    let index = tokio::task::spawn_blocking(move || {
        store.rebuild(&records, worker.as_ref(), |n| progress.inc(n as u64))
    })
    .await?
    .context("index rebuild failed")?;
    pb.finish_and_clear();

    let stats = index.stats();
    println!(
        "Indexed {} saga(s), {} dimensions, provider '{}'.",
        stats.live, stats.dimension, stats.provider_id
    );
    Ok(())
}

/// Embed one saga and append it, tombstoning any earlier vector for it.
pub fn add(config: &SagaConfig, id: &str) -> Result<()> {
    let records = super::load_records(config)?;
    let record = find(&records, id)?;
    let provider = super::require_provider(config)?;

    let slot = super::index_store(config)
        .update(provider.as_ref(), |index| {
            index.insert_record(record, |text| provider.embed(text))
        })
        .with_context(|| format!("failed to index saga {id}"))?;

    println!("Indexed '{}' [{id}] at slot {slot}.", record.title());
    Ok(())
}

/// Tombstone a saga's vector. The record itself is untouched.
pub fn remove(config: &SagaConfig, id: &str) -> Result<()> {
    let provider = super::require_provider(config)?;
    let removed = super::index_store(config)
        .remove(provider.as_ref(), id)
        .with_context(|| format!("failed to update index for {id}"))?;

    if removed {
        println!("Removed {id} from the index.");
    } else {
        println!("{id} was not in the index.");
    }
    Ok(())
}

fn find<'a>(records: &'a [Record], id: &str) -> Result<&'a Record> {
    records
        .iter()
        .find(|r| r.id() == id)
        .with_context(|| format!("no saga with id {id}"))
}
