use std::collections::HashMap;

use anyhow::{Context, Result};

use sagashark::config::SagaConfig;

/// Print the sagas whose stored vectors are nearest to `id`'s. Vectors for
/// sagas edited since indexing are left out and listed separately.
pub fn similar(config: &SagaConfig, id: &str, limit: usize) -> Result<()> {
    let records = super::load_records(config)?;
    let titles: HashMap<&str, &str> = records.iter().map(|r| (r.id(), r.title())).collect();
    let current: HashMap<&str, &str> = records
        .iter()
        .map(|r| (r.id(), r.content_hash()))
        .collect();

    let index = super::index_store(config)
        .load()
        .context("failed to load vector index")?
        .context("index not built; run `saga index rebuild`")?;

    if !index.contains(id) || !current.contains_key(id) {
        println!("{id} is not in the index. Run `saga index add {id}`.");
        return Ok(());
    }

    let found = index.find_similar(id, limit, &current);
    if !found.stale.is_empty() {
        tracing::warn!(count = found.stale.len(), "stale vectors skipped; rebuild recommended");
    }
    if found.stale.iter().any(|s| s == id) {
        println!("{id} changed since it was indexed. Run `saga index add {id}` first.");
        return Ok(());
    }

    if found.hits.is_empty() {
        println!("No other up-to-date sagas indexed.");
    } else {
        println!("Sagas similar to {}:\n", titles.get(id).copied().unwrap_or(id));
        for (i, (other, similarity)) in found.hits.iter().enumerate() {
            let title = titles.get(other.as_str()).copied().unwrap_or("(record missing)");
            println!("  {}. {title} [{other}] (similarity: {similarity:.3})", i + 1);
        }
    }
    if !found.stale.is_empty() {
        println!("\nSkipped (edited since indexing): {}", found.stale.join(", "));
    }
    Ok(())
}
