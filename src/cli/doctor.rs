//! CLI `doctor` command: inspect the index against the record store and print
//! a health report.

use anyhow::Result;

use sagashark::config::{expand_tilde, SagaConfig};
use sagashark::embedding;
use sagashark::index::store::{HealthReport, IndexStatus};

pub fn doctor(config: &SagaConfig) -> Result<()> {
    let records_dir = config.resolved_records_dir();
    let index_dir = config.resolved_index_dir();

    let records = match super::load_records(config) {
        Ok(records) => records,
        Err(e) => {
            println!("Records:           unreadable ({e:#})");
            return Ok(());
        }
    };

    let configured = match embedding::create_provider(&config.embedding) {
        Ok(Some(provider)) => Some(provider.provider_id()),
        Ok(None) => None,
        Err(e) => {
            println!("Embedding provider '{}' failed to load: {e:#}", config.embedding.provider);
            None
        }
    };

    let report = super::index_store(config).check_health(&records, configured.as_deref());

    println!("Sagashark Health Report");
    println!("=======================");
    println!();
    println!("Records:           {} ({})", records.len(), records_dir.display());
    println!("Index directory:   {}", index_dir.display());
    println!(
        "Model cache:       {}",
        expand_tilde(&config.embedding.cache_dir).display()
    );
    println!();
    println!("Embedding provider:");
    println!("  Stored:          {}", report.provider_id.as_deref().unwrap_or("(none)"));
    println!("  Configured:      {}", configured.as_deref().unwrap_or("(none)"));
    println!();
    print_status(&report);

    Ok(())
}

fn print_status(report: &HealthReport) {
    match &report.status {
        IndexStatus::Missing => {
            println!("Index:             not built");
            println!("  Run `saga index rebuild` to enable vector search.");
            return;
        }
        IndexStatus::Corrupt { reason } => {
            println!("Index:             CORRUPT ({reason})");
            println!("  vectors.bin present: {}", report.vectors_present);
            println!("  index.json present:  {}", report.metadata_present);
            println!("  Recover with `saga index rebuild`.");
            return;
        }
        IndexStatus::ProviderChanged { stored, configured } => {
            println!("Index:             built by '{stored}', configured '{configured}'");
            println!("  WARNING: provider mismatch! Run `saga index rebuild`.");
        }
        IndexStatus::Healthy => println!("Index:             OK"),
    }

    println!("  Dimension:       {}", report.dimension.unwrap_or(0));
    println!("  Live vectors:    {}", report.live);
    println!("  Tombstoned:      {}", report.tombstoned);
    print_ids("Stale", &report.stale_ids);
    print_ids("Unindexed", &report.unindexed_ids);
    print_ids("Orphaned", &report.orphaned_ids);

    if report.is_clean() {
        println!();
        println!("All sagas are indexed and up to date.");
    }
}

fn print_ids(label: &str, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    let label = format!("{label}:");
    println!("  {label:<16} {} ({})", ids.len(), ids.join(", "));
}
