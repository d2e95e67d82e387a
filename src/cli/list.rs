//! CLI `list` command: newest sagas, optionally filtered by tag.

use anyhow::Result;

use sagashark::config::SagaConfig;
use sagashark::record::{self, Record};

pub fn list(config: &SagaConfig, tag: Option<&str>, limit: usize) -> Result<()> {
    let records = super::load_records(config)?;
    let mut shown: Vec<&Record> = match tag {
        Some(tag) => record::by_tag(&records, tag),
        None => record::recent(&records, limit),
    };
    shown.truncate(limit);

    if shown.is_empty() {
        match tag {
            Some(tag) => println!("No sagas tagged '{tag}'."),
            None => println!("No sagas in {}.", config.resolved_records_dir().display()),
        }
        return Ok(());
    }

    for r in shown {
        let tags: Vec<&str> = r.tags().iter().map(String::as_str).collect();
        println!(
            "{}  [{}] {} ({}){}",
            r.timestamp().format("%Y-%m-%d"),
            r.id(),
            r.title(),
            r.kind().as_str(),
            if tags.is_empty() {
                String::new()
            } else {
                format!("  #{}", tags.join(" #"))
            }
        );
    }
    Ok(())
}
