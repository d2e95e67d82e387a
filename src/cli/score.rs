use anyhow::{Context, Result};

use sagashark::config::SagaConfig;
use sagashark::significance::{SignificanceEvent, SignificanceScorer};

/// Print the significance report for one change.
pub fn score(
    config: &SagaConfig,
    message: &str,
    paths: Vec<String>,
    branch: &str,
    diff_lines: i64,
) -> Result<()> {
    let event = SignificanceEvent::new(message, paths, branch, diff_lines)?;
    let scorer = SignificanceScorer::new(&config.significance)
        .context("invalid [significance] configuration")?;
    let report = scorer.assess(&event);

    println!("Significance:  {:.2}", report.score);
    println!(
        "Worth a saga:  {} (threshold {:.2})",
        if report.is_significant { "yes" } else { "no" },
        config.significance.threshold
    );
    println!("Suggested kind: {}", report.suggested_kind);
    if report.factors.is_empty() {
        println!("Factors:       none");
    } else {
        println!("Factors:");
        for factor in &report.factors {
            println!("  {:<10} {:+.2}  {}", factor.name, factor.contribution, factor.detail);
        }
    }
    Ok(())
}
