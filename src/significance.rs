//! Significance heuristic for change events such as commits.
//!
//! Four independently capped factors (message keywords, critical paths, diff
//! size, branch name) are summed, a trivial-change penalty is subtracted, and
//! the total is clamped to `[0, 1]`. Scoring is a pure function of the event
//! and the configuration.

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::config::SignificanceConfig;
use crate::error::{Result, SagaError};
use crate::lexical::tokenize;
use crate::record::RecordKind;

const CONVENTIONAL_HIGH_VALUE: f64 = 0.3;
const CONVENTIONAL_OTHER: f64 = 0.2;
const HIGH_SIGNAL: f64 = 0.3;
const ERROR_PATTERN: f64 = 0.25;
const CRITICAL_PATH: f64 = 0.3;
const INFRASTRUCTURE_PATH: f64 = 0.2;

/// Metadata about one candidate change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignificanceEvent {
    message: String,
    changed_paths: Vec<String>,
    branch: String,
    diff_line_count: u64,
}

impl SignificanceEvent {
    /// Fails with [`SagaError::InvalidEvent`] for a negative line count.
    pub fn new<I, S>(
        message: impl Into<String>,
        changed_paths: I,
        branch: impl Into<String>,
        diff_line_count: i64,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let diff_line_count = u64::try_from(diff_line_count).map_err(|_| {
            SagaError::InvalidEvent(format!(
                "diff_line_count must be >= 0, got {diff_line_count}"
            ))
        })?;
        Ok(Self {
            message: message.into(),
            changed_paths: changed_paths.into_iter().map(Into::into).collect(),
            branch: branch.into(),
            diff_line_count,
        })
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn changed_paths(&self) -> &[String] {
        &self.changed_paths
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn diff_line_count(&self) -> u64 {
        self.diff_line_count
    }
}

/// One named contribution to a significance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificanceFactor {
    pub name: &'static str,
    pub contribution: f64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificanceReport {
    pub score: f64,
    pub is_significant: bool,
    /// Non-zero factors in evaluation order.
    pub factors: Vec<SignificanceFactor>,
    pub suggested_kind: RecordKind,
}

impl SignificanceReport {
    /// `"keywords: fix (+0.30), paths: config/app.yaml (+0.30)"`
    pub fn summary(&self) -> String {
        self.factors
            .iter()
            .map(|f| format!("{}: {} ({:+.2})", f.name, f.detail, f.contribution))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Scorer with its patterns compiled once from configuration.
#[derive(Debug, Clone)]
pub struct SignificanceScorer {
    config: SignificanceConfig,
    conventional: Regex,
    error_patterns: Vec<Regex>,
    infrastructure: Vec<Regex>,
    branches: Vec<(Regex, f64)>,
}

impl SignificanceScorer {
    /// Fails with [`SagaError::Config`] if any configured pattern is not a
    /// valid regular expression.
    pub fn new(config: &SignificanceConfig) -> Result<Self> {
        let branches = config
            .branch_patterns
            .iter()
            .map(|bp| -> Result<(Regex, f64)> { Ok((compile(&bp.pattern)?, bp.weight)) })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config: config.clone(),
            conventional: compile(r"^([a-z]+)(\([^)]*\))?!?:")?,
            error_patterns: compile_all(&config.error_patterns)?,
            infrastructure: compile_all(&config.infrastructure_patterns)?,
            branches,
        })
    }

    /// The clamped score in `[0, 1]`.
    pub fn score(&self, event: &SignificanceEvent) -> f64 {
        self.assess(event).score
    }

    pub fn assess(&self, event: &SignificanceEvent) -> SignificanceReport {
        let message = event.message.trim().to_lowercase();
        let tokens: Vec<String> = tokenize(&message).into_iter().collect();
        let conventional_type = self.conventional_type(&message);

        let mut factors = Vec::new();
        let high_signal = matching_terms(&self.config.high_signal_terms, &message, &tokens);
        self.keyword_factor(&message, &high_signal, conventional_type.as_deref(), &mut factors);
        self.trivial_factor(&message, &tokens, &high_signal, &mut factors);
        self.path_factor(&event.changed_paths, &mut factors);
        self.diff_factor(event.diff_line_count, &mut factors);
        self.branch_factor(&event.branch, &mut factors);

        let score = factors
            .iter()
            .map(|f| f.contribution)
            .sum::<f64>()
            .clamp(0.0, 1.0);
        let is_significant = score >= self.config.threshold;
        let suggested_kind = suggest_kind(conventional_type.as_deref(), &message);

        tracing::debug!(score, is_significant, factors = factors.len(), "significance assessed");
        SignificanceReport {
            score,
            is_significant,
            factors,
            suggested_kind,
        }
    }

    fn conventional_type(&self, message: &str) -> Option<String> {
        let ty = self.conventional.captures(message)?.get(1)?.as_str();
        self.config
            .conventional_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(ty))
            .then(|| ty.to_string())
    }

    fn keyword_factor(
        &self,
        message: &str,
        high_signal: &[&str],
        conventional_type: Option<&str>,
        factors: &mut Vec<SignificanceFactor>,
    ) {
        let mut raw = 0.0;
        let mut details = Vec::new();

        if !high_signal.is_empty() {
            raw += HIGH_SIGNAL;
            details.push(high_signal.join("/"));
        }
        if let Some(ty) = conventional_type {
            let high_value = self
                .config
                .high_value_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(ty));
            raw += if high_value {
                CONVENTIONAL_HIGH_VALUE
            } else {
                CONVENTIONAL_OTHER
            };
            details.push(format!("{ty}:"));
        }
        if let Some(re) = self.error_patterns.iter().find(|re| re.is_match(message)) {
            raw += ERROR_PATTERN;
            details.push(format!("/{}/", re.as_str()));
        }

        push_capped(factors, "keywords", raw, self.config.keyword_cap, details);
    }

    fn trivial_factor(
        &self,
        message: &str,
        tokens: &[String],
        high_signal: &[&str],
        factors: &mut Vec<SignificanceFactor>,
    ) {
        if !high_signal.is_empty() || self.config.trivial_penalty <= 0.0 {
            return;
        }
        let trivial = matching_terms(&self.config.trivial_terms, message, tokens);
        if !trivial.is_empty() {
            factors.push(SignificanceFactor {
                name: "trivial",
                contribution: -self.config.trivial_penalty,
                detail: trivial.join("/"),
            });
        }
    }

    fn path_factor(&self, paths: &[String], factors: &mut Vec<SignificanceFactor>) {
        let mut raw = 0.0;
        let mut details = Vec::new();

        let critical = paths.iter().find(|p| {
            let lowered = p.to_lowercase();
            self.config
                .critical_paths
                .iter()
                .any(|frag| lowered.contains(&frag.to_lowercase()))
        });
        if let Some(path) = critical {
            raw += CRITICAL_PATH;
            details.push(path.clone());
        }
        let infra = paths
            .iter()
            .find(|p| self.infrastructure.iter().any(|re| re.is_match(p)));
        if let Some(path) = infra {
            raw += INFRASTRUCTURE_PATH;
            if critical != Some(path) {
                details.push(path.clone());
            }
        }

        push_capped(factors, "paths", raw, self.config.path_cap, details);
    }

    fn diff_factor(&self, lines: u64, factors: &mut Vec<SignificanceFactor>) {
        let threshold = self.config.diff_line_threshold;
        let raw = if lines > threshold.saturating_mul(2) {
            0.2
        } else if lines > threshold {
            0.1
        } else {
            0.0
        };
        push_capped(factors, "diff", raw, self.config.diff_cap, vec![format!("{lines} lines")]);
    }

    fn branch_factor(&self, branch: &str, factors: &mut Vec<SignificanceFactor>) {
        let raw = self
            .branches
            .iter()
            .filter(|(re, _)| re.is_match(branch))
            .map(|(_, weight)| *weight)
            .fold(0.0, f64::max);
        push_capped(factors, "branch", raw, self.config.branch_cap, vec![branch.to_string()]);
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| SagaError::Config(format!("invalid pattern {pattern:?}: {e}")))
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| compile(p)).collect()
}

/// Terms present in the message. Single words match as a token prefix
/// ("fix" matches "fixed"); phrases match as substrings.
fn matching_terms<'a>(terms: &'a [String], message: &str, tokens: &[String]) -> Vec<&'a str> {
    terms
        .iter()
        .map(String::as_str)
        .filter(|term| {
            let term_lower = term.to_lowercase();
            if term_lower.contains(char::is_whitespace) {
                message.contains(&term_lower)
            } else {
                tokens.iter().any(|t| t.starts_with(&term_lower))
            }
        })
        .collect()
}

fn push_capped(
    factors: &mut Vec<SignificanceFactor>,
    name: &'static str,
    raw: f64,
    cap: f64,
    details: Vec<String>,
) {
    let contribution = raw.min(cap);
    if contribution > 0.0 {
        factors.push(SignificanceFactor {
            name,
            contribution,
            detail: details.join(", "),
        });
    }
}

fn suggest_kind(conventional_type: Option<&str>, message: &str) -> RecordKind {
    match conventional_type {
        Some("feat") => return RecordKind::Feature,
        Some("fix") => return RecordKind::Debugging,
        Some("refactor") => return RecordKind::Architecture,
        Some("perf") => return RecordKind::Optimization,
        _ => {}
    }
    let has = |words: &[&str]| words.iter().any(|w| message.contains(w));
    if has(&["bug", "fix", "error", "crash", "debug"]) {
        RecordKind::Debugging
    } else if has(&["optimi", "perf", "faster", "speed", "latency"]) {
        RecordKind::Optimization
    } else if has(&["refactor", "restructur", "architect", "redesign"]) {
        RecordKind::Architecture
    } else if has(&["add", "implement", "feature", "support"]) {
        RecordKind::Feature
    } else {
        RecordKind::General
    }
}
