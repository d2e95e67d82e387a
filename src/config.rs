use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SagaConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub ranking: RankingConfig,
    pub significance: SignificanceConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub records_dir: String,
    pub index_dir: String,
    /// How long index writers wait for another writer before giving up.
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `local` (ONNX), `hash` (deterministic, model-free) or `none`.
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    /// Vector size for the `hash` provider. The local model fixes its own.
    pub dimensions: usize,
    /// Upper bound on a single query embedding before falling back to lexical.
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RankingConfig {
    pub default_limit: usize,
    /// Weight applied to the rescaled vector similarity.
    pub vector_weight: f64,
    /// `normalized = (similarity + 1) * vector_scale`.
    pub vector_scale: f64,
    /// Vector candidates fetched per requested result.
    pub candidate_multiplier: usize,
    pub lexical: LexicalWeights,
}

/// Per-factor weights of the lexical scorer.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LexicalWeights {
    /// Title equals the query. Kept above the sum of all capped non-title
    /// factors so an exact title always ranks first.
    pub title_equal: f64,
    pub title_exact: f64,
    pub body_exact: f64,
    /// Per extra occurrence of the query in the body.
    pub body_repeat: f64,
    pub body_repeat_cap: usize,
    /// Per query word found in the body when the whole query is not.
    pub body_word: f64,
    pub body_word_max: f64,
    pub token: f64,
    pub token_cap: usize,
    pub tag: f64,
    pub tag_cap: usize,
    pub kind: f64,
    pub branch: f64,
    pub recency_max: f64,
    pub recency_window_days: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SignificanceConfig {
    pub high_signal_terms: Vec<String>,
    pub conventional_types: Vec<String>,
    pub high_value_types: Vec<String>,
    pub error_patterns: Vec<String>,
    pub trivial_terms: Vec<String>,
    pub critical_paths: Vec<String>,
    pub infrastructure_patterns: Vec<String>,
    pub diff_line_threshold: u64,
    pub branch_patterns: Vec<BranchPattern>,
    pub keyword_cap: f64,
    pub path_cap: f64,
    pub diff_cap: f64,
    pub branch_cap: f64,
    pub trivial_penalty: f64,
    /// Scores at or above this are worth prompting for a saga.
    pub threshold: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BranchPattern {
    pub pattern: String,
    pub weight: f64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = default_saga_dir();
        Self {
            records_dir: root.join("sagas").to_string_lossy().into_owned(),
            index_dir: root.join("index").to_string_lossy().into_owned(),
            lock_timeout_ms: 10_000,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_saga_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            dimensions: 384,
            timeout_ms: 2000,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            vector_weight: 5.0,
            vector_scale: 0.5,
            candidate_multiplier: 4,
            lexical: LexicalWeights::default(),
        }
    }
}

impl Default for LexicalWeights {
    fn default() -> Self {
        Self {
            title_equal: 25.0,
            title_exact: 10.0,
            body_exact: 5.0,
            body_repeat: 0.5,
            body_repeat_cap: 5,
            body_word: 0.5,
            body_word_max: 3.0,
            token: 3.0,
            token_cap: 5,
            tag: 2.0,
            tag_cap: 5,
            kind: 1.5,
            branch: 2.0,
            recency_max: 1.0,
            recency_window_days: 30.0,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            high_signal_terms: strings(&[
                "fix", "resolved", "solved", "finally", "root cause", "breakthrough",
                "discovered", "critical", "security", "performance", "migration",
                "breaking",
            ]),
            conventional_types: strings(&[
                "feat", "fix", "docs", "style", "refactor", "test", "chore", "perf",
                "build", "ci",
            ]),
            high_value_types: strings(&["feat", "fix", "refactor", "perf"]),
            error_patterns: strings(&[
                r"\b\d{3}\s+error\b",
                r"\bhttp\s+\d{3}\b",
                r"error\s+code",
                r"exception",
                r"crash",
                r"timeout",
                r"memory\s+leak",
                r"race\s+condition",
            ]),
            trivial_terms: strings(&[
                "typo", "spacing", "whitespace", "formatting", "comment", "rename", "wip",
                "minor",
            ]),
            critical_paths: strings(&[
                "config", "migration", "auth", "security", "payment", "database",
                "docker", "requirements", "package.json", "cargo.toml", ".env", ".yml",
                ".yaml", "nginx",
            ]),
            infrastructure_patterns: strings(&[
                r"\.conf$",
                r"schema",
                r"composer\.json",
                r"(^|/)\.github/",
                r"terraform",
                r"\.tf$",
            ]),
            diff_line_threshold: 50,
            branch_patterns: vec![
                BranchPattern {
                    pattern: "hotfix|critical".into(),
                    weight: 0.2,
                },
                BranchPattern {
                    pattern: "feature|feat/|fix|bug".into(),
                    weight: 0.1,
                },
            ],
            keyword_cap: 0.3,
            path_cap: 0.3,
            diff_cap: 0.2,
            branch_cap: 0.2,
            trivial_penalty: 0.3,
            threshold: 0.3,
        }
    }
}

/// Returns `~/.sagashark/`
pub fn default_saga_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sagashark")
}

/// Returns the default config file path: `~/.sagashark/config.toml`
pub fn default_config_path() -> PathBuf {
    default_saga_dir().join("config.toml")
}

impl SagaConfig {
    /// Read `~/.sagashark/config.toml`, falling back to defaults, then apply
    /// `SAGASHARK_*` overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config: SagaConfig = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("invalid config TOML in {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "config file not found, using defaults");
                SagaConfig::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("cannot read config {}", path.display()))
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (SAGASHARK_RECORDS, SAGASHARK_INDEX, SAGASHARK_LOG_LEVEL, SAGASHARK_EMBEDDING).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SAGASHARK_RECORDS") {
            self.storage.records_dir = val;
        }
        if let Ok(val) = std::env::var("SAGASHARK_INDEX") {
            self.storage.index_dir = val;
        }
        if let Ok(val) = std::env::var("SAGASHARK_LOG_LEVEL") {
            self.logging.log_level = val;
        }
        if let Ok(val) = std::env::var("SAGASHARK_EMBEDDING") {
            self.embedding.provider = val;
        }
    }

    pub fn resolved_records_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.records_dir)
    }

    pub fn resolved_index_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.index_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SagaConfig::default();
        assert_eq!(config.logging.log_level, "info");
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.ranking.candidate_multiplier, 4);
        assert_eq!(config.ranking.lexical.title_exact, 10.0);
        assert_eq!(config.significance.threshold, 0.3);
        assert!(config.storage.index_dir.ends_with("index"));
        assert_eq!(config.storage.lock_timeout_ms, 10_000);
    }

    #[test]
    fn title_equal_outweighs_capped_non_title_factors() {
        let w = LexicalWeights::default();
        let non_title = w.body_exact
            + w.body_repeat * w.body_repeat_cap as f64
            + w.tag * w.tag_cap as f64
            + w.kind
            + w.branch
            + w.recency_max;
        assert!(w.title_equal > non_title);
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[logging]
log_level = "debug"

[storage]
index_dir = "/tmp/saga-index"

[embedding]
provider = "hash"
dimensions = 64

[ranking]
vector_weight = 2.5

[ranking.lexical]
title_exact = 12.0

[[significance.branch_patterns]]
pattern = "release"
weight = 0.15
"#;
        let config: SagaConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.log_level, "debug");
        assert_eq!(config.storage.index_dir, "/tmp/saga-index");
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.dimensions, 64);
        assert_eq!(config.ranking.vector_weight, 2.5);
        assert_eq!(config.ranking.lexical.title_exact, 12.0);
        // defaults still apply for unset fields
        assert_eq!(config.ranking.lexical.body_exact, 5.0);
        assert_eq!(config.embedding.timeout_ms, 2000);
        assert_eq!(
            config.significance.branch_patterns,
            vec![BranchPattern {
                pattern: "release".into(),
                weight: 0.15
            }]
        );
        assert_eq!(config.significance.diff_line_threshold, 50);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = SagaConfig::default();
        std::env::set_var("SAGASHARK_RECORDS", "/tmp/records");
        std::env::set_var("SAGASHARK_INDEX", "/tmp/index");
        std::env::set_var("SAGASHARK_LOG_LEVEL", "trace");
        std::env::set_var("SAGASHARK_EMBEDDING", "none");

        config.apply_env_overrides();

        assert_eq!(config.storage.records_dir, "/tmp/records");
        assert_eq!(config.storage.index_dir, "/tmp/index");
        assert_eq!(config.logging.log_level, "trace");
        assert_eq!(config.embedding.provider, "none");

        // Clean up
        std::env::remove_var("SAGASHARK_RECORDS");
        std::env::remove_var("SAGASHARK_INDEX");
        std::env::remove_var("SAGASHARK_LOG_LEVEL");
        std::env::remove_var("SAGASHARK_EMBEDDING");
    }

    #[test]
    fn missing_file_yields_defaults_but_bad_toml_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = SagaConfig::load_from(tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.ranking.default_limit, 5);

        let bad = tmp.path().join("bad.toml");
        std::fs::write(&bad, "[ranking\nvector_weight = ").unwrap();
        let err = SagaConfig::load_from(&bad).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/var/sagas"), PathBuf::from("/var/sagas"));
    }
}
