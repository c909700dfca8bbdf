//! Configuration types.
//!
//! `PipelineConfig` is built once at startup (files, then `NEWS_DIGEST_*`
//! environment overrides, then `validate()`) and handed to each component's
//! constructor. Nothing reads configuration from ambient state after that.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Operation name guarding the raw article dump.
pub const OP_SAVE_RAW_DATA: &str = "save_raw_data";
/// Operation name guarding the summary files.
pub const OP_SAVE_SUMMARY: &str = "save_summary";

/// Style of per-article summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStyle {
    #[default]
    #[serde(alias = "bullet_points")]
    Bullets,
    Paragraph,
    Brief,
}

impl SummaryStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bullets => "bullets",
            Self::Paragraph => "paragraph",
            Self::Brief => "brief",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "bullets" | "bullet_points" => Some(Self::Bullets),
            "paragraph" => Some(Self::Paragraph),
            "brief" => Some(Self::Brief),
            _ => None,
        }
    }
}

/// Which summary files to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Csv,
    Markdown,
    #[default]
    Both,
}

impl OutputFormat {
    pub fn includes_csv(&self) -> bool {
        matches!(self, Self::Csv | Self::Both)
    }

    pub fn includes_markdown(&self) -> bool {
        matches!(self, Self::Markdown | Self::Both)
    }
}

/// A configured news source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Topics an item must relate to.
    pub topics: Vec<String>,
    /// Additional keywords that raise relevance.
    pub keywords: Vec<String>,
    /// Items mentioning any of these are dropped after scoring.
    pub exclude_keywords: Vec<String>,
    /// Minimum relevance score for acceptance.
    pub min_relevance_score: f32,
    /// Score with the model-backed classifier (false = keyword matching only).
    pub use_model_filtering: bool,
    /// History length above which compaction kicks in.
    pub max_history_messages: usize,
    /// Original messages kept verbatim after a compaction.
    pub history_keep_recent: usize,
    /// Operations that need an explicit approval.
    pub sensitive_operations: HashSet<String>,
    /// Skip every approval prompt (unattended runs).
    pub bypass_approval: bool,
    /// How long to wait for an approval decision.
    pub approval_timeout: Duration,
    /// Style of per-article summaries.
    pub summary_style: SummaryStyle,
    /// Which summary files to write.
    pub output_format: OutputFormat,
    /// Max in-flight model calls during per-item fan-out.
    pub max_concurrency: usize,
    /// Sources to fetch from.
    pub sources: Vec<SourceConfig>,
    /// Per-source result cap.
    pub max_results_per_source: usize,
    /// Recency constraint passed to the fetcher (e.g. "1d").
    pub time_range: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            keywords: Vec::new(),
            exclude_keywords: Vec::new(),
            min_relevance_score: 0.6,
            use_model_filtering: true,
            max_history_messages: 15,
            history_keep_recent: 5,
            sensitive_operations: [OP_SAVE_SUMMARY, OP_SAVE_RAW_DATA]
                .into_iter()
                .map(String::from)
                .collect(),
            bypass_approval: false,
            approval_timeout: Duration::from_secs(120), // 2 minutes
            summary_style: SummaryStyle::Bullets,
            output_format: OutputFormat::Both,
            max_concurrency: 4,
            sources: Vec::new(),
            max_results_per_source: 5,
            time_range: "1d".to_string(),
        }
    }
}

// ── Config files ────────────────────────────────────────────────────

/// `topics.json` contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicsFile {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default)]
    pub filtering_settings: FilteringSettings,
    #[serde(default)]
    pub summary_style: Option<SummaryStyle>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilteringSettings {
    pub min_relevance_score: Option<f32>,
    pub use_llm_filtering: Option<bool>,
}

/// `sources.json` contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesFile {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub search_settings: SearchSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchSettings {
    pub max_results_per_source: Option<usize>,
    pub time_range: Option<String>,
}

impl PipelineConfig {
    /// Load topics and sources files on top of the defaults.
    pub fn from_files(topics_path: &Path, sources_path: &Path) -> Result<Self, ConfigError> {
        let topics: TopicsFile = read_json(topics_path)?;
        let sources: SourcesFile = read_json(sources_path)?;
        let mut config = Self::default();
        config.apply_topics(topics);
        config.apply_sources(sources);
        Ok(config)
    }

    /// Merge a parsed topics file.
    pub fn apply_topics(&mut self, file: TopicsFile) {
        self.topics = file.topics;
        self.keywords = file.keywords;
        self.exclude_keywords = file.exclude_keywords;
        if let Some(score) = file.filtering_settings.min_relevance_score {
            self.min_relevance_score = score;
        }
        if let Some(use_llm) = file.filtering_settings.use_llm_filtering {
            self.use_model_filtering = use_llm;
        }
        if let Some(style) = file.summary_style {
            self.summary_style = style;
        }
    }

    /// Merge a parsed sources file.
    pub fn apply_sources(&mut self, file: SourcesFile) {
        self.sources = file.sources;
        if let Some(max) = file.search_settings.max_results_per_source {
            self.max_results_per_source = max;
        }
        if let Some(range) = file.search_settings.time_range {
            self.time_range = range;
        }
    }

    /// Apply `NEWS_DIGEST_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("NEWS_DIGEST_MIN_SCORE") {
            self.min_relevance_score = parse_value("NEWS_DIGEST_MIN_SCORE", &v)?;
        }
        if let Some(v) = lookup("NEWS_DIGEST_USE_MODEL") {
            self.use_model_filtering = parse_bool("NEWS_DIGEST_USE_MODEL", &v)?;
        }
        if let Some(v) = lookup("NEWS_DIGEST_BYPASS_APPROVAL") {
            self.bypass_approval = parse_bool("NEWS_DIGEST_BYPASS_APPROVAL", &v)?;
        }
        if let Some(v) = lookup("NEWS_DIGEST_MAX_HISTORY") {
            self.max_history_messages = parse_value("NEWS_DIGEST_MAX_HISTORY", &v)?;
        }
        if let Some(v) = lookup("NEWS_DIGEST_APPROVAL_TIMEOUT_SECS") {
            let secs: u64 = parse_value("NEWS_DIGEST_APPROVAL_TIMEOUT_SECS", &v)?;
            self.approval_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("NEWS_DIGEST_SUMMARY_STYLE") {
            self.summary_style =
                SummaryStyle::parse(&v).ok_or_else(|| ConfigError::InvalidValue {
                    key: "NEWS_DIGEST_SUMMARY_STYLE".into(),
                    message: format!("expected bullets, paragraph or brief, got '{v}'"),
                })?;
        }
        if let Some(v) = lookup("NEWS_DIGEST_SENSITIVE_OPERATIONS") {
            self.sensitive_operations = split_list(&v).into_iter().collect();
        }
        Ok(())
    }

    /// Check invariants the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_relevance_score) {
            return Err(ConfigError::InvalidValue {
                key: "min_relevance_score".into(),
                message: format!("{} is outside [0, 1]", self.min_relevance_score),
            });
        }
        if self.max_history_messages == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_history_messages".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.history_keep_recent > self.max_history_messages {
            return Err(ConfigError::InvalidValue {
                key: "history_keep_recent".into(),
                message: format!(
                    "{} exceeds max_history_messages ({})",
                    self.history_keep_recent, self.max_history_messages
                ),
            });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrency".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.topics.is_empty() && self.keywords.is_empty() {
            tracing::warn!(
                "No topics or keywords configured; keyword scoring falls back to a neutral 0.5"
            );
        }
        Ok(())
    }

    /// Enabled sources only.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

fn default_true() -> bool {
    true
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

/// Parse a boolean flag ("1", "true", "yes", "on" and their negatives).
pub fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert!((config.min_relevance_score - 0.6).abs() < f32::EPSILON);
        assert!(config.use_model_filtering);
        assert_eq!(config.max_history_messages, 15);
        assert_eq!(config.history_keep_recent, 5);
        assert!(config.sensitive_operations.contains(OP_SAVE_SUMMARY));
        assert!(config.sensitive_operations.contains(OP_SAVE_RAW_DATA));
        assert!(!config.bypass_approval);
        assert_eq!(config.summary_style, SummaryStyle::Bullets);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn topics_file_parses_nested_settings() {
        let raw = r#"{
            "topics": ["AI", "Rust"],
            "keywords": ["LLM"],
            "exclude_keywords": ["sponsored"],
            "filtering_settings": {"min_relevance_score": 0.4, "use_llm_filtering": false},
            "summary_style": "bullet_points"
        }"#;
        let file: TopicsFile = serde_json::from_str(raw).unwrap();
        let mut config = PipelineConfig::default();
        config.apply_topics(file);

        assert_eq!(config.topics, vec!["AI", "Rust"]);
        assert_eq!(config.exclude_keywords, vec!["sponsored"]);
        assert!((config.min_relevance_score - 0.4).abs() < f32::EPSILON);
        assert!(!config.use_model_filtering);
        assert_eq!(config.summary_style, SummaryStyle::Bullets);
    }

    #[test]
    fn sources_file_defaults_enabled() {
        let raw = r#"{
            "sources": [{"name": "TechCrunch"}, {"name": "Old", "enabled": false}],
            "search_settings": {"max_results_per_source": 3}
        }"#;
        let file: SourcesFile = serde_json::from_str(raw).unwrap();
        let mut config = PipelineConfig::default();
        config.apply_sources(file);

        let enabled: Vec<_> = config.enabled_sources().map(|s| s.name.as_str()).collect();
        assert_eq!(enabled, vec!["TechCrunch"]);
        assert_eq!(config.max_results_per_source, 3);
        assert_eq!(config.time_range, "1d");
    }

    #[test]
    fn overrides_apply_and_reject_garbage() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("NEWS_DIGEST_MIN_SCORE", "0.75"),
            ("NEWS_DIGEST_BYPASS_APPROVAL", "yes"),
            ("NEWS_DIGEST_SUMMARY_STYLE", "brief"),
            ("NEWS_DIGEST_SENSITIVE_OPERATIONS", "save_summary, send_email"),
        ]);
        let mut config = PipelineConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert!((config.min_relevance_score - 0.75).abs() < f32::EPSILON);
        assert!(config.bypass_approval);
        assert_eq!(config.summary_style, SummaryStyle::Brief);
        assert!(config.sensitive_operations.contains("send_email"));
        assert!(!config.sensitive_operations.contains(OP_SAVE_RAW_DATA));

        let bad = PipelineConfig::default()
            .apply_overrides(|k| (k == "NEWS_DIGEST_USE_MODEL").then(|| "maybe".to_string()));
        assert!(matches!(bad, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn validate_rejects_out_of_range_score() {
        let config = PipelineConfig {
            min_relevance_score: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            history_keep_recent: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_files_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let topics = dir.path().join("topics.json");
        let sources = dir.path().join("sources.json");
        std::fs::write(&topics, "{not json").unwrap();
        std::fs::write(&sources, "{}").unwrap();

        let err = PipelineConfig::from_files(&topics, &sources).unwrap_err();
        match err {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with("topics.json")),
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }
}
