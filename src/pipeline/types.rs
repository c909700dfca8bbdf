//! Shared types for the digest pipeline.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{OP_SAVE_RAW_DATA, OP_SAVE_SUMMARY, OutputFormat, SummaryStyle};
use crate::error::{ChannelError, FetchError, LlmError, PersistenceError};
use crate::pipeline::report::RunReport;

// ── Content item ────────────────────────────────────────────────────

/// One fetched unit of content.
///
/// Fetchers fill the public fields. Scoring and summarization add the rest
/// through the recording methods; once a relevance score is set it stays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// Headline.
    pub title: String,
    /// Short excerpt of the content.
    #[serde(rename = "snippet", alias = "body", default)]
    pub body: String,
    /// Publication name.
    pub source: String,
    /// Link to the full content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Publication date, if the fetcher knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<NaiveDate>,
    /// When the item was fetched.
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    relevance_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relevance_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filter_method: Option<FilterMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary_style: Option<SummaryStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary_method: Option<SummaryMethod>,
}

impl ContentItem {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            source: source.into(),
            url: None,
            published_date: None,
            fetched_at: Utc::now(),
            relevance_score: None,
            relevance_reason: None,
            filter_method: None,
            summary: None,
            summary_style: None,
            summary_method: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.url = (!url.is_empty()).then_some(url);
        self
    }

    pub fn with_published_date(mut self, date: NaiveDate) -> Self {
        self.published_date = Some(date);
        self
    }

    /// Lowercased `title + " " + body`, the text all keyword checks run on.
    pub fn match_text(&self) -> String {
        format!("{} {}", self.title, self.body).to_lowercase()
    }

    pub fn relevance_score(&self) -> Option<f32> {
        self.relevance_score
    }

    pub fn relevance_reason(&self) -> Option<&str> {
        self.relevance_reason.as_deref()
    }

    pub fn filter_method(&self) -> Option<FilterMethod> {
        self.filter_method
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn summary_style(&self) -> Option<SummaryStyle> {
        self.summary_style
    }

    pub fn summary_method(&self) -> Option<SummaryMethod> {
        self.summary_method
    }

    /// Record the relevance judgment. Returns false (and changes nothing)
    /// if the item was already scored.
    pub fn record_relevance(
        &mut self,
        score: f32,
        reason: impl Into<String>,
        method: FilterMethod,
    ) -> bool {
        if self.relevance_score.is_some() {
            return false;
        }
        self.relevance_score = Some(score);
        self.relevance_reason = Some(reason.into());
        self.filter_method = Some(method);
        true
    }

    pub fn record_summary(
        &mut self,
        summary: impl Into<String>,
        style: SummaryStyle,
        method: SummaryMethod,
    ) {
        self.summary = Some(summary.into());
        self.summary_style = Some(style);
        self.summary_method = Some(method);
    }
}

/// How an item's relevance was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMethod {
    /// Model-backed classifier.
    Model,
    /// Deterministic keyword matching (model scoring disabled).
    Keyword,
    /// Keyword matching after the classifier failed.
    KeywordFallback,
}

impl FilterMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Keyword => "keyword",
            Self::KeywordFallback => "keyword_fallback",
        }
    }
}

/// How an item's summary was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMethod {
    Model,
    Fallback,
}

// ── Collaborators ───────────────────────────────────────────────────

/// A single fetch request.
#[derive(Debug, Clone)]
pub struct FetchQuery {
    /// Free-text query, e.g. "latest news about AI, Rust".
    pub query: String,
    /// Configured source name, used to label results.
    pub source_name: String,
    /// Domain to restrict the search to.
    pub site: Option<String>,
    /// Result cap.
    pub max_results: usize,
    /// Recency constraint, e.g. "1d".
    pub time_range: String,
}

impl FetchQuery {
    /// Build the standard topic query.
    pub fn for_topics(topics: &[String], max_results: usize, time_range: &str) -> Self {
        Self {
            query: format!("latest news about {}", topics.join(", ")),
            source_name: String::new(),
            site: None,
            max_results,
            time_range: time_range.to_string(),
        }
    }

    pub fn with_source(mut self, name: impl Into<String>, site: Option<String>) -> Self {
        self.source_name = name.into();
        self.site = site.filter(|s| !s.is_empty());
        self
    }
}

/// Produces content items. May fail on network errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<ContentItem>, FetchError>;
}

/// Model-backed relevance classifier returning the raw model text.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        item: &ContentItem,
        topics: &[String],
        keywords: &[String],
    ) -> Result<String, LlmError>;
}

/// What a summarization request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    /// A single article in the given style.
    Article(SummaryStyle),
    /// Short digest of the whole run.
    Executive,
    /// Bullet digest of a working history (compaction).
    History,
}

/// Text summarization backend.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, kind: SummaryKind) -> Result<String, LlmError>;
}

/// Something the persistence sink can store.
#[derive(Debug, Clone, Copy)]
pub enum Artifact<'a> {
    /// Every fetched item, before filtering.
    Raw(&'a [ContentItem]),
    /// Summarized items plus the run digest.
    Summaries {
        items: &'a [ContentItem],
        digest: &'a str,
    },
}

impl Artifact<'_> {
    /// Approval-gated operation name for this artifact.
    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::Raw(_) => OP_SAVE_RAW_DATA,
            Self::Summaries { .. } => OP_SAVE_SUMMARY,
        }
    }
}

/// Stores artifacts and returns the locations written.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn save(
        &self,
        artifact: Artifact<'_>,
        format: OutputFormat,
    ) -> Result<Vec<String>, PersistenceError>;
}

/// Downstream delivery of a finished run (email, chat).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short channel name used in the report.
    fn name(&self) -> &str;

    /// Approval-gated operation name, e.g. `send_email`.
    fn operation(&self) -> &str;

    async fn deliver(&self, report: &RunReport) -> Result<(), ChannelError>;

    /// Status ping once the run has ended, whatever the outcome. Not gated.
    async fn run_finished(&self, _report: &RunReport) -> Result<(), ChannelError> {
        Ok(())
    }
}
