//! Run report: the only view of a run exposed to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::context::RunState;
use crate::pipeline::types::{ContentItem, FilterMethod};

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Items were summarized and the run reached the end.
    Completed,
    /// Nothing was fetched, or nothing survived filtering.
    CompletedEmpty,
    /// A stage failed; see `failed_stage` and `error`.
    Failed,
}

/// Read-only copy of a processed item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemSnapshot {
    pub title: String,
    pub source: String,
    pub url: Option<String>,
    pub relevance_score: Option<f32>,
    pub filter_method: Option<FilterMethod>,
    pub summary: Option<String>,
}

impl From<&ContentItem> for ItemSnapshot {
    fn from(item: &ContentItem) -> Self {
        Self {
            title: item.title.clone(),
            source: item.source.clone(),
            url: item.url.clone(),
            relevance_score: item.relevance_score(),
            filter_method: item.filter_method(),
            summary: item.summary().map(String::from),
        }
    }
}

/// Outcome of one notification sink.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationResult {
    pub channel: String,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A guarded operation that did not run.
#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    pub stage: String,
    pub operation: String,
    pub message: String,
}

/// A source whose fetch failed.
#[derive(Debug, Clone, Serialize)]
pub struct SourceError {
    pub source: String,
    pub message: String,
}

/// Aggregated result of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub articles_found: usize,
    pub articles_filtered: usize,
    pub articles_summarized: usize,
    pub digest: Option<String>,
    pub items: Vec<ItemSnapshot>,
    pub saved_paths: Vec<String>,
    pub notifications: Vec<NotificationResult>,
    pub stage_failures: Vec<StageFailure>,
    pub source_errors: Vec<SourceError>,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
}

impl RunReport {
    /// Empty report for the run owning `state`.
    pub fn new(state: &RunState) -> Self {
        Self {
            run_id: state.run_id,
            status: RunStatus::CompletedEmpty,
            started_at: state.started_at,
            finished_at: None,
            articles_found: 0,
            articles_filtered: 0,
            articles_summarized: 0,
            digest: None,
            items: Vec::new(),
            saved_paths: Vec::new(),
            notifications: Vec::new(),
            stage_failures: Vec::new(),
            source_errors: Vec::new(),
            failed_stage: None,
            error: None,
        }
    }

    /// True unless the run failed.
    pub fn is_success(&self) -> bool {
        self.status != RunStatus::Failed
    }

    /// Delivery flag for a channel, if that channel was attempted.
    pub fn notification(&self, channel: &str) -> Option<bool> {
        self.notifications
            .iter()
            .find(|n| n.channel == channel)
            .map(|n| n.delivered)
    }
}
