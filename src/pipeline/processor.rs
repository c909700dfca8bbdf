//! Pipeline orchestrator: drives one digest run end to end.
//!
//! Flow:
//! 1. Fetch every enabled source (a failing source is recorded and skipped)
//! 2. Redact fetched items
//! 3. Score, then drop excluded items
//! 4. Compact the working history (`BeforePrompt` hooks)
//! 5. Summarize items and the run (`AfterResponse` hooks on every summary)
//! 6. Persist and notify, each operation gated by `BeforeToolCall` hooks
//!
//! Stages run strictly in order over whole batches. Only the per-item model
//! calls inside scoring and summarization fan out.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agent::approval::{ApprovalGate, ApprovalPrompter};
use crate::agent::compaction::HistoryCompactor;
use crate::agent::middleware::MiddlewareChain;
use crate::config::PipelineConfig;
use crate::context::{RunState, keys};
use crate::error::{ConfigError, PipelineError};
use crate::llm::provider::ChatMessage;
use crate::pipeline::report::{
    ItemSnapshot, NotificationResult, RunReport, RunStatus, SourceError, StageFailure,
};
use crate::pipeline::rules::ExclusionRules;
use crate::pipeline::scoring::ScoringEngine;
use crate::pipeline::summarizer::ArticleSummarizer;
use crate::pipeline::types::{
    Artifact, Classifier, ContentItem, FetchQuery, Fetcher, FilterMethod, NotificationSink,
    PersistenceSink, SummaryMethod, Summarizer,
};
use crate::safety::RedactionFilter;

// ── State machine ───────────────────────────────────────────────────

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Created,
    Fetching,
    Filtering,
    Compacting,
    Summarizing,
    Persisting,
    Completed,
    CompletedEmpty,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Fetching => "fetching",
            Self::Filtering => "filtering",
            Self::Compacting => "compacting",
            Self::Summarizing => "summarizing",
            Self::Persisting => "persisting",
            Self::Completed => "completed",
            Self::CompletedEmpty => "completed_empty",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::CompletedEmpty | Self::Failed)
    }

    /// Transitions only move forward; terminal states are final.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Created, Fetching)
            | (Fetching, Filtering)
            | (Filtering, Compacting)
            | (Compacting, Summarizing)
            | (Summarizing, Persisting)
            | (Persisting, Completed)
            | (Fetching | Filtering, CompletedEmpty) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current state and the report being built.
struct RunTracker {
    current: PipelineState,
    report: RunReport,
}

impl RunTracker {
    fn new(state: &RunState) -> Self {
        Self {
            current: PipelineState::Created,
            report: RunReport::new(state),
        }
    }

    fn advance(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        if !self.current.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }
        info!(run_id = %self.report.run_id, from = %self.current, to = %next, "Pipeline transition");
        self.current = next;
        match next {
            PipelineState::Completed => self.report.status = RunStatus::Completed,
            PipelineState::CompletedEmpty => self.report.status = RunStatus::CompletedEmpty,
            PipelineState::Failed => self.report.status = RunStatus::Failed,
            _ => {}
        }
        Ok(())
    }

    fn fail(&mut self, err: &PipelineError) {
        let stage = self.current;
        error!(run_id = %self.report.run_id, stage = %stage, error = %err, "Pipeline run failed");
        self.report.failed_stage = Some(stage.to_string());
        self.report.error = Some(err.to_string());
        self.report.status = RunStatus::Failed;
        self.current = PipelineState::Failed;
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

/// External collaborators a run depends on.
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    /// Model-backed classifier; `None` means keyword scoring only.
    pub classifier: Option<Arc<dyn Classifier>>,
    pub summarizer: Arc<dyn Summarizer>,
    pub persistence: Arc<dyn PersistenceSink>,
    pub notifiers: Vec<Arc<dyn NotificationSink>>,
}

/// The standard hook set: compaction then redaction before prompts, the
/// approval gate before guarded operations, redaction after responses.
pub fn standard_middleware(
    config: &PipelineConfig,
    summarizer: Arc<dyn Summarizer>,
    prompter: Arc<dyn ApprovalPrompter>,
    redaction: RedactionFilter,
) -> MiddlewareChain {
    let compactor = HistoryCompactor::new(
        summarizer,
        config.max_history_messages,
        config.history_keep_recent,
    );
    MiddlewareChain::new()
        .with_before_prompt(Arc::new(compactor))
        .with_before_prompt(Arc::new(redaction))
        .with_before_tool_call(Arc::new(ApprovalGate::from_config(config, prompter)))
        .with_after_response(Arc::new(redaction))
}

/// Runs fetch → redact → filter → compact → summarize → persist.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    fetcher: Arc<dyn Fetcher>,
    scoring: ScoringEngine,
    exclusions: ExclusionRules,
    summarizer: ArticleSummarizer,
    redaction: RedactionFilter,
    middleware: MiddlewareChain,
    persistence: Arc<dyn PersistenceSink>,
    notifiers: Vec<Arc<dyn NotificationSink>>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        collaborators: Collaborators,
        middleware: MiddlewareChain,
    ) -> Result<Self, ConfigError> {
        let exclusions =
            ExclusionRules::new(&config.exclude_keywords).map_err(|e| ConfigError::InvalidValue {
                key: "exclude_keywords".into(),
                message: e.to_string(),
            })?;
        let scoring = ScoringEngine::from_config(&config, collaborators.classifier);
        let summarizer = ArticleSummarizer::new(
            collaborators.summarizer,
            config.summary_style,
            config.max_concurrency,
        );
        Ok(Self {
            config,
            fetcher: collaborators.fetcher,
            scoring,
            exclusions,
            summarizer,
            redaction: RedactionFilter::new(),
            middleware,
            persistence: collaborators.persistence,
            notifiers: collaborators.notifiers,
        })
    }

    /// Execute one run with a fresh `RunState`.
    pub async fn run(&self) -> RunReport {
        self.run_with_cancel(&CancellationToken::new()).await
    }

    /// Execute one run; cancellation fails the run at the next stage boundary
    /// and denies any pending approval.
    pub async fn run_with_cancel(&self, cancel: &CancellationToken) -> RunReport {
        let mut state = RunState::with_bypass_approval(self.config.bypass_approval);
        let mut tracker = RunTracker::new(&state);

        info!(run_id = %state.run_id, "Starting digest run");
        if let Err(e) = self.execute(&mut tracker, &mut state, cancel).await {
            tracker.fail(&e);
        }
        tracker.report.finished_at = Some(Utc::now());
        self.announce(&tracker.report).await;

        info!(
            run_id = %state.run_id,
            status = ?tracker.report.status,
            found = tracker.report.articles_found,
            filtered = tracker.report.articles_filtered,
            summarized = tracker.report.articles_summarized,
            model_fallbacks = state.counter(keys::MODEL_FALLBACKS),
            "Digest run finished"
        );
        tracker.report
    }

    async fn execute(
        &self,
        tracker: &mut RunTracker,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        // Fetching
        checkpoint(tracker, cancel)?;
        tracker.advance(PipelineState::Fetching)?;
        let mut items = self.fetch_all(&mut tracker.report).await;
        for item in &mut items {
            self.redaction.redact_item(item);
        }
        state.increment(keys::ITEMS_FETCHED, items.len() as u64);
        tracker.report.articles_found = items.len();
        if items.is_empty() {
            warn!("No items fetched");
            return tracker.advance(PipelineState::CompletedEmpty);
        }
        let raw_items = items.clone();

        // Filtering
        checkpoint(tracker, cancel)?;
        tracker.advance(PipelineState::Filtering)?;
        let items = self.filter(items, state).await;
        tracker.report.articles_filtered = items.len();
        if items.is_empty() {
            warn!("No items survived filtering");
            return tracker.advance(PipelineState::CompletedEmpty);
        }

        // Compacting
        checkpoint(tracker, cancel)?;
        tracker.advance(PipelineState::Compacting)?;
        let history = working_history(&items);
        let context = self.middleware.run_before_prompt(history, state).await;

        // Summarizing
        checkpoint(tracker, cancel)?;
        tracker.advance(PipelineState::Summarizing)?;
        let items = self.summarize(items, state).await;
        let digest = self
            .summarizer
            .executive_digest(&context, items.len())
            .await;
        let digest_text = self.middleware.run_after_response(digest.text, state).await;
        tracker.report.articles_summarized = items.len();
        tracker.report.digest = Some(digest_text.clone());
        tracker.report.items = items.iter().map(ItemSnapshot::from).collect();

        // Persisting
        checkpoint(tracker, cancel)?;
        tracker.advance(PipelineState::Persisting)?;
        let artifacts = [
            Artifact::Raw(&raw_items),
            Artifact::Summaries {
                items: &items,
                digest: &digest_text,
            },
        ];
        for artifact in artifacts {
            self.persist(artifact, tracker, state, cancel).await?;
        }
        self.notify(tracker, state, cancel).await;

        tracker.advance(PipelineState::Completed)
    }

    /// Fetch each enabled source in turn. Failures are recorded, not raised.
    async fn fetch_all(&self, report: &mut RunReport) -> Vec<ContentItem> {
        let base = FetchQuery::for_topics(
            &self.config.topics,
            self.config.max_results_per_source,
            &self.config.time_range,
        );
        let mut queries: Vec<FetchQuery> = self
            .config
            .enabled_sources()
            .map(|s| base.clone().with_source(&s.name, s.url.clone()))
            .collect();
        if queries.is_empty() {
            queries.push(base);
        }

        let mut items = Vec::new();
        for query in &queries {
            match self.fetcher.fetch(query).await {
                Ok(mut fetched) => {
                    fetched.truncate(query.max_results);
                    info!(source = %query.source_name, count = fetched.len(), "Fetched items");
                    items.extend(fetched);
                }
                Err(e) => {
                    warn!(source = %query.source_name, error = %e, "Source fetch failed");
                    report.source_errors.push(SourceError {
                        source: query.source_name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        items
    }

    /// Score, record relevance on survivors, then apply exclusions.
    async fn filter(&self, items: Vec<ContentItem>, state: &mut RunState) -> Vec<ContentItem> {
        let outcomes = self
            .scoring
            .score_batch(
                &items,
                &self.config.topics,
                &self.config.keywords,
                self.config.min_relevance_score,
            )
            .await;
        let fallbacks = outcomes
            .iter()
            .filter(|o| o.method == FilterMethod::KeywordFallback)
            .count();
        state.increment(keys::MODEL_FALLBACKS, fallbacks as u64);

        let accepted: Vec<ContentItem> = items
            .into_iter()
            .zip(outcomes)
            .filter_map(|(mut item, outcome)| {
                outcome.apply_to(&mut item);
                outcome.accepted.then_some(item)
            })
            .collect();

        let (kept, excluded) = self.exclusions.apply(accepted);
        state.increment(keys::ITEMS_EXCLUDED, excluded as u64);
        state.increment(keys::ITEMS_ACCEPTED, kept.len() as u64);
        kept
    }

    async fn summarize(
        &self,
        mut items: Vec<ContentItem>,
        state: &mut RunState,
    ) -> Vec<ContentItem> {
        let summaries = self.summarizer.summarize_all(&items).await;
        let style = self.summarizer.style();
        for (item, summary) in items.iter_mut().zip(summaries) {
            if summary.method == SummaryMethod::Fallback {
                state.increment(keys::SUMMARY_FALLBACKS, 1);
            }
            let text = self.middleware.run_after_response(summary.text, state).await;
            item.record_summary(text, style, summary.method);
        }
        items
    }

    /// Gate and save one artifact. A denial is recorded; an I/O error fails the run.
    async fn persist(
        &self,
        artifact: Artifact<'_>,
        tracker: &mut RunTracker,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let operation = artifact.operation_name();
        if let Err(denied) = self
            .middleware
            .run_before_tool_call(operation, state, cancel)
            .await
        {
            tracker.report.stage_failures.push(StageFailure {
                stage: tracker.current.to_string(),
                operation: operation.to_string(),
                message: denied.to_string(),
            });
            return Ok(());
        }
        let paths = self
            .persistence
            .save(artifact, self.config.output_format)
            .await?;
        info!(operation, paths = ?paths, "Saved artifact");
        tracker.report.saved_paths.extend(paths);
        Ok(())
    }

    /// Deliver the report to every sink. Outcomes are advisory only.
    async fn notify(
        &self,
        tracker: &mut RunTracker,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) {
        // Sinks see the run as it will finish, not mid-persist.
        let mut outgoing = tracker.report.clone();
        outgoing.status = RunStatus::Completed;
        outgoing.finished_at = Some(Utc::now());

        let mut results = Vec::with_capacity(self.notifiers.len());
        for sink in &self.notifiers {
            let result = match self
                .middleware
                .run_before_tool_call(sink.operation(), state, cancel)
                .await
            {
                Err(denied) => NotificationResult {
                    channel: sink.name().to_string(),
                    delivered: false,
                    error: Some(denied.to_string()),
                },
                Ok(_) => match sink.deliver(&outgoing).await {
                    Ok(()) => {
                        info!(channel = sink.name(), "Notification delivered");
                        NotificationResult {
                            channel: sink.name().to_string(),
                            delivered: true,
                            error: None,
                        }
                    }
                    Err(e) => {
                        warn!(channel = sink.name(), error = %e, "Notification failed");
                        NotificationResult {
                            channel: sink.name().to_string(),
                            delivered: false,
                            error: Some(e.to_string()),
                        }
                    }
                },
            };
            results.push(result);
        }
        tracker.report.notifications.extend(results);
    }

    async fn announce(&self, report: &RunReport) {
        for sink in &self.notifiers {
            if let Err(e) = sink.run_finished(report).await {
                warn!(channel = sink.name(), error = %e, "Completion notice failed");
            }
        }
    }
}

fn checkpoint(tracker: &RunTracker, cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Stage {
            stage: tracker.current.to_string(),
            message: "run cancelled".to_string(),
        });
    }
    Ok(())
}

/// One user message per item: `"{n}. {title}\n{snippet}"`.
fn working_history(items: &[ContentItem]) -> Vec<ChatMessage> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| ChatMessage::user(format!("{}. {}\n{}", i + 1, item.title, item.body)))
        .collect()
}
