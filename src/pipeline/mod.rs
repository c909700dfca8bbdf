//! Digest pipeline.
//!
//! Every run flows through:
//! 1. `Fetcher::fetch()`: one query per enabled source
//! 2. `RedactionFilter`: strip emails and phone numbers from items
//! 3. `ScoringEngine` + `ExclusionRules`: relevance decision, then exclusions
//! 4. `HistoryCompactor`: bounded working context for the run digest
//! 5. `ArticleSummarizer`: per-item summaries and an executive digest
//! 6. `PersistenceSink` / `NotificationSink`: each behind the approval gate
//!
//! Callers only ever see the resulting `RunReport`.

pub mod processor;
pub mod report;
pub mod rules;
pub mod scoring;
pub mod summarizer;
pub mod types;

pub use processor::{Collaborators, PipelineOrchestrator, PipelineState, standard_middleware};
pub use report::{RunReport, RunStatus};
pub use rules::ExclusionRules;
pub use scoring::{LlmClassifier, ScoreOutcome, ScoringEngine};
pub use summarizer::{ArticleSummarizer, LlmSummarizer};
pub use types::*;
