//! Agent module: middleware hooks, history compaction, and approval gating.
//!
//! Hooks are grouped by capability. The orchestrator calls each group at a
//! fixed point of a run and never probes hooks for optional behaviour.

pub mod approval;
pub mod compaction;
pub mod middleware;

pub use approval::{ApprovalDecision, ApprovalGate, ApprovalPrompter, ConsolePrompter};
pub use compaction::HistoryCompactor;
pub use middleware::{AfterResponse, BeforePrompt, BeforeToolCall, MiddlewareChain};
