//! Run state: the per-execution context shared by every stage and hook.
//!
//! One `RunState` is created when a pipeline run starts and dropped when it
//! ends. It is owned by that run alone, so it needs no locking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Well-known state keys.
pub mod keys {
    pub const ITEMS_FETCHED: &str = "items_fetched";
    pub const ITEMS_ACCEPTED: &str = "items_accepted";
    pub const ITEMS_EXCLUDED: &str = "items_excluded";
    pub const MODEL_FALLBACKS: &str = "model_fallbacks";
    pub const SUMMARY_FALLBACKS: &str = "summary_fallbacks";
    pub const APPROVALS_GRANTED: &str = "approvals_granted";
    pub const APPROVALS_DENIED: &str = "approvals_denied";
}

/// Context for a single pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    /// Unique run ID.
    pub run_id: Uuid,
    /// When the run was started.
    pub started_at: DateTime<Utc>,
    /// Once true, no approval prompt is shown for the rest of the run.
    bypass_approval: bool,
    /// Arbitrary stage-injected values and counters.
    values: HashMap<String, serde_json::Value>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            bypass_approval: false,
            values: HashMap::new(),
        }
    }
}

impl RunState {
    /// Create a fresh run state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a run state with the approval bypass preset.
    pub fn with_bypass_approval(bypass: bool) -> Self {
        let mut state = Self::new();
        if bypass {
            state.enable_bypass_approval();
        }
        state
    }

    pub fn bypass_approval(&self) -> bool {
        self.bypass_approval
    }

    /// Suppress approval prompts for the remainder of this run.
    ///
    /// There is no way to turn the bypass off again within a run.
    pub fn enable_bypass_approval(&mut self) {
        if !self.bypass_approval {
            tracing::info!(run_id = %self.run_id, "Approval bypass enabled for this run");
        }
        self.bypass_approval = true;
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.values.remove(key)
    }

    /// Read a counter (missing or non-numeric counts as zero).
    pub fn counter(&self, key: &str) -> u64 {
        self.values.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
    }

    /// Add `by` to a counter and return the new value.
    pub fn increment(&mut self, key: &str, by: u64) -> u64 {
        let next = self.counter(key) + by;
        self.values.insert(key.to_string(), serde_json::Value::from(next));
        next
    }
}
