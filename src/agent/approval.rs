//! Approval gate: blocks sensitive operations until someone says yes.
//!
//! Resolution order for `check`:
//! 1. Run bypass flag set → approved, no prompt
//! 2. Operation not in the sensitive set → approved, no prompt
//! 3. Otherwise ask the prompter, bounded by timeout and cancellation
//!
//! Only an explicit affirmative approves. Silence, garbage, read errors,
//! timeouts and cancellation are all denials.

use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::middleware::BeforeToolCall;
use crate::config::PipelineConfig;
use crate::context::{RunState, keys};
use crate::error::ApprovalError;

/// Outcome of a single gate check. Lives only as long as the check.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalDecision {
    pub tool_name: String,
    pub approved: bool,
    pub timestamp: DateTime<Utc>,
}

/// Source of yes/no answers.
#[async_trait]
pub trait ApprovalPrompter: Send + Sync {
    /// Ask about `operation` and return the raw answer.
    async fn ask(&self, operation: &str) -> std::io::Result<String>;
}

/// Lines read from the console, in arrival order.
type LineReceiver = mpsc::Receiver<std::io::Result<String>>;

const LINE_BUFFER: usize = 16;

/// Prompts on stderr and reads answers from stdin.
///
/// One reader thread lives for the whole process and forwards each line over
/// a channel, so an abandoned prompt never leaves a read pending. Lines that
/// arrive after a prompt timed out are dropped before the next prompt.
pub struct ConsolePrompter {
    source: Mutex<LineSource>,
}

struct LineSource {
    lines: LineReceiver,
    /// The last prompt ended without an answer.
    abandoned: bool,
}

impl ConsolePrompter {
    /// Start the stdin reader thread.
    pub fn new() -> Self {
        Self::with_lines(spawn_line_reader(|| std::io::stdin().lock()))
    }

    fn with_lines(lines: LineReceiver) -> Self {
        Self {
            source: Mutex::new(LineSource {
                lines,
                abandoned: false,
            }),
        }
    }
}

impl Default for ConsolePrompter {
    fn default() -> Self {
        Self::new()
    }
}

/// Read lines on a plain OS thread. A detached thread does not hold up
/// runtime shutdown. The channel closes on EOF or a read error.
fn spawn_line_reader<R, F>(open: F) -> LineReceiver
where
    R: BufRead,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    let spawned = std::thread::Builder::new()
        .name("approval-stdin".into())
        .spawn(move || {
            let mut reader = open();
            loop {
                let mut line = String::new();
                let next = match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => Ok(line),
                    Err(e) => Err(e),
                };
                let failed = next.is_err();
                if tx.blocking_send(next).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Could not start stdin reader, prompts will be denied");
    }
    rx
}

#[async_trait]
impl ApprovalPrompter for ConsolePrompter {
    async fn ask(&self, operation: &str) -> std::io::Result<String> {
        let mut source = self.source.lock().await;
        if source.abandoned {
            while let Ok(stale) = source.lines.try_recv() {
                debug!(line = ?stale.ok(), "Discarding answer to an expired prompt");
            }
        }
        // Cleared only once an answer arrives; a dropped future leaves it set.
        source.abandoned = true;

        let mut stderr = std::io::stderr();
        write!(
            stderr,
            "Approve operation '{operation}'? [y]es / [n]o / [a]lways: "
        )?;
        stderr.flush()?;

        let answer = source.lines.recv().await.unwrap_or_else(|| {
            Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stdin closed",
            ))
        });
        source.abandoned = false;
        answer
    }
}

/// How a raw answer is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Once,
    Always,
    Deny,
}

fn parse_answer(raw: &str) -> Answer {
    match raw.trim().to_lowercase().as_str() {
        "y" | "yes" => Answer::Once,
        "a" | "always" => Answer::Always,
        _ => Answer::Deny,
    }
}

/// Guards the configured set of sensitive operations.
pub struct ApprovalGate {
    sensitive: HashSet<String>,
    prompter: Arc<dyn ApprovalPrompter>,
    timeout: Duration,
}

impl ApprovalGate {
    pub fn new(
        sensitive: HashSet<String>,
        prompter: Arc<dyn ApprovalPrompter>,
        timeout: Duration,
    ) -> Self {
        Self {
            sensitive,
            prompter,
            timeout,
        }
    }

    pub fn from_config(config: &PipelineConfig, prompter: Arc<dyn ApprovalPrompter>) -> Self {
        Self::new(
            config.sensitive_operations.clone(),
            prompter,
            config.approval_timeout,
        )
    }

    pub fn is_sensitive(&self, operation: &str) -> bool {
        self.sensitive.contains(operation)
    }

    /// Check an operation using the configured timeout.
    pub async fn check(
        &self,
        operation: &str,
        state: &mut RunState,
    ) -> Result<ApprovalDecision, ApprovalError> {
        self.check_with_cancel(operation, state, &CancellationToken::new())
            .await
    }

    /// Check an operation, resolving to a denial if `cancel` fires first.
    pub async fn check_with_cancel(
        &self,
        operation: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<ApprovalDecision, ApprovalError> {
        if state.bypass_approval() {
            return Ok(self.record(operation, true, state));
        }
        if !self.is_sensitive(operation) {
            return Ok(self.record(operation, true, state));
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ApprovalError::Cancelled {
                operation: operation.to_string(),
            }),
            asked = tokio::time::timeout(self.timeout, self.prompter.ask(operation)) => {
                match asked {
                    Err(_) => Err(ApprovalError::TimedOut {
                        operation: operation.to_string(),
                        timeout: self.timeout,
                    }),
                    Ok(Err(e)) => Err(ApprovalError::Denied {
                        operation: operation.to_string(),
                        reason: format!("could not read answer: {e}"),
                    }),
                    Ok(Ok(raw)) => match parse_answer(&raw) {
                        Answer::Once => Ok(()),
                        Answer::Always => {
                            state.enable_bypass_approval();
                            Ok(())
                        }
                        Answer::Deny => Err(ApprovalError::Denied {
                            operation: operation.to_string(),
                            reason: format!("answer was '{}'", raw.trim()),
                        }),
                    },
                }
            }
        };

        match outcome {
            Ok(()) => Ok(self.record(operation, true, state)),
            Err(e) => {
                self.record(operation, false, state);
                warn!(operation, error = %e, "Operation not approved");
                Err(e)
            }
        }
    }

    fn record(&self, operation: &str, approved: bool, state: &mut RunState) -> ApprovalDecision {
        let decision = ApprovalDecision {
            tool_name: operation.to_string(),
            approved,
            timestamp: Utc::now(),
        };
        let counter = if approved {
            keys::APPROVALS_GRANTED
        } else {
            keys::APPROVALS_DENIED
        };
        state.increment(counter, 1);
        info!(
            run_id = %state.run_id,
            tool = %decision.tool_name,
            approved = decision.approved,
            at = %decision.timestamp,
            "Approval decision"
        );
        decision
    }
}

#[async_trait]
impl BeforeToolCall for ApprovalGate {
    fn name(&self) -> &str {
        "approval_gate"
    }

    async fn before_tool_call(
        &self,
        tool_name: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<ApprovalDecision, ApprovalError> {
        self.check_with_cancel(tool_name, state, cancel).await
    }
}
