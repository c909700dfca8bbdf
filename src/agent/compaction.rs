//! History compaction: keeps a working history bounded.
//!
//! When the history grows past `max_messages`, the tail is condensed into a
//! single digest message and only the most recent messages survive verbatim.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::agent::middleware::BeforePrompt;
use crate::context::RunState;
use crate::llm::provider::ChatMessage;
use crate::pipeline::types::{SummaryKind, Summarizer};

/// Prefix of the synthetic digest message.
pub const DIGEST_PREFIX: &str = "[Conversation summary]";

/// Digest used when the summarization backend fails.
pub const SUMMARY_UNAVAILABLE: &str = "[summary-unavailable]";

/// Condenses overflowing histories into a digest plus a recent window.
pub struct HistoryCompactor {
    summarizer: Arc<dyn Summarizer>,
    max_messages: usize,
    keep_recent: usize,
}

impl HistoryCompactor {
    pub fn new(summarizer: Arc<dyn Summarizer>, max_messages: usize, keep_recent: usize) -> Self {
        Self {
            summarizer,
            max_messages,
            keep_recent,
        }
    }

    /// Compact `messages` if there are more than `max_messages` of them.
    ///
    /// Never fails: a backend error yields [`SUMMARY_UNAVAILABLE`] as digest.
    pub async fn compact(
        &self,
        messages: Vec<ChatMessage>,
        max_messages: usize,
    ) -> Vec<ChatMessage> {
        if messages.len() <= max_messages {
            return messages;
        }

        let texts: Vec<&str> = messages
            .iter()
            .map(|m| m.content.as_str())
            .filter(|c| !c.is_empty())
            .collect();
        let transcript = texts[texts.len().saturating_sub(max_messages)..].join("\n");

        let digest = match self
            .summarizer
            .summarize(&transcript, SummaryKind::History)
            .await
        {
            Ok(digest) if !digest.trim().is_empty() => digest.trim().to_string(),
            Ok(_) => {
                warn!("History summarizer returned nothing, using placeholder");
                SUMMARY_UNAVAILABLE.to_string()
            }
            Err(e) => {
                warn!(error = %e, "History summarization failed, using placeholder");
                SUMMARY_UNAVAILABLE.to_string()
            }
        };

        let keep = self.keep_recent.min(messages.len());
        let recent_start = messages.len() - keep;
        debug!(
            original = messages.len(),
            kept = keep,
            "Compacted history"
        );

        let mut compacted = Vec::with_capacity(keep + 1);
        compacted.push(ChatMessage::system(format!("{DIGEST_PREFIX}\n{digest}")));
        compacted.extend(messages.into_iter().skip(recent_start));
        compacted
    }
}

#[async_trait]
impl BeforePrompt for HistoryCompactor {
    fn name(&self) -> &str {
        "history_compactor"
    }

    async fn before_prompt(
        &self,
        messages: Vec<ChatMessage>,
        _state: &RunState,
    ) -> Vec<ChatMessage> {
        self.compact(messages, self.max_messages).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::LlmError;
    use crate::llm::provider::Role;

    struct MockSummarizer {
        calls: AtomicU32,
        last_input: Mutex<String>,
        fail: bool,
    }

    impl MockSummarizer {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                last_input: Mutex::new(String::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl Summarizer for MockSummarizer {
        async fn summarize(&self, text: &str, kind: SummaryKind) -> Result<String, LlmError> {
            assert_eq!(kind, SummaryKind::History);
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_input.lock().unwrap() = text.to_string();
            if self.fail {
                return Err(LlmError::RequestFailed {
                    provider: "mock".into(),
                    reason: "down".into(),
                });
            }
            Ok("- point one\n- point two".into())
        }
    }

    fn history(n: usize) -> Vec<ChatMessage> {
        (1..=n).map(|i| ChatMessage::user(format!("msg {i}"))).collect()
    }

    #[tokio::test]
    async fn short_history_is_untouched() {
        let summarizer = Arc::new(MockSummarizer::new(false));
        let compactor = HistoryCompactor::new(summarizer.clone(), 15, 5);
        let input = history(10);
        let out = compactor.compact(input.clone(), 15).await;
        assert_eq!(out, input);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn history_at_threshold_is_untouched() {
        let summarizer = Arc::new(MockSummarizer::new(false));
        let compactor = HistoryCompactor::new(summarizer.clone(), 15, 5);
        let out = compactor.compact(history(15), 15).await;
        assert_eq!(out.len(), 15);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn long_history_becomes_digest_plus_recent() {
        let summarizer = Arc::new(MockSummarizer::new(false));
        let compactor = HistoryCompactor::new(summarizer.clone(), 15, 5);
        let out = compactor.compact(history(18), 15).await;

        assert_eq!(out.len(), 6);
        assert_eq!(out[0].role, Role::System);
        assert!(out[0].content.starts_with(DIGEST_PREFIX));
        assert!(out[0].content.contains("point one"));
        let tail: Vec<_> = out[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(tail, vec!["msg 14", "msg 15", "msg 16", "msg 17", "msg 18"]);

        // Only the last 15 messages feed the digest.
        let input = summarizer.last_input.lock().unwrap().clone();
        assert!(input.starts_with("msg 4\n"));
        assert!(!input.contains("msg 3\n"));
    }

    #[tokio::test]
    async fn backend_failure_uses_placeholder() {
        let compactor = HistoryCompactor::new(Arc::new(MockSummarizer::new(true)), 15, 5);
        let out = compactor.compact(history(20), 15).await;
        assert_eq!(out.len(), 6);
        assert_eq!(
            out[0].content,
            format!("{DIGEST_PREFIX}\n{SUMMARY_UNAVAILABLE}")
        );
    }

    #[tokio::test]
    async fn hook_uses_configured_threshold() {
        let compactor = HistoryCompactor::new(Arc::new(MockSummarizer::new(false)), 3, 2);
        let out = compactor.before_prompt(history(4), &RunState::new()).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].content, "msg 4");
    }
}
