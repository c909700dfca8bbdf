//! Summarization: per-article summaries and the run digest.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::SummaryStyle;
use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{ContentItem, SummaryKind, SummaryMethod, Summarizer};

/// Temperature for summaries (focused, a little freedom in wording).
const SUMMARY_TEMPERATURE: f32 = 0.4;

/// Max tokens for any summary reply.
const SUMMARY_MAX_TOKENS: u32 = 512;

/// Snippet length kept by the fallback summary.
const FALLBACK_SNIPPET_CHARS: usize = 200;

// ── Model-backed backend ────────────────────────────────────────────

/// `Summarizer` backed by an `LlmProvider`.
pub struct LlmSummarizer {
    llm: Arc<dyn LlmProvider>,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, text: &str, kind: SummaryKind) -> Result<String, LlmError> {
        let (system, user) = build_summary_prompt(text, kind);
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(user));

        let request = CompletionRequest::new(messages)
            .with_temperature(SUMMARY_TEMPERATURE)
            .with_max_tokens(SUMMARY_MAX_TOKENS);
        let response = self.llm.complete(request).await?;

        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.llm.model_name().to_string(),
                reason: "empty summary".to_string(),
            });
        }
        Ok(summary.to_string())
    }
}

fn style_instruction(style: SummaryStyle) -> &'static str {
    match style {
        SummaryStyle::Bullets => {
            "Generate a summary with 3-5 bullet points.\n\
Each point should be concise and capture a key insight.\n\
Format:\n• Point 1\n• Point 2\n• Point 3"
        }
        SummaryStyle::Paragraph => {
            "Generate a concise paragraph (3-4 sentences) summarizing the article.\n\
Focus on the main message and key takeaways."
        }
        SummaryStyle::Brief => {
            "Generate a one-sentence summary capturing the essence of the article."
        }
    }
}

/// System and user prompt for a summarization request.
fn build_summary_prompt(text: &str, kind: SummaryKind) -> (Option<&'static str>, String) {
    match kind {
        SummaryKind::Article(style) => (
            Some(
                "You are an expert news summarizer.\n\
Your summaries are concise, informative, and highlight key insights.\n\
Focus on facts and actionable information.\n\
Avoid fluff and marketing speak.",
            ),
            format!(
                "Summarize this news article:\n\n{text}\n\n{}\n\nSummary:",
                style_instruction(style)
            ),
        ),
        SummaryKind::Executive => (
            Some("You are a news editor creating daily digests."),
            format!(
                "Create a brief executive summary (3-4 sentences) of today's news:\n\n{text}\n\nExecutive Summary:"
            ),
        ),
        SummaryKind::History => (
            None,
            format!(
                "Summarize the following conversation in 6 concise bullet points:\n\n{text}\n\nSummary:"
            ),
        ),
    }
}

// ── Article stage ───────────────────────────────────────────────────

/// A summary produced for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleSummary {
    pub text: String,
    pub method: SummaryMethod,
}

/// Summarizes surviving items and the run as a whole.
pub struct ArticleSummarizer {
    backend: Arc<dyn Summarizer>,
    style: SummaryStyle,
    concurrency: usize,
}

impl ArticleSummarizer {
    pub fn new(backend: Arc<dyn Summarizer>, style: SummaryStyle, concurrency: usize) -> Self {
        Self {
            backend,
            style,
            concurrency: concurrency.max(1),
        }
    }

    pub fn style(&self) -> SummaryStyle {
        self.style
    }

    /// Summarize one item, falling back to its snippet on backend failure.
    pub async fn summarize_item(&self, item: &ContentItem) -> ArticleSummary {
        let text = format!(
            "Title: {}\nSource: {}\nContent: {}",
            item.title, item.source, item.body
        );
        match self
            .backend
            .summarize(&text, SummaryKind::Article(self.style))
            .await
        {
            Ok(summary) => ArticleSummary {
                text: summary,
                method: SummaryMethod::Model,
            },
            Err(e) => {
                warn!(title = %item.title, error = %e, "Summary failed, using fallback");
                ArticleSummary {
                    text: fallback_summary(item),
                    method: SummaryMethod::Fallback,
                }
            }
        }
    }

    /// Summarize every item with bounded parallelism. Output order matches input.
    pub async fn summarize_all(&self, items: &[ContentItem]) -> Vec<ArticleSummary> {
        let summaries: Vec<ArticleSummary> = stream::iter(items)
            .map(|item| self.summarize_item(item))
            .buffered(self.concurrency)
            .collect()
            .await;
        info!(
            total = summaries.len(),
            fallbacks = summaries
                .iter()
                .filter(|s| s.method == SummaryMethod::Fallback)
                .count(),
            style = self.style.as_str(),
            "Summarized articles"
        );
        summaries
    }

    /// Short digest of the run built from the (compacted) working context.
    pub async fn executive_digest(
        &self,
        context: &[ChatMessage],
        article_count: usize,
    ) -> ArticleSummary {
        let text = context
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        match self.backend.summarize(&text, SummaryKind::Executive).await {
            Ok(digest) => {
                debug!(chars = digest.len(), "Generated executive digest");
                ArticleSummary {
                    text: digest,
                    method: SummaryMethod::Model,
                }
            }
            Err(e) => {
                warn!(error = %e, "Digest failed, using fallback");
                ArticleSummary {
                    text: fallback_digest(article_count),
                    method: SummaryMethod::Fallback,
                }
            }
        }
    }
}

/// Summary used when the backend is unavailable.
pub fn fallback_summary(item: &ContentItem) -> String {
    let snippet = item.body.trim();
    if snippet.chars().count() > FALLBACK_SNIPPET_CHARS {
        let cut: String = snippet.chars().take(FALLBACK_SNIPPET_CHARS).collect();
        format!("{cut}...")
    } else if !snippet.is_empty() {
        snippet.to_string()
    } else {
        format!("Article from {}: {}", item.source, item.title)
    }
}

/// Digest used when the backend is unavailable.
pub fn fallback_digest(article_count: usize) -> String {
    format!("Today's news covers {article_count} articles on various topics.")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::llm::provider::{CompletionResponse, FinishReason};

    /// Fails for any text containing "FAIL", otherwise echoes the kind.
    struct MockSummarizer;

    #[async_trait]
    impl Summarizer for MockSummarizer {
        async fn summarize(&self, text: &str, kind: SummaryKind) -> Result<String, LlmError> {
            if text.contains("FAIL") {
                return Err(LlmError::Timeout {
                    provider: "mock".into(),
                    after: std::time::Duration::from_secs(1),
                });
            }
            Ok(format!("{kind:?}"))
        }
    }

    struct RecordingLlm {
        last: Mutex<Vec<ChatMessage>>,
        reply: &'static str,
    }

    #[async_trait]
    impl LlmProvider for RecordingLlm {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            *self.last.lock().unwrap() = request.messages.clone();
            Ok(CompletionResponse {
                content: self.reply.to_string(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[test]
    fn fallback_summary_truncates_long_snippets() {
        let long = "x".repeat(250);
        let item = ContentItem::new("T", long, "S");
        let summary = fallback_summary(&item);
        assert_eq!(summary.chars().count(), 203);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn fallback_summary_uses_source_and_title_without_snippet() {
        let item = ContentItem::new("Big news", "", "Wire");
        assert_eq!(fallback_summary(&item), "Article from Wire: Big news");
        let item = ContentItem::new("Big news", "short one", "Wire");
        assert_eq!(fallback_summary(&item), "short one");
    }

    #[tokio::test]
    async fn failures_fall_back_per_item_in_order() {
        let stage = ArticleSummarizer::new(Arc::new(MockSummarizer), SummaryStyle::Brief, 4);
        let items = vec![
            ContentItem::new("One", "fine", "S"),
            ContentItem::new("Two", "FAIL here", "S"),
            ContentItem::new("Three", "fine", "S"),
        ];
        let summaries = stage.summarize_all(&items).await;
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].text, "Article(Brief)");
        assert_eq!(summaries[1].method, SummaryMethod::Fallback);
        assert_eq!(summaries[1].text, "FAIL here");
        assert_eq!(summaries[2].method, SummaryMethod::Model);
    }

    #[tokio::test]
    async fn digest_falls_back_with_count() {
        let stage = ArticleSummarizer::new(Arc::new(MockSummarizer), SummaryStyle::Bullets, 1);
        let digest = stage
            .executive_digest(&[ChatMessage::user("FAIL")], 7)
            .await;
        assert_eq!(digest.method, SummaryMethod::Fallback);
        assert_eq!(
            digest.text,
            "Today's news covers 7 articles on various topics."
        );
    }

    #[tokio::test]
    async fn llm_summarizer_uses_style_instruction() {
        let llm = Arc::new(RecordingLlm {
            last: Mutex::new(Vec::new()),
            reply: "  • point\n",
        });
        let summarizer = LlmSummarizer::new(llm.clone());
        let out = summarizer
            .summarize("Title: T", SummaryKind::Article(SummaryStyle::Paragraph))
            .await
            .unwrap();
        assert_eq!(out, "• point");
        let messages = llm.last.lock().unwrap().clone();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("3-4 sentences"));
    }

    #[tokio::test]
    async fn history_prompt_has_no_system_message() {
        let llm = Arc::new(RecordingLlm {
            last: Mutex::new(Vec::new()),
            reply: "- a",
        });
        LlmSummarizer::new(llm.clone())
            .summarize("hello", SummaryKind::History)
            .await
            .unwrap();
        let messages = llm.last.lock().unwrap().clone();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("6 concise bullet points"));
    }

    #[tokio::test]
    async fn empty_model_output_is_an_error() {
        let llm = Arc::new(RecordingLlm {
            last: Mutex::new(Vec::new()),
            reply: "   ",
        });
        let result = LlmSummarizer::new(llm)
            .summarize("x", SummaryKind::Executive)
            .await;
        assert!(matches!(result, Err(LlmError::InvalidResponse { .. })));
    }
}
