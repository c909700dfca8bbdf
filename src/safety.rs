//! Safety layer: PII redaction for everything that leaves the process.
//!
//! Patterns are applied in a fixed order: emails first, then phone numbers.
//! Placeholders contain neither `@` nor digits, so redacting twice yields
//! the same text as redacting once.

use std::borrow::Cow;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use crate::agent::middleware::{AfterResponse, BeforePrompt};
use crate::context::RunState;
use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider};
use crate::pipeline::types::ContentItem;

pub const EMAIL_PLACEHOLDER: &str = "[REDACTED_EMAIL]";
pub const PHONE_PLACEHOLDER: &str = "[REDACTED_PHONE]";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid email regex")
});

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\+?\d[\d\s\-()]{6,}\d\b").expect("valid phone regex"));

/// Strips emails and phone numbers from text payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedactionFilter;

impl RedactionFilter {
    pub fn new() -> Self {
        Self
    }

    /// Redact a text payload. Never fails; no match means no change.
    pub fn redact(&self, text: &str) -> String {
        let emails = EMAIL_RE.replace_all(text, EMAIL_PLACEHOLDER);
        match PHONE_RE.replace_all(&emails, PHONE_PLACEHOLDER) {
            Cow::Borrowed(_) => emails.into_owned(),
            Cow::Owned(s) => s,
        }
    }

    /// Redact a chat message, keeping its role.
    pub fn redact_message(&self, message: ChatMessage) -> ChatMessage {
        ChatMessage {
            role: message.role,
            content: self.redact(&message.content),
        }
    }

    /// Redact every string inside a JSON value, keeping its shape.
    pub fn redact_value(&self, value: serde_json::Value) -> serde_json::Value {
        use serde_json::Value;
        match value {
            Value::String(s) => Value::String(self.redact(&s)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.redact_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.redact_value(v)))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Redact the free-text fields of a fetched item in place.
    ///
    /// Returns true if anything changed.
    pub fn redact_item(&self, item: &mut ContentItem) -> bool {
        let title = self.redact(&item.title);
        let body = self.redact(&item.body);
        let changed = title != item.title || body != item.body;
        item.title = title;
        item.body = body;
        changed
    }
}

#[async_trait]
impl BeforePrompt for RedactionFilter {
    fn name(&self) -> &str {
        "redaction"
    }

    async fn before_prompt(
        &self,
        messages: Vec<ChatMessage>,
        _state: &RunState,
    ) -> Vec<ChatMessage> {
        messages
            .into_iter()
            .map(|m| self.redact_message(m))
            .collect()
    }
}

#[async_trait]
impl AfterResponse for RedactionFilter {
    fn name(&self) -> &str {
        "redaction"
    }

    async fn after_response(&self, response: String, _state: &RunState) -> String {
        self.redact(&response)
    }
}

/// Provider wrapper that redacts every outbound message.
pub struct RedactingProvider {
    inner: Arc<dyn LlmProvider>,
    filter: RedactionFilter,
}

impl RedactingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, filter: RedactionFilter) -> Self {
        Self { inner, filter }
    }
}

#[async_trait]
impl LlmProvider for RedactingProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete(
        &self,
        mut request: CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        request.messages = request
            .messages
            .into_iter()
            .map(|m| self.filter.redact_message(m))
            .collect();
        self.inner.complete(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::llm::provider::{FinishReason, Role};

    #[test]
    fn redacts_emails_and_phones() {
        let filter = RedactionFilter::new();
        let out = filter.redact("Contact jane.doe@example.com or call +1 (555) 123-4567 today");
        assert!(out.contains(EMAIL_PLACEHOLDER));
        assert!(out.contains(PHONE_PLACEHOLDER));
        assert!(!out.contains("example.com"));
        assert!(!out.contains("123-4567"));
        assert!(out.ends_with("today"));
    }

    #[test]
    fn no_match_is_identity() {
        let filter = RedactionFilter::new();
        let text = "Rust 1.80 ships LazyLock; version 2024 edition.";
        assert_eq!(filter.redact(text), text);
        assert_eq!(filter.redact(""), "");
    }

    #[test]
    fn redaction_is_idempotent() {
        let filter = RedactionFilter::new();
        let samples = [
            "a@b.com",
            "mail me: first.last+tag@sub.domain.org, or x@y.io",
            "call 555-123-4567 or +44 20 7946 0958",
            "+1 555 123 4567 and bob@example.com next to 5551234567",
            "IDs like 12345 stay, but 123456789 goes",
            "[REDACTED_EMAIL] [REDACTED_PHONE] already clean",
            "weird (555)1234567x and a@b.co5551234567",
            "unicode: café@exämple.com 電話 090-1234-5678",
        ];
        for s in samples {
            let once = filter.redact(s);
            let twice = filter.redact(&once);
            assert_eq!(once, twice, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn short_numbers_survive() {
        let filter = RedactionFilter::new();
        assert_eq!(filter.redact("Top 10 stories of 2024"), "Top 10 stories of 2024");
    }

    #[test]
    fn redact_value_preserves_shape() {
        let filter = RedactionFilter::new();
        let value = serde_json::json!({
            "role": "user",
            "content": "ping ops@example.com",
            "meta": {"count": 3, "tags": ["555-123-4567", "ok"]}
        });
        let out = filter.redact_value(value);
        assert_eq!(out["role"], "user");
        assert_eq!(out["content"], "ping [REDACTED_EMAIL]");
        assert_eq!(out["meta"]["count"], 3);
        assert_eq!(out["meta"]["tags"][0], PHONE_PLACEHOLDER);
        assert_eq!(out["meta"]["tags"][1], "ok");
    }

    #[test]
    fn redact_message_keeps_role() {
        let filter = RedactionFilter::new();
        let msg = filter.redact_message(ChatMessage::system("admin@corp.io"));
        assert_eq!(msg.role, Role::System);
        assert_eq!(msg.content, EMAIL_PLACEHOLDER);
    }

    #[test]
    fn redact_item_reports_changes() {
        let filter = RedactionFilter::new();
        let mut item = ContentItem::new("Leak", "write to tips@paper.com", "Paper");
        assert!(filter.redact_item(&mut item));
        assert_eq!(item.body, "write to [REDACTED_EMAIL]");
        assert!(!filter.redact_item(&mut item));
    }

    struct RecordingLlm {
        seen: Mutex<Vec<String>>,
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
            let mut seen = self.seen.lock().unwrap();
            for m in &request.messages {
                seen.push(m.content.clone());
            }
            Ok(CompletionResponse {
                content: "done".into(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[tokio::test]
    async fn redacting_provider_scrubs_outbound_messages() {
        let inner = Arc::new(RecordingLlm {
            seen: Mutex::new(Vec::new()),
        });
        let provider = RedactingProvider::new(inner.clone(), RedactionFilter::new());
        provider
            .complete(CompletionRequest::new(vec![
                ChatMessage::system("be terse"),
                ChatMessage::user("reach me at me@home.net"),
            ]))
            .await
            .unwrap();
        let seen = inner.seen.lock().unwrap();
        assert_eq!(seen[0], "be terse");
        assert_eq!(seen[1], "reach me at [REDACTED_EMAIL]");
    }
}
