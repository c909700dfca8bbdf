//! Middleware capabilities and the ordered chain that runs them.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent::approval::ApprovalDecision;
use crate::context::RunState;
use crate::error::ApprovalError;
use crate::llm::provider::ChatMessage;

/// Rewrites the message list before it is sent to a model.
#[async_trait]
pub trait BeforePrompt: Send + Sync {
    fn name(&self) -> &str;

    async fn before_prompt(&self, messages: Vec<ChatMessage>, state: &RunState)
    -> Vec<ChatMessage>;
}

/// Decides whether a named operation may run.
#[async_trait]
pub trait BeforeToolCall: Send + Sync {
    fn name(&self) -> &str;

    async fn before_tool_call(
        &self,
        tool_name: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<ApprovalDecision, ApprovalError>;
}

/// Rewrites model output before anything downstream sees it.
#[async_trait]
pub trait AfterResponse: Send + Sync {
    fn name(&self) -> &str;

    async fn after_response(&self, response: String, state: &RunState) -> String;
}

/// Fixed, ordered hook lists, one per capability.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    before_prompt: Vec<Arc<dyn BeforePrompt>>,
    before_tool_call: Vec<Arc<dyn BeforeToolCall>>,
    after_response: Vec<Arc<dyn AfterResponse>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_before_prompt(mut self, hook: Arc<dyn BeforePrompt>) -> Self {
        self.before_prompt.push(hook);
        self
    }

    pub fn with_before_tool_call(mut self, hook: Arc<dyn BeforeToolCall>) -> Self {
        self.before_tool_call.push(hook);
        self
    }

    pub fn with_after_response(mut self, hook: Arc<dyn AfterResponse>) -> Self {
        self.after_response.push(hook);
        self
    }

    /// Run every `BeforePrompt` hook in registration order.
    pub async fn run_before_prompt(
        &self,
        mut messages: Vec<ChatMessage>,
        state: &RunState,
    ) -> Vec<ChatMessage> {
        for hook in &self.before_prompt {
            let before = messages.len();
            messages = hook.before_prompt(messages, state).await;
            tracing::debug!(
                hook = hook.name(),
                before,
                after = messages.len(),
                "before_prompt hook applied"
            );
        }
        messages
    }

    /// Ask every `BeforeToolCall` hook in order; the first rejection wins.
    ///
    /// With no hooks registered every operation is allowed.
    pub async fn run_before_tool_call(
        &self,
        tool_name: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Vec<ApprovalDecision>, ApprovalError> {
        let mut decisions = Vec::with_capacity(self.before_tool_call.len());
        for hook in &self.before_tool_call {
            decisions.push(hook.before_tool_call(tool_name, state, cancel).await?);
        }
        Ok(decisions)
    }

    /// Run every `AfterResponse` hook in registration order.
    pub async fn run_after_response(&self, mut response: String, state: &RunState) -> String {
        for hook in &self.after_response {
            response = hook.after_response(response, state).await;
        }
        response
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.before_prompt.is_empty()
            && self.before_tool_call.is_empty()
            && self.after_response.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    struct Tag(&'static str);

    #[async_trait]
    impl BeforePrompt for Tag {
        fn name(&self) -> &str {
            self.0
        }

        async fn before_prompt(
            &self,
            mut messages: Vec<ChatMessage>,
            _state: &RunState,
        ) -> Vec<ChatMessage> {
            messages.push(ChatMessage::user(self.0));
            messages
        }
    }

    #[async_trait]
    impl AfterResponse for Tag {
        fn name(&self) -> &str {
            self.0
        }

        async fn after_response(&self, response: String, _state: &RunState) -> String {
            format!("{response}{}", self.0)
        }
    }

    struct Refuse;

    #[async_trait]
    impl BeforeToolCall for Refuse {
        fn name(&self) -> &str {
            "refuse"
        }

        async fn before_tool_call(
            &self,
            tool_name: &str,
            _state: &mut RunState,
            _cancel: &CancellationToken,
        ) -> Result<ApprovalDecision, ApprovalError> {
            Err(ApprovalError::Denied {
                operation: tool_name.to_string(),
                reason: "always refuses".into(),
            })
        }
    }

    struct Allow;

    #[async_trait]
    impl BeforeToolCall for Allow {
        fn name(&self) -> &str {
            "allow"
        }

        async fn before_tool_call(
            &self,
            tool_name: &str,
            _state: &mut RunState,
            _cancel: &CancellationToken,
        ) -> Result<ApprovalDecision, ApprovalError> {
            Ok(ApprovalDecision {
                tool_name: tool_name.to_string(),
                approved: true,
                timestamp: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let chain = MiddlewareChain::new()
            .with_before_prompt(Arc::new(Tag("a")))
            .with_before_prompt(Arc::new(Tag("b")))
            .with_after_response(Arc::new(Tag("x")))
            .with_after_response(Arc::new(Tag("y")));
        let state = RunState::new();

        let messages = chain.run_before_prompt(Vec::new(), &state).await;
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);

        assert_eq!(chain.run_after_response("r".into(), &state).await, "rxy");
    }

    #[tokio::test]
    async fn first_rejection_stops_tool_call() {
        let chain = MiddlewareChain::new()
            .with_before_tool_call(Arc::new(Allow))
            .with_before_tool_call(Arc::new(Refuse))
            .with_before_tool_call(Arc::new(Allow));
        let mut state = RunState::new();
        let result = chain
            .run_before_tool_call("save_summary", &mut state, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ApprovalError::Denied { .. })));
    }

    #[tokio::test]
    async fn empty_chain_allows_everything() {
        let chain = MiddlewareChain::new();
        assert!(chain.is_empty());
        let mut state = RunState::new();
        let decisions = chain
            .run_before_tool_call("anything", &mut state, &CancellationToken::new())
            .await
            .unwrap();
        assert!(decisions.is_empty());
    }
}
