//! Notification channels for finished runs.
//!
//! Each channel is a `NotificationSink`; the orchestrator puts every delivery
//! through the approval gate under the channel's operation name.

pub mod email;
pub mod slack;

pub use email::{EmailConfig, EmailNotifier};
pub use slack::{SlackConfig, SlackNotifier};

/// Operation name guarding email delivery.
pub const OP_SEND_EMAIL: &str = "send_email";
/// Operation name guarding Slack delivery.
pub const OP_SEND_SLACK: &str = "send_slack";

/// Articles listed in chat messages before the list is cut off.
pub(crate) const CHAT_ARTICLE_LIMIT: usize = 10;

/// Relevance score rendered as a whole percentage, e.g. `0.856` → `86%`.
pub(crate) fn percent(score: f32) -> String {
    format!("{:.0}%", score * 100.0)
}
