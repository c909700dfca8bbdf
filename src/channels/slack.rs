//! Slack channel: block-kit digest posted to an incoming webhook, plus a
//! short completion or error notice once the run ends.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::channels::{CHAT_ARTICLE_LIMIT, OP_SEND_SLACK, percent};
use crate::error::{ChannelError, ConfigError};
use crate::pipeline::NotificationSink;
use crate::pipeline::report::{RunReport, RunStatus};

const SUMMARY_PREVIEW_CHARS: usize = 200;

/// Slack webhook settings.
#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub webhook_url: SecretString,
    pub timeout: Duration,
}

impl SlackConfig {
    /// Build from `SLACK_WEBHOOK_URL` (required).
    pub fn from_env() -> Result<Self, ConfigError> {
        let webhook_url = std::env::var("SLACK_WEBHOOK_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("SLACK_WEBHOOK_URL".into()))?;
        Ok(Self {
            webhook_url: SecretString::from(webhook_url),
            timeout: Duration::from_secs(10),
        })
    }
}

pub struct SlackNotifier {
    client: reqwest::Client,
    config: SlackConfig,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn post(&self, payload: &Value) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.config.webhook_url.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "slack".into(),
                reason: format!("HTTP {status}: {body}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    fn operation(&self) -> &str {
        OP_SEND_SLACK
    }

    async fn deliver(&self, report: &RunReport) -> Result<(), ChannelError> {
        let payload = build_slack_message(report, Local::now().date_naive());
        self.post(&payload).await?;
        tracing::info!(articles = report.items.len(), "Posted digest to Slack");
        Ok(())
    }

    async fn run_finished(&self, report: &RunReport) -> Result<(), ChannelError> {
        self.post(&completion_message(report)).await?;
        tracing::debug!(status = ?report.status, "Posted completion notice to Slack");
        Ok(())
    }
}

fn section(text: String) -> Value {
    json!({ "type": "section", "text": { "type": "mrkdwn", "text": text } })
}

fn context(text: &str) -> Value {
    json!({ "type": "context", "elements": [{ "type": "mrkdwn", "text": text }] })
}

/// Block-kit payload: header, digest, article count, then the top articles.
pub fn build_slack_message(report: &RunReport, date: NaiveDate) -> Value {
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {
                "type": "plain_text",
                "text": format!("Daily News Digest - {}", date.format("%B %d, %Y")),
            }
        }),
        json!({ "type": "divider" }),
    ];

    if let Some(digest) = report.digest.as_deref().filter(|_| !report.items.is_empty()) {
        blocks.push(section(format!("*Executive Summary*\n{digest}")));
        blocks.push(json!({ "type": "divider" }));
    }

    blocks.push(section(format!("*{} Articles Today*", report.items.len())));

    for (idx, item) in report.items.iter().take(CHAT_ARTICLE_LIMIT).enumerate() {
        let n = idx + 1;
        let summary = item.summary.as_deref().unwrap_or("No summary");
        let preview = if summary.chars().count() > SUMMARY_PREVIEW_CHARS {
            format!(
                "{}...",
                summary.chars().take(SUMMARY_PREVIEW_CHARS).collect::<String>()
            )
        } else {
            summary.to_string()
        };

        let mut text = format!("*{n}. {}*\n_Source: {}", item.title, item.source);
        if let Some(score) = item.relevance_score.filter(|s| *s > 0.0) {
            text.push_str(&format!(" | Relevance: {}", percent(score)));
        }
        text.push_str(&format!("_\n{preview}"));
        blocks.push(section(text));

        if let Some(url) = &item.url {
            blocks.push(json!({
                "type": "actions",
                "elements": [{
                    "type": "button",
                    "text": { "type": "plain_text", "text": "Read More" },
                    "url": url,
                    "action_id": format!("read_article_{n}"),
                }]
            }));
        }
        blocks.push(json!({ "type": "divider" }));
    }

    if report.items.len() > CHAT_ARTICLE_LIMIT {
        blocks.push(context(&format!(
            "_Showing top {CHAT_ARTICLE_LIMIT} of {} articles_",
            report.items.len()
        )));
    }
    blocks.push(context("_Generated by News Digest_"));

    json!({ "blocks": blocks })
}

/// Plain notice with an optional header block.
pub fn simple_message(text: &str, title: Option<&str>) -> Value {
    match title {
        Some(title) => json!({
            "text": text,
            "blocks": [
                { "type": "header", "text": { "type": "plain_text", "text": title } },
                section(text.to_string()),
            ]
        }),
        None => json!({ "text": text }),
    }
}

/// Success notice with the article count, or an error alert for failed runs.
pub fn completion_message(report: &RunReport) -> Value {
    match report.status {
        RunStatus::Completed | RunStatus::CompletedEmpty => simple_message(
            &format!(
                "Daily news digest completed successfully!\nProcessed {} articles.",
                report.articles_summarized
            ),
            None,
        ),
        RunStatus::Failed => {
            let stage = report.failed_stage.as_deref().unwrap_or("unknown");
            let error = report.error.as_deref().unwrap_or("Check logs for details.");
            simple_message(
                &format!("*Daily news digest failed* (stage: {stage})\n```{error}```"),
                Some("Error Alert"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunState;
    use crate::pipeline::report::ItemSnapshot;

    fn snapshot(i: usize, url: Option<&str>, summary: &str) -> ItemSnapshot {
        ItemSnapshot {
            title: format!("Story {i}"),
            source: "Wire".into(),
            url: url.map(String::from),
            relevance_score: Some(0.75),
            filter_method: None,
            summary: Some(summary.into()),
        }
    }

    fn texts(payload: &Value) -> Vec<String> {
        payload["blocks"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|b| b["text"]["text"].as_str().map(String::from))
            .collect()
    }

    #[test]
    fn message_has_header_digest_and_articles() {
        let mut report = RunReport::new(&RunState::new());
        report.digest = Some("All quiet.".into());
        report.items = vec![snapshot(1, Some("https://x.io/1"), "short")];

        let payload = build_slack_message(&report, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        let blocks = payload["blocks"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "header");
        assert_eq!(blocks[0]["text"]["text"], "Daily News Digest - March 09, 2024");

        let texts = texts(&payload);
        assert!(texts.contains(&"*Executive Summary*\nAll quiet.".to_string()));
        assert!(texts.contains(&"*1 Articles Today*".to_string()));
        assert!(texts.contains(&"*1. Story 1*\n_Source: Wire | Relevance: 75%_\nshort".to_string()));

        let button = blocks.iter().find(|b| b["type"] == "actions").unwrap();
        assert_eq!(button["elements"][0]["url"], "https://x.io/1");
        assert_eq!(button["elements"][0]["action_id"], "read_article_1");
    }

    #[test]
    fn long_lists_are_capped_and_summaries_cut() {
        let mut report = RunReport::new(&RunState::new());
        let long = "z".repeat(250);
        report.items = (1..=12).map(|i| snapshot(i, None, &long)).collect();

        let payload = build_slack_message(&report, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        let texts = texts(&payload);
        assert_eq!(texts.iter().filter(|t| t.starts_with("*") && t.contains("Story")).count(), 10);
        assert!(texts.iter().any(|t| t.ends_with(&format!("{}...", "z".repeat(200)))));

        let footer = payload["blocks"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|b| b["type"] == "context")
            .map(|b| b["elements"][0]["text"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(footer[0], "_Showing top 10 of 12 articles_");
        assert!(!texts.iter().any(|t| t.contains("Executive Summary")));
    }

    #[test]
    fn completion_notice_reports_article_count() {
        let mut report = RunReport::new(&RunState::new());
        report.status = RunStatus::Completed;
        report.articles_summarized = 7;

        let payload = completion_message(&report);
        assert_eq!(
            payload["text"],
            "Daily news digest completed successfully!\nProcessed 7 articles."
        );
        assert!(payload.get("blocks").is_none());
    }

    #[test]
    fn failed_run_sends_error_alert() {
        let mut report = RunReport::new(&RunState::new());
        report.status = RunStatus::Failed;
        report.failed_stage = Some("persisting".into());
        report.error = Some("disk full".into());

        let payload = completion_message(&report);
        let text = payload["text"].as_str().unwrap();
        assert!(text.contains("stage: persisting"));
        assert!(text.contains("```disk full```"));
        assert_eq!(payload["blocks"][0]["text"]["text"], "Error Alert");
        assert_eq!(payload["blocks"][1]["text"]["text"], text);
    }

    #[test]
    fn config_from_env_requires_webhook() {
        // SAFETY: This test runs in isolation; no other thread reads SLACK_WEBHOOK_URL concurrently.
        unsafe { std::env::remove_var("SLACK_WEBHOOK_URL") };
        assert!(SlackConfig::from_env().is_err());
    }
}
