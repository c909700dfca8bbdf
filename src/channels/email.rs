//! Email channel: text and HTML digest over SMTP via lettre, with the day's
//! CSV and raw JSON files attached.

use std::path::Path;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MessageBuilder, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::channels::{OP_SEND_EMAIL, percent};
use crate::config::split_list;
use crate::error::{ChannelError, ConfigError};
use crate::pipeline::NotificationSink;
use crate::pipeline::report::RunReport;

const RULE_WIDTH: usize = 60;

// ── Configuration ───────────────────────────────────────────────────

/// SMTP settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub recipients: Vec<String>,
    /// Attach the saved CSV summary and raw JSON dump.
    pub include_attachments: bool,
}

impl EmailConfig {
    /// Build config from `SMTP_*` and `EMAIL_*` variables.
    ///
    /// `SMTP_USERNAME`, `SMTP_PASSWORD` and `EMAIL_TO` are required.
    /// `EMAIL_ATTACHMENTS=false` turns attachments off.
    pub fn from_env() -> Result<Self, ConfigError> {
        let smtp_host = std::env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string());

        let smtp_port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = required("SMTP_USERNAME")?;
        let password = SecretString::from(required("SMTP_PASSWORD")?);
        let from_address = std::env::var("EMAIL_FROM").unwrap_or_else(|_| username.clone());

        let recipients = split_list(&required("EMAIL_TO")?);
        if recipients.is_empty() {
            return Err(ConfigError::MissingEnvVar("EMAIL_TO".into()));
        }

        let include_attachments = std::env::var("EMAIL_ATTACHMENTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(true);

        Ok(Self {
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            recipients,
            include_attachments,
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

// ── Notifier ────────────────────────────────────────────────────────

/// Sends the run digest to the configured recipients.
pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn message_builder(&self, subject: &str) -> Result<MessageBuilder, ChannelError> {
        let mut builder = Message::builder()
            .from(self.config.from_address.parse().map_err(|e| {
                send_failed(format!("Invalid from address: {e}"))
            })?)
            .subject(subject);

        for to in &self.config.recipients {
            builder = builder.to(to
                .parse()
                .map_err(|e| send_failed(format!("Invalid to address {to}: {e}")))?);
        }
        Ok(builder)
    }

    /// Digest as `multipart/alternative`, wrapped in `multipart/mixed` when
    /// there are attachments.
    fn build_digest(
        &self,
        report: &RunReport,
        date: NaiveDate,
        attachments: Vec<SinglePart>,
    ) -> Result<Message, ChannelError> {
        let alternative = MultiPart::alternative_plain_html(
            format_email_body(report, date),
            format_email_html(report, date),
        );
        let body = if attachments.is_empty() {
            alternative
        } else {
            attachments
                .into_iter()
                .fold(MultiPart::mixed().multipart(alternative), |body, part| {
                    body.singlepart(part)
                })
        };

        self.message_builder(&email_subject(date))?
            .multipart(body)
            .map_err(|e| send_failed(format!("Failed to build email: {e}")))
    }

    /// Plain-text message confirming the SMTP settings work.
    fn build_test(&self) -> Result<Message, ChannelError> {
        self.message_builder("Test Email - News Digest")?
            .header(ContentType::TEXT_PLAIN)
            .body(test_email_body(&self.config))
            .map_err(|e| send_failed(format!("Failed to build email: {e}")))
    }

    /// Send a configuration check to the configured recipients.
    pub async fn send_test(&self) -> Result<(), ChannelError> {
        let email = self.build_test()?;
        self.send(email).await?;
        info!(host = %self.config.smtp_host, "Test email sent");
        Ok(())
    }

    async fn send(&self, email: Message) -> Result<(), ChannelError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || send_blocking(&config, &email))
            .await
            .map_err(|e| send_failed(format!("SMTP task failed: {e}")))?
    }
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "email".into(),
        reason,
    }
}

/// Read the CSV and JSON files among `paths`. Unreadable files are skipped.
async fn load_attachments(paths: &[String]) -> Vec<SinglePart> {
    let mut parts = Vec::new();
    for path in paths {
        let path = Path::new(path);
        let mime = match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => "text/csv",
            Some("json") => "application/json",
            _ => continue,
        };
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let content_type = match ContentType::parse(mime) {
            Ok(ct) => ct,
            Err(e) => {
                warn!(mime, error = %e, "Unusable attachment content type");
                continue;
            }
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                parts.push(Attachment::new(filename.to_string()).body(bytes, content_type));
                info!(file = filename, "Attached file");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Could not attach file"),
        }
    }
    parts
}

/// Blocking SMTP send. Run inside `spawn_blocking`.
fn send_blocking(config: &EmailConfig, email: &Message) -> Result<(), ChannelError> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let transport = SmtpTransport::starttls_relay(&config.smtp_host)
        .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?
        .port(config.smtp_port)
        .credentials(creds)
        .build();

    transport
        .send(email)
        .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;
    Ok(())
}

#[async_trait]
impl NotificationSink for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    fn operation(&self) -> &str {
        OP_SEND_EMAIL
    }

    async fn deliver(&self, report: &RunReport) -> Result<(), ChannelError> {
        let attachments = if self.config.include_attachments {
            load_attachments(&report.saved_paths).await
        } else {
            Vec::new()
        };
        let email = self.build_digest(report, Local::now().date_naive(), attachments)?;
        self.send(email).await?;

        info!(
            recipients = self.config.recipients.len(),
            "Digest email sent"
        );
        Ok(())
    }
}

// ── Formatting ──────────────────────────────────────────────────────

pub fn email_subject(date: NaiveDate) -> String {
    format!("Daily News Digest - {}", date.format("%B %d, %Y"))
}

/// Plain-text body: header, executive summary, then numbered articles.
pub fn format_email_body(report: &RunReport, date: NaiveDate) -> String {
    let mut out = vec![
        format!("Daily News Digest - {}", date.format("%B %d, %Y")),
        "=".repeat(RULE_WIDTH),
        String::new(),
    ];

    if let Some(digest) = report.digest.as_deref().filter(|_| !report.items.is_empty()) {
        out.push("Executive Summary:".to_string());
        out.push(digest.to_string());
        out.push(String::new());
        out.push("-".repeat(RULE_WIDTH));
        out.push(String::new());
    }

    out.push(format!("{} Articles Today:", report.items.len()));
    out.push(String::new());

    for (idx, item) in report.items.iter().enumerate() {
        out.push(format!("{}. {}", idx + 1, item.title));
        out.push(format!("   Source: {}", item.source));
        if let Some(url) = &item.url {
            out.push(format!("   Link: {url}"));
        }
        out.push(String::new());
        out.push("   Summary:".to_string());
        for line in item.summary.as_deref().unwrap_or("No summary available").lines() {
            out.push(format!("   {line}"));
        }
        if let Some(score) = item.relevance_score.filter(|s| *s > 0.0) {
            out.push(format!("   Relevance: {}", percent(score)));
        }
        out.push(String::new());
    }

    out.push("-".repeat(RULE_WIDTH));
    out.push("Generated by News Digest".to_string());
    out.join("\n")
}

const HTML_STYLE: &str = "\
body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 800px; margin: 0 auto; padding: 20px; }
.header { background-color: #2c3e50; color: white; padding: 20px; border-radius: 5px; margin-bottom: 20px; }
.digest { background-color: #ecf0f1; padding: 15px; border-left: 4px solid #3498db; margin-bottom: 20px; }
.article { border: 1px solid #ddd; padding: 15px; margin-bottom: 15px; border-radius: 5px; }
.article-title { color: #2c3e50; font-size: 18px; font-weight: bold; margin-bottom: 10px; }
.article-meta { color: #7f8c8d; font-size: 14px; margin-bottom: 10px; }
.relevance { display: inline-block; background-color: #27ae60; color: white; padding: 3px 8px; border-radius: 3px; font-size: 12px; }
.footer { text-align: center; color: #95a5a6; margin-top: 30px; padding-top: 20px; border-top: 1px solid #ddd; }
a { color: #3498db; text-decoration: none; }
";

/// HTML alternative of [`format_email_body`]. All report text is escaped.
pub fn format_email_html(report: &RunReport, date: NaiveDate) -> String {
    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<style>\n{HTML_STYLE}</style>\n</head>\n<body>\n\
         <div class=\"header\"><h1>Daily News Digest</h1><p>{}</p></div>\n",
        date.format("%B %d, %Y")
    );

    if let Some(digest) = report.digest.as_deref().filter(|_| !report.items.is_empty()) {
        html.push_str(&format!(
            "<div class=\"digest\"><h2>Executive Summary</h2><p>{}</p></div>\n",
            escape_html(digest).replace('\n', "<br>")
        ));
    }

    html.push_str(&format!("<h2>{} Articles Today</h2>\n", report.items.len()));

    for (idx, item) in report.items.iter().enumerate() {
        html.push_str(&format!(
            "<div class=\"article\">\n<div class=\"article-title\">{}. {}</div>\n\
             <div class=\"article-meta\"><strong>Source:</strong> {}",
            idx + 1,
            escape_html(&item.title),
            escape_html(&item.source)
        ));
        if let Some(url) = &item.url {
            html.push_str(&format!(
                " | <a href=\"{}\" target=\"_blank\">Read More</a>",
                escape_html(url)
            ));
        }
        html.push_str("</div>\n");

        let summary = item.summary.as_deref().unwrap_or("No summary available");
        html.push_str(&format!(
            "<div class=\"article-summary\"><strong>Summary:</strong><br>{}</div>\n",
            escape_html(summary).replace('\n', "<br>")
        ));
        if let Some(score) = item.relevance_score.filter(|s| *s > 0.0) {
            html.push_str(&format!(
                "<span class=\"relevance\">Relevance: {}</span>\n",
                percent(score)
            ));
        }
        html.push_str("</div>\n");
    }

    html.push_str("<div class=\"footer\"><p>Generated by News Digest</p></div>\n</body>\n</html>\n");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn test_email_body(config: &EmailConfig) -> String {
    format!(
        "This is a test email from News Digest.\n\n\
         If you received this, your email configuration is working.\n\n\
         Configuration:\n\
         - SMTP Host: {}\n\
         - SMTP Port: {}\n\
         - From: {}\n\n\
         Next steps:\n\
         1. Update your sources in config/sources.json\n\
         2. Update your topics in config/topics.json\n\
         3. Run: news-digest\n",
        config.smtp_host, config.smtp_port, config.from_address
    )
}
