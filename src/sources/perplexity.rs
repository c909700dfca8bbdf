//! Perplexity search fetcher.
//!
//! Asks the `sonar` model for a JSON array of recent articles and degrades
//! gracefully when the reply is not one: citations become items, and as a
//! last resort the raw answer becomes a single item.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, FetchError};
use crate::llm::retry::{RetryPolicy, with_retry};
use crate::pipeline::types::{ContentItem, FetchQuery, Fetcher};

const SOURCE_LABEL: &str = "perplexity";
const CITATION_SNIPPET_CHARS: usize = 200;
const RAW_SNIPPET_CHARS: usize = 500;

/// Perplexity API settings.
#[derive(Debug, Clone)]
pub struct PerplexityConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub retry: RetryPolicy,
}

impl PerplexityConfig {
    /// Build from `PERPLEXITY_API_KEY` (required), `PERPLEXITY_BASE_URL` and
    /// `PERPLEXITY_MODEL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("PERPLEXITY_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("PERPLEXITY_API_KEY".into()))?;
        let base_url = std::env::var("PERPLEXITY_BASE_URL")
            .unwrap_or_else(|_| "https://api.perplexity.ai".to_string());
        let model = std::env::var("PERPLEXITY_MODEL").unwrap_or_else(|_| "sonar".to_string());
        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url,
            model,
            retry: RetryPolicy::default(),
        })
    }
}

/// `Fetcher` backed by the Perplexity chat completions API.
pub struct PerplexityFetcher {
    client: reqwest::Client,
    config: PerplexityConfig,
}

impl PerplexityFetcher {
    pub fn new(config: PerplexityConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.retry.call_timeout)
            .build()
            .map_err(|e| FetchError::RequestFailed {
                source_name: SOURCE_LABEL.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    async fn fetch_once(&self, query: &FetchQuery) -> Result<Vec<ContentItem>, FetchError> {
        let search = build_search_query(query);
        info!(query = %search, "Calling Perplexity");

        let body = SearchRequest {
            model: &self.config.model,
            messages: vec![
                Message {
                    role: "system",
                    content: "You are a news aggregator. Return news articles in structured JSON format."
                        .to_string(),
                },
                Message {
                    role: "user",
                    content: build_user_prompt(&search, query.max_results),
                },
            ],
            temperature: 0.2,
            return_citations: true,
        };

        let label = source_label(query);
        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&label, e, self.config.retry.call_timeout))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(FetchError::MissingCredentials { source_name: label });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(FetchError::RequestFailed {
                source_name: label,
                reason: format!("HTTP {status}: {}", text.chars().take(200).collect::<String>()),
            });
        }

        let parsed: SearchResponse =
            response
                .json()
                .await
                .map_err(|e| FetchError::InvalidResponse {
                    source_name: label.clone(),
                    reason: e.to_string(),
                })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let mut items = parse_search_response(&content, &parsed.citations, &query.source_name);
        items.truncate(query.max_results);
        Ok(items)
    }
}

#[async_trait]
impl Fetcher for PerplexityFetcher {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<ContentItem>, FetchError> {
        let label = source_label(query);
        with_retry(&self.config.retry, &label, || self.fetch_once(query)).await
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct SearchRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    return_citations: bool,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

/// One article as the model is asked to return it.
#[derive(Deserialize)]
struct RawArticle {
    title: Option<String>,
    url: Option<String>,
    snippet: Option<String>,
    source: Option<String>,
    published_date: Option<String>,
}

// ── Query & parsing ─────────────────────────────────────────────────

fn source_label(query: &FetchQuery) -> String {
    if query.source_name.is_empty() {
        SOURCE_LABEL.to_string()
    } else {
        query.source_name.clone()
    }
}

fn request_error(label: &str, e: reqwest::Error, after: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            source_name: label.to_string(),
            after,
        }
    } else {
        FetchError::RequestFailed {
            source_name: label.to_string(),
            reason: e.to_string(),
        }
    }
}

/// `"{query} site:{site} (published in last {range})"`, parts optional.
fn build_search_query(query: &FetchQuery) -> String {
    let mut search = query.query.clone();
    if let Some(site) = &query.site {
        search = format!("{search} site:{}", site.to_lowercase());
    }
    if !query.time_range.is_empty() {
        search = format!("{search} (published in last {})", query.time_range);
    }
    search
}

fn build_user_prompt(search: &str, max_results: usize) -> String {
    format!(
        "Find the {max_results} most recent news articles about: {search}\n\n\
For each article, provide:\n\
- title: Article headline\n\
- url: Article URL\n\
- snippet: Brief excerpt (2-3 sentences)\n\
- source: Publication name\n\
- published_date: Publication date (YYYY-MM-DD format)\n\n\
Return as JSON array with these fields."
    )
}

/// Turn the model answer into items: JSON array, else citations, else raw text.
fn parse_search_response(content: &str, citations: &[String], source_name: &str) -> Vec<ContentItem> {
    if let Some(items) = parse_article_array(content, source_name)
        && !items.is_empty()
    {
        return items;
    }

    if !citations.is_empty() {
        debug!(count = citations.len(), "Using citations as items");
        let snippet: String = content.chars().take(CITATION_SNIPPET_CHARS).collect();
        return citations
            .iter()
            .map(|url| {
                let source = if source_name.is_empty() {
                    domain_label(url)
                } else {
                    source_name.to_string()
                };
                ContentItem::new(title_from_url(url), snippet.clone(), source).with_url(url.as_str())
            })
            .collect();
    }

    if !content.trim().is_empty() {
        let source = if source_name.is_empty() {
            "Perplexity"
        } else {
            source_name
        };
        return vec![ContentItem::new(
            "Perplexity Search Result",
            content.chars().take(RAW_SNIPPET_CHARS).collect::<String>(),
            source,
        )];
    }

    Vec::new()
}

fn parse_article_array(content: &str, source_name: &str) -> Option<Vec<ContentItem>> {
    let start = content.find('[')?;
    let end = content.rfind(']')?;
    if end <= start {
        return None;
    }
    let raw: Vec<serde_json::Value> = match serde_json::from_str(&content[start..=end]) {
        Ok(values) => values,
        Err(e) => {
            warn!(error = %e, "Could not parse article array from search response");
            return None;
        }
    };
    let fallback_source = if source_name.is_empty() {
        "Unknown"
    } else {
        source_name
    };
    Some(
        raw.into_iter()
            .filter_map(|v| serde_json::from_value::<RawArticle>(v).ok())
            .map(|a| {
                let mut item = ContentItem::new(
                    a.title.unwrap_or_else(|| "No Title".to_string()),
                    a.snippet.unwrap_or_default(),
                    a.source
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| fallback_source.to_string()),
                )
                .with_url(a.url.unwrap_or_default());
                if let Some(date) = a
                    .published_date
                    .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
                {
                    item = item.with_published_date(date);
                }
                item
            })
            .collect(),
    )
}

/// Readable title from the last path segment, e.g. `rust-ships-2024` → `Rust Ships 2024`.
fn title_from_url(url: &str) -> String {
    let segment = reqwest::Url::parse(url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(String::from))
    });
    match segment {
        Some(s) => title_case(&s.replace(['-', '_'], " ")),
        None => "Article".to_string(),
    }
}

/// First label of the host without `www.`, e.g. `www.techcrunch.com` → `Techcrunch`.
fn domain_label(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .and_then(|h| h.split('.').next().map(title_case))
        .unwrap_or_else(|| "Unknown".to_string())
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
