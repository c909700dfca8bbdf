//! Relevance scoring: model-backed judgment with a keyword fallback.
//!
//! Flow per item:
//! 1. Model scoring disabled → keyword score (`keyword`)
//! 2. Classifier call + tolerant parse → model judgment (`model`)
//! 3. Classifier error or unusable output → fixed-confidence keyword
//!    fallback (`keyword_fallback`)
//!
//! A failure on one item never affects the others.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{Classifier, ContentItem, FilterMethod};

/// Score assigned when the classifier fails but keywords match.
pub const FALLBACK_SCORE: f32 = 0.7;

/// Keyword score when no topics or keywords are configured.
pub const NEUTRAL_SCORE: f32 = 0.5;

/// Temperature for classification (close to deterministic).
const CLASSIFY_TEMPERATURE: f32 = 0.1;

/// Max tokens for the classifier reply (a tiny JSON object).
const CLASSIFY_MAX_TOKENS: u32 = 256;

static DECIMAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+\.\d+").unwrap());

// ── Outcome ─────────────────────────────────────────────────────────

/// Result of scoring one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub accepted: bool,
    pub score: f32,
    pub reason: String,
    pub method: FilterMethod,
}

impl ScoreOutcome {
    /// Write score, reason and method onto the item.
    ///
    /// Items that already carry a score keep it.
    pub fn apply_to(&self, item: &mut ContentItem) {
        if !item.record_relevance(self.score, self.reason.clone(), self.method) {
            debug!(title = %item.title, "Item already scored, keeping original score");
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// Computes relevance decisions for content items.
pub struct ScoringEngine {
    classifier: Option<Arc<dyn Classifier>>,
    use_model: bool,
    concurrency: usize,
}

impl ScoringEngine {
    pub fn new(
        classifier: Option<Arc<dyn Classifier>>,
        use_model: bool,
        concurrency: usize,
    ) -> Self {
        if use_model && classifier.is_none() {
            warn!("Model scoring requested without a classifier, using keyword matching");
        }
        Self {
            classifier,
            use_model,
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(config: &PipelineConfig, classifier: Option<Arc<dyn Classifier>>) -> Self {
        Self::new(
            classifier,
            config.use_model_filtering,
            config.max_concurrency,
        )
    }

    /// Score a single item.
    pub async fn score(
        &self,
        item: &ContentItem,
        topics: &[String],
        keywords: &[String],
        min_score: f32,
    ) -> ScoreOutcome {
        let classifier = match (&self.classifier, self.use_model) {
            (Some(classifier), true) => classifier,
            _ => return keyword_outcome(item, topics, keywords, min_score),
        };

        let judgment = match classifier.classify(item, topics, keywords).await {
            Ok(raw) => match parse_judgment(&raw) {
                JudgmentParse::Parsed(j) => Ok(j),
                JudgmentParse::HeuristicParsed(j) => {
                    debug!(title = %item.title, "Classifier output parsed heuristically");
                    Ok(j)
                }
                JudgmentParse::Failed(reason) => Err(reason),
            },
            Err(e) => Err(e.to_string()),
        };

        match judgment {
            Ok(j) => ScoreOutcome {
                accepted: j.relevant && j.score >= min_score,
                score: j.score,
                reason: j.reason,
                method: FilterMethod::Model,
            },
            Err(reason) => {
                warn!(title = %item.title, error = %reason, "Classifier failed, using keyword fallback");
                fallback_outcome(item, topics, keywords, min_score)
            }
        }
    }

    /// Score many items with bounded parallelism. Output order matches input.
    pub async fn score_batch(
        &self,
        items: &[ContentItem],
        topics: &[String],
        keywords: &[String],
        min_score: f32,
    ) -> Vec<ScoreOutcome> {
        let outcomes: Vec<ScoreOutcome> = stream::iter(items)
            .map(|item| self.score(item, topics, keywords, min_score))
            .buffered(self.concurrency)
            .collect()
            .await;

        info!(
            total = items.len(),
            accepted = outcomes.iter().filter(|o| o.accepted).count(),
            fallbacks = outcomes
                .iter()
                .filter(|o| o.method == FilterMethod::KeywordFallback)
                .count(),
            "Scored batch"
        );
        outcomes
    }
}

// ── Keyword scoring ─────────────────────────────────────────────────

/// True if any topic or keyword occurs in the item text (case-insensitive).
pub fn keyword_match(item: &ContentItem, topics: &[String], keywords: &[String]) -> bool {
    let text = item.match_text();
    topics
        .iter()
        .chain(keywords)
        .any(|term| !term.is_empty() && text.contains(&term.to_lowercase()))
}

/// Weighted match score: topics count double.
///
/// `(2 * topic_matches + keyword_matches) / (2 * (topics + keywords))`,
/// capped at 1.0, or [`NEUTRAL_SCORE`] with nothing to match against.
pub fn keyword_score(item: &ContentItem, topics: &[String], keywords: &[String]) -> f32 {
    let total = topics.len() + keywords.len();
    if total == 0 {
        return NEUTRAL_SCORE;
    }
    let text = item.match_text();
    let hits = |terms: &[String]| {
        terms
            .iter()
            .filter(|t| !t.is_empty() && text.contains(&t.to_lowercase()))
            .count()
    };
    let weighted = 2 * hits(topics) + hits(keywords);
    (weighted as f32 / (2 * total) as f32).min(1.0)
}

fn keyword_outcome(
    item: &ContentItem,
    topics: &[String],
    keywords: &[String],
    min_score: f32,
) -> ScoreOutcome {
    let unconstrained = topics.is_empty() && keywords.is_empty();
    let matched = unconstrained || keyword_match(item, topics, keywords);
    let score = keyword_score(item, topics, keywords);
    let reason = if unconstrained {
        "No topics or keywords configured"
    } else if matched {
        "Keyword match"
    } else {
        "No keyword match"
    };
    ScoreOutcome {
        accepted: matched && score >= min_score,
        score,
        reason: reason.to_string(),
        method: FilterMethod::Keyword,
    }
}

fn fallback_outcome(
    item: &ContentItem,
    topics: &[String],
    keywords: &[String],
    min_score: f32,
) -> ScoreOutcome {
    let unconstrained = topics.is_empty() && keywords.is_empty();
    if unconstrained || keyword_match(item, topics, keywords) {
        ScoreOutcome {
            accepted: FALLBACK_SCORE >= min_score,
            score: FALLBACK_SCORE,
            reason: "Keyword match (model failed)".to_string(),
            method: FilterMethod::KeywordFallback,
        }
    } else {
        ScoreOutcome {
            accepted: false,
            score: 0.0,
            reason: "No keyword match (model failed)".to_string(),
            method: FilterMethod::KeywordFallback,
        }
    }
}

// ── Judgment parsing ────────────────────────────────────────────────

/// A relevance judgment extracted from classifier output.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    pub relevant: bool,
    pub score: f32,
    pub reason: String,
}

/// How a judgment was recovered from raw model text.
#[derive(Debug, Clone, PartialEq)]
pub enum JudgmentParse {
    /// Well-formed JSON object (possibly embedded in other text).
    Parsed(Judgment),
    /// Inferred from free text.
    HeuristicParsed(Judgment),
    /// Nothing usable.
    Failed(String),
}

impl JudgmentParse {
    #[cfg(test)]
    fn into_judgment(self) -> Option<Judgment> {
        match self {
            Self::Parsed(j) | Self::HeuristicParsed(j) => Some(j),
            Self::Failed(_) => None,
        }
    }
}

/// Parse classifier output: strict JSON, then the first balanced `{...}`,
/// then a text heuristic. Only empty output fails.
pub fn parse_judgment(raw: &str) -> JudgmentParse {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return JudgmentParse::Failed("empty classifier response".to_string());
    }

    if let Some(j) = judgment_from_json(trimmed) {
        return JudgmentParse::Parsed(j);
    }
    if let Some(object) = first_balanced_object(trimmed)
        && let Some(j) = judgment_from_json(object)
    {
        return JudgmentParse::Parsed(j);
    }

    let lower = trimmed.to_lowercase();
    let relevant = lower.contains("relevant") && !lower.contains("not relevant");
    let score = DECIMAL_RE
        .find(trimmed)
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .unwrap_or(if relevant { 0.7 } else { 0.3 });
    JudgmentParse::HeuristicParsed(Judgment {
        relevant,
        score: clamp_score(score),
        reason: "Parsed from text response".to_string(),
    })
}

fn judgment_from_json(text: &str) -> Option<Judgment> {
    let value: Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;
    let relevant = match object.get("relevant")? {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => return None,
    };
    let score = match object.get("score")? {
        Value::Number(n) => n.as_f64()? as f32,
        Value::String(s) => s.trim().parse::<f32>().ok()?,
        _ => return None,
    };
    let reason = object
        .get("reason")
        .and_then(Value::as_str)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or("No reason provided")
        .to_string();
    Some(Judgment {
        relevant,
        score: clamp_score(score),
        reason,
    })
}

/// First `{...}` with balanced braces, ignoring braces inside JSON strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn clamp_score(score: f32) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// ── Model-backed classifier ─────────────────────────────────────────

/// `Classifier` backed by an `LlmProvider`.
pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        item: &ContentItem,
        topics: &[String],
        keywords: &[String],
    ) -> Result<String, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classify_system_prompt()),
            ChatMessage::user(build_classify_user_prompt(item, topics, keywords)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        Ok(response.content)
    }
}

fn build_classify_system_prompt() -> String {
    "You are an expert content analyzer. \
Your job is to determine if a news article is relevant to specified topics.\n\
Return ONLY a JSON object with: {\"relevant\": true/false, \"score\": 0.0-1.0, \"reason\": \"brief explanation\"}\n\
Be strict but fair in your assessment."
        .to_string()
}

fn build_classify_user_prompt(item: &ContentItem, topics: &[String], keywords: &[String]) -> String {
    let keywords = if keywords.is_empty() {
        "None specified".to_string()
    } else {
        keywords.join(", ")
    };
    format!(
        "Analyze this article:\n\n\
Title: {title}\n\
Snippet: {snippet}\n\
Source: {source}\n\n\
Topics of Interest: {topics}\n\
Keywords: {keywords}\n\n\
Is this article relevant? Provide relevance score (0.0-1.0) and brief reason.\n\
Return JSON only: {{\"relevant\": boolean, \"score\": float, \"reason\": string}}",
        title = item.title,
        snippet = item.body,
        source = item.source,
        topics = topics.join(", "),
    )
}
