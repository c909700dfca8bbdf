//! File-backed workspace for run artifacts.
//!
//! The workspace is a directory on disk containing:
//! - Raw dumps: raw/raw_YYYY-MM-DD.json
//! - Summaries: summaries/summary_YYYY-MM-DD.csv and .md
//!
//! Files are keyed by local date, so a second run on the same day overwrites.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::config::OutputFormat;
use crate::error::PersistenceError;
use crate::pipeline::types::{Artifact, ContentItem, PersistenceSink};

/// Well-known workspace subdirectories.
pub mod paths {
    pub const RAW: &str = "raw";
    pub const SUMMARIES: &str = "summaries";
}

/// File-backed persistence sink.
pub struct Workspace {
    base_path: PathBuf,
    date: Option<NaiveDate>,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(PathBuf::from("data"))
    }
}

impl Workspace {
    /// Create a new workspace rooted at `base_path`.
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            date: None,
        }
    }

    /// Pin the date used in file names instead of today's.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a relative workspace path to an absolute path.
    pub fn resolve_path(&self, relative: &str) -> PathBuf {
        self.base_path.join(relative)
    }

    fn date(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Write (overwrite) a file, creating parent directories.
    async fn write(&self, relative: &str, content: &[u8]) -> Result<String, PersistenceError> {
        let full_path = self.resolve_path(relative);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full_path, content).await?;
        Ok(full_path.display().to_string())
    }

    /// Save every fetched item as pretty JSON.
    pub async fn save_raw(&self, items: &[ContentItem]) -> Result<String, PersistenceError> {
        let date = self.date();
        let dump = RawDump {
            date,
            count: items.len(),
            articles: items,
        };
        let json = serde_json::to_vec_pretty(&dump)?;
        let path = self
            .write(&format!("{}/raw_{date}.json", paths::RAW), &json)
            .await?;
        info!(path = %path, count = items.len(), "Saved raw data");
        Ok(path)
    }

    /// Save summarized items as CSV and/or Markdown.
    pub async fn save_summaries(
        &self,
        items: &[ContentItem],
        digest: &str,
        format: OutputFormat,
    ) -> Result<Vec<String>, PersistenceError> {
        let date = self.date();
        let mut saved = Vec::new();

        if format.includes_csv() {
            let csv = render_csv(items)?;
            let path = self
                .write(&format!("{}/summary_{date}.csv", paths::SUMMARIES), &csv)
                .await?;
            info!(path = %path, "Saved CSV summary");
            saved.push(path);
        }

        if format.includes_markdown() {
            let md = render_markdown(items, digest, date);
            let path = self
                .write(
                    &format!("{}/summary_{date}.md", paths::SUMMARIES),
                    md.as_bytes(),
                )
                .await?;
            info!(path = %path, "Saved Markdown summary");
            saved.push(path);
        }

        Ok(saved)
    }
}

#[async_trait]
impl PersistenceSink for Workspace {
    async fn save(
        &self,
        artifact: Artifact<'_>,
        format: OutputFormat,
    ) -> Result<Vec<String>, PersistenceError> {
        match artifact {
            Artifact::Raw(items) => Ok(vec![self.save_raw(items).await?]),
            Artifact::Summaries { items, digest } => {
                self.save_summaries(items, digest, format).await
            }
        }
    }
}

// ── Rendering ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct RawDump<'a> {
    date: NaiveDate,
    count: usize,
    articles: &'a [ContentItem],
}

/// One CSV row per summarized item.
#[derive(Serialize)]
struct SummaryRow<'a> {
    title: &'a str,
    source: &'a str,
    url: &'a str,
    published_date: Option<NaiveDate>,
    relevance_score: Option<f32>,
    relevance_reason: &'a str,
    filter_method: &'a str,
    summary: &'a str,
    summary_style: &'a str,
}

impl<'a> From<&'a ContentItem> for SummaryRow<'a> {
    fn from(item: &'a ContentItem) -> Self {
        Self {
            title: &item.title,
            source: &item.source,
            url: item.url.as_deref().unwrap_or(""),
            published_date: item.published_date,
            relevance_score: item.relevance_score(),
            relevance_reason: item.relevance_reason().unwrap_or(""),
            filter_method: item.filter_method().map(|m| m.as_str()).unwrap_or(""),
            summary: item.summary().unwrap_or(""),
            summary_style: item.summary_style().map(|s| s.as_str()).unwrap_or(""),
        }
    }
}

fn render_csv(items: &[ContentItem]) -> Result<Vec<u8>, PersistenceError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for item in items {
        writer.serialize(SummaryRow::from(item))?;
    }
    writer
        .into_inner()
        .map_err(|e| PersistenceError::Io(e.into_error()))
}

fn render_markdown(items: &[ContentItem], digest: &str, date: NaiveDate) -> String {
    let mut md = format!("# Daily News Summary - {date}\n\n");

    if !digest.trim().is_empty() {
        let _ = write!(md, "## Today's Highlights\n\n{}\n\n", digest.trim());
    }

    let _ = write!(md, "## Articles ({})\n\n", items.len());
    for (idx, item) in items.iter().enumerate() {
        let _ = write!(md, "### {}. {}\n\n", idx + 1, item.title);
        let _ = write!(md, "**Source:** {}\n\n", item.source);
        let _ = write!(md, "**URL:** {}\n\n", item.url.as_deref().unwrap_or("N/A"));
        if let Some(published) = item.published_date {
            let _ = write!(md, "**Date:** {published}\n\n");
        }
        let _ = write!(
            md,
            "**Summary:**\n{}\n\n",
            item.summary().unwrap_or("No summary")
        );
        if let Some(score) = item.relevance_score() {
            let _ = write!(md, "*Relevance Score: {:.0}%*\n\n", score * 100.0);
        }
        md.push_str("---\n\n");
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaryStyle;
    use crate::pipeline::types::{FilterMethod, SummaryMethod};
    use tempfile::TempDir;

    fn test_workspace() -> (Workspace, TempDir) {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path().to_path_buf())
            .with_date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        (ws, dir)
    }

    fn summarized(title: &str) -> ContentItem {
        let mut item = ContentItem::new(title, "body, with comma", "Wire")
            .with_url("https://wire.io/a")
            .with_published_date(NaiveDate::from_ymd_opt(2024, 4, 30).unwrap());
        item.record_relevance(0.82, "on topic", FilterMethod::Model);
        item.record_summary("- one\n- two", SummaryStyle::Bullets, SummaryMethod::Model);
        item
    }

    #[tokio::test]
    async fn raw_dump_is_pretty_json() {
        let (ws, dir) = test_workspace();
        let items = vec![ContentItem::new("A", "a", "S"), ContentItem::new("B", "b", "S")];
        let paths = ws.save(Artifact::Raw(&items), OutputFormat::Both).await.unwrap();

        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("raw/raw_2024-05-01.json"));
        let text = std::fs::read_to_string(dir.path().join("raw/raw_2024-05-01.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["count"], 2);
        assert_eq!(json["articles"][1]["snippet"], "b");
        assert!(text.contains("\n  "));
    }

    #[tokio::test]
    async fn both_formats_write_two_files() {
        let (ws, dir) = test_workspace();
        let items = vec![summarized("First")];
        let paths = ws
            .save(
                Artifact::Summaries {
                    items: &items,
                    digest: "A calm day.",
                },
                OutputFormat::Both,
            )
            .await
            .unwrap();
        assert_eq!(paths.len(), 2);

        let mut reader =
            csv::Reader::from_path(dir.path().join("summaries/summary_2024-05-01.csv")).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "title");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "First");
        assert_eq!(&rows[0][7], "- one\n- two");

        let md =
            std::fs::read_to_string(dir.path().join("summaries/summary_2024-05-01.md")).unwrap();
        assert!(md.starts_with("# Daily News Summary - 2024-05-01"));
        assert!(md.contains("## Today's Highlights\n\nA calm day."));
        assert!(md.contains("## Articles (1)"));
        assert!(md.contains("### 1. First"));
        assert!(md.contains("**URL:** https://wire.io/a"));
        assert!(md.contains("**Date:** 2024-04-30"));
        assert!(md.contains("*Relevance Score: 82%*"));
    }

    #[tokio::test]
    async fn single_format_writes_one_file() {
        let (ws, dir) = test_workspace();
        let items = vec![summarized("Only")];
        let paths = ws
            .save_summaries(&items, "", OutputFormat::Markdown)
            .await
            .unwrap();
        assert_eq!(paths.len(), 1);
        assert!(!dir.path().join("summaries/summary_2024-05-01.csv").exists());
        let md = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(!md.contains("Today's Highlights"));
    }

    #[tokio::test]
    async fn unwritable_root_is_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let ws = Workspace::new(blocker);
        let err = ws.save_raw(&[]).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Io(_)));
    }
}
