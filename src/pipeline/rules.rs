//! Exclusion rules: deterministic post-scoring filter.
//!
//! Any item whose title or snippet mentions an exclude keyword is dropped,
//! whatever its relevance score. No model is involved.

use regex::Regex;
use tracing::{debug, info};

use crate::pipeline::types::ContentItem;

/// A single exclude keyword with its compiled matcher.
#[derive(Debug, Clone)]
pub struct ExcludeRule {
    /// Keyword as configured.
    pub keyword: String,
    /// Case-insensitive literal matcher.
    pub regex: Regex,
}

/// Drops items that mention excluded keywords.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    rules: Vec<ExcludeRule>,
}

impl ExclusionRules {
    /// Build rules from configured keywords. Blank keywords are ignored.
    pub fn new(keywords: &[String]) -> Result<Self, regex::Error> {
        let mut rules = Self::default();
        for keyword in keywords {
            rules.add_keyword(keyword)?;
        }
        Ok(rules)
    }

    pub fn add_keyword(&mut self, keyword: &str) -> Result<(), regex::Error> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(());
        }
        self.rules.push(ExcludeRule {
            keyword: keyword.to_string(),
            regex: Regex::new(&format!("(?i){}", regex::escape(keyword)))?,
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The first excluded keyword the item mentions, if any.
    pub fn matching(&self, item: &ContentItem) -> Option<&str> {
        let text = format!("{} {}", item.title, item.body);
        self.rules
            .iter()
            .find(|r| r.regex.is_match(&text))
            .map(|r| r.keyword.as_str())
    }

    /// Remove excluded items, keeping order. Returns survivors and the drop count.
    pub fn apply(&self, items: Vec<ContentItem>) -> (Vec<ContentItem>, usize) {
        if self.is_empty() {
            return (items, 0);
        }
        let before = items.len();
        let kept: Vec<ContentItem> = items
            .into_iter()
            .filter(|item| match self.matching(item) {
                Some(keyword) => {
                    debug!(title = %item.title, keyword, "Excluded item");
                    false
                }
                None => true,
            })
            .collect();
        let dropped = before - kept.len();
        info!(dropped, kept = kept.len(), "Applied exclusion rules");
        (kept, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::FilterMethod;

    fn rules(keywords: &[&str]) -> ExclusionRules {
        let keywords: Vec<String> = keywords.iter().map(|s| s.to_string()).collect();
        ExclusionRules::new(&keywords).unwrap()
    }

    #[test]
    fn matches_case_insensitively_in_title_or_snippet() {
        let rules = rules(&["sponsored", "crypto"]);
        let a = ContentItem::new("SPONSORED: Buy now", "", "x");
        let b = ContentItem::new("Markets", "Crypto prices fall", "x");
        let c = ContentItem::new("Rust", "New release", "x");
        assert_eq!(rules.matching(&a), Some("sponsored"));
        assert_eq!(rules.matching(&b), Some("crypto"));
        assert_eq!(rules.matching(&c), None);
    }

    #[test]
    fn exclusion_overrides_perfect_score() {
        let rules = rules(&["rumor"]);
        let mut item = ContentItem::new("Rust rumor mill", "rust rust rust", "x");
        item.record_relevance(1.0, "perfect", FilterMethod::Model);
        let keeper = ContentItem::new("Rust 1.80", "released", "x");

        let (kept, dropped) = rules.apply(vec![item, keeper]);
        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "Rust 1.80");
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let rules = rules(&["c++ (beta)"]);
        assert!(rules.matching(&ContentItem::new("C++ (Beta) ships", "", "x")).is_some());
        assert!(rules.matching(&ContentItem::new("cpp beta", "", "x")).is_none());
    }

    #[test]
    fn empty_rules_keep_everything() {
        let rules = rules(&["", "  "]);
        assert!(rules.is_empty());
        let (kept, dropped) = rules.apply(vec![ContentItem::new("a", "b", "c")]);
        assert_eq!((kept.len(), dropped), (1, 0));
    }
}
