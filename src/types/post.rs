use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One submission from a forum channel.
///
/// The natural key is `external_id` (the source's post id, globally unique);
/// `id` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumPost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    pub external_id: String,
    pub channel: String,
    pub title: String,
    pub body: Option<String>,
    pub url: Option<String>,

    /// Source vote score, not a sentiment score.
    pub score: i32,
    pub num_comments: i32,
    pub flair: Option<String>,

    /// When the post was created on the source, UTC.
    pub timestamp: DateTime<Utc>,
    /// When we pulled it.
    pub fetched_at: DateTime<Utc>,

    /// Tickers mentioned, ordered by first occurrence.
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Per-ticker sentiment; keys are always a subset of `symbols`.
    #[serde(default)]
    pub symbol_sentiments: HashMap<String, f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ForumPost {
    /// Text the analyzer reasons over: title plus body when present.
    pub fn full_text(&self) -> String {
        match &self.body {
            Some(body) if !body.trim().is_empty() => format!("{}\n\n{}", self.title, body),
            _ => self.title.clone(),
        }
    }

    /// Drop sentiment entries for tickers not present in the symbol list.
    #[allow(dead_code)]
    pub fn prune_symbol_sentiments(&mut self) {
        self.symbol_sentiments
            .retain(|ticker, _| self.symbols.iter().any(|s| s == ticker));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> ForumPost {
        ForumPost {
            id: None,
            external_id: "1abcd2".into(),
            channel: "wallstreetbets".into(),
            title: "Bought $NVDA calls".into(),
            body: None,
            url: None,
            score: 120,
            num_comments: 34,
            flair: Some("YOLO".into()),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 7, 15, 0, 0).unwrap(),
            fetched_at: Utc.with_ymd_and_hms(2024, 6, 7, 15, 30, 0).unwrap(),
            symbols: vec!["NVDA".into()],
            symbol_sentiments: HashMap::from([("NVDA".into(), 0.9), ("AAPL".into(), -0.7)]),
            sentiment_score: None,
            raw_response: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_full_text_without_body() {
        assert_eq!(sample().full_text(), "Bought $NVDA calls");
    }

    #[test]
    fn test_full_text_with_body() {
        let mut p = sample();
        p.body = Some("Earnings next week.".into());
        assert_eq!(p.full_text(), "Bought $NVDA calls\n\nEarnings next week.");
        p.body = Some("   ".into());
        assert_eq!(p.full_text(), "Bought $NVDA calls");
    }

    #[test]
    fn test_prune_keeps_subset_invariant() {
        let mut p = sample();
        p.prune_symbol_sentiments();
        assert_eq!(p.symbol_sentiments.len(), 1);
        assert!(p.symbol_sentiments.contains_key("NVDA"));
    }
}
