//! Parsing of model responses. Strict path first (a JSON object possibly
//! wrapped in fences or prose), then a keyword heuristic so a chatty model
//! still yields a usable score.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;

use crate::types::clamp_score;

static CASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z]{1,6})\b").expect("cashtag pattern is valid"));

/// Bare (un-cashtagged) symbols worth recognizing in post text.
const KNOWN_TICKERS: &[&str] = &[
    "SPY", "QQQ", "DIA", "IWM", "VIX", "AAPL", "MSFT", "NVDA", "AMZN", "GOOG", "GOOGL", "META",
    "TSLA", "AMD", "INTC", "NFLX", "GME", "AMC", "COIN", "PLTR", "BTC", "ETH", "DOGE", "SOL",
];

/// What a model response boils down to.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub score: f64,
    pub reasoning: String,
    pub symbols: Vec<String>,
    pub symbol_sentiments: HashMap<String, f64>,
    /// The JSON object when strict parsing succeeded, otherwise a wrapper
    /// holding the raw text.
    pub raw: Value,
    pub used_fallback: bool,
}

/// Parse a model reply. Never fails: a reply that defeats both the strict
/// and heuristic paths comes back neutral with the text preserved.
pub fn parse_response(text: &str) -> ParsedResponse {
    if let Some(candidate) = extract_json_object(text) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return from_json(value);
        }
    }
    warn!("Model reply was not valid JSON; using keyword heuristic");
    keyword_fallback(text)
}

fn from_json(value: Value) -> ParsedResponse {
    let score = value
        .get("score")
        .and_then(Value::as_f64)
        .map(clamp_score)
        .unwrap_or(0.0);

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let symbols: Vec<String> = value
        .get("symbols")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(normalize_symbol)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let symbol_sentiments: HashMap<String, f64> = value
        .get("symbol_sentiments")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_f64().map(|s| (normalize_symbol(k), clamp_score(s))))
                .collect()
        })
        .unwrap_or_default();

    ParsedResponse {
        score,
        reasoning,
        symbols,
        symbol_sentiments,
        raw: value,
        used_fallback: false,
    }
}

/// Locate the outermost JSON object in a reply, tolerating Markdown fences
/// and surrounding prose.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Cue-word scoring for replies that refuse to be JSON.
fn keyword_fallback(text: &str) -> ParsedResponse {
    let lower = text.to_lowercase();
    let bullish = lower.contains("bullish") || lower.contains("positive");
    let bearish = lower.contains("bearish") || lower.contains("negative");

    let score = match (bullish, bearish) {
        (true, false) => 0.3,
        (false, true) => -0.3,
        _ => 0.0,
    };

    ParsedResponse {
        score,
        reasoning: text.trim().to_string(),
        symbols: Vec::new(),
        symbol_sentiments: HashMap::new(),
        raw: serde_json::json!({ "text": text }),
        used_fallback: true,
    }
}

fn normalize_symbol(s: &str) -> String {
    s.trim().trim_start_matches('$').to_uppercase()
}

/// Secondary symbol signal: cashtags plus bare known tickers, first
/// occurrence order. The model's list stays authoritative for scoring;
/// this union only widens what gets stored.
pub fn extract_symbols_from_text(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |sym: String| {
        if !out.contains(&sym) {
            out.push(sym);
        }
    };

    for cap in CASHTAG.captures_iter(text) {
        push(cap[1].to_uppercase());
    }
    for word in text.split(|c: char| !c.is_ascii_alphanumeric()) {
        if KNOWN_TICKERS.contains(&word) {
            push(word.to_string());
        }
    }
    out
}

/// Union of the model's symbols and the text-extracted ones, model list
/// first.
pub fn union_symbols(model: &[String], text_extracted: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for sym in model.iter().chain(text_extracted.iter()) {
        if !out.contains(sym) {
            out.push(sym.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json_reply() {
        let parsed = parse_response(r#"{"score": 0.7, "reasoning": "strong beat"}"#);
        assert_eq!(parsed.score, 0.7);
        assert_eq!(parsed.reasoning, "strong beat");
        assert!(!parsed.used_fallback);
    }

    #[test]
    fn test_fenced_reply_with_out_of_range_score() {
        let parsed = parse_response("```json\n{\"score\": 2.5, \"reasoning\": \"strong beat\"}\n```");
        assert_eq!(parsed.score, 1.0);
        assert_eq!(parsed.reasoning, "strong beat");
    }

    #[test]
    fn test_prose_wrapped_json() {
        let parsed = parse_response(
            "Sure! Here's my analysis:\n{\"score\": -0.4, \"reasoning\": \"miss\"}\nLet me know if you need more.",
        );
        assert_eq!(parsed.score, -0.4);
    }

    #[test]
    fn test_keyword_fallback_bearish() {
        let parsed = parse_response("looks bearish to me");
        assert_eq!(parsed.score, -0.3);
        assert_eq!(parsed.reasoning, "looks bearish to me");
        assert!(parsed.used_fallback);
        assert_eq!(parsed.raw, serde_json::json!({"text": "looks bearish to me"}));
    }

    #[test]
    fn test_keyword_fallback_bullish_and_neutral() {
        assert_eq!(parse_response("very bullish setup").score, 0.3);
        assert_eq!(parse_response("pretty neutral overall").score, 0.0);
        // Conflicting cues cancel out
        assert_eq!(parse_response("bullish longs, bearish shorts").score, 0.0);
    }

    #[test]
    fn test_non_numeric_score_defaults_zero() {
        assert_eq!(parse_response(r#"{"score": "high"}"#).score, 0.0);
        assert_eq!(parse_response(r#"{"score": null}"#).score, 0.0);
        assert_eq!(parse_response(r#"{"reasoning": "no score"}"#).score, 0.0);
    }

    #[test]
    fn test_symbols_and_sentiments_decoded() {
        let parsed = parse_response(
            r#"{"score": 0.7, "reasoning": "r", "symbols": ["NVDA", "aapl", "NVDA"],
                "symbol_sentiments": {"NVDA": 0.9, "aapl": -0.7, "BTC": 5.0}}"#,
        );
        assert_eq!(parsed.symbols, vec!["NVDA", "AAPL", "NVDA"]);
        assert_eq!(parsed.symbol_sentiments["AAPL"], -0.7);
        // Out-of-range per-symbol scores clamp too
        assert_eq!(parsed.symbol_sentiments["BTC"], 1.0);
    }

    #[test]
    fn test_extract_symbols_from_text() {
        let symbols =
            extract_symbols_from_text("Bought $NVDA calls, sold $AAPL, watching BTC");
        assert_eq!(symbols, vec!["NVDA", "AAPL", "BTC"]);
    }

    #[test]
    fn test_extract_symbols_ignores_noise() {
        assert!(extract_symbols_from_text("spent $1000 on lunch").is_empty());
        assert_eq!(extract_symbols_from_text("$gme to the moon"), vec!["GME"]);
    }

    #[test]
    fn test_union_preserves_model_order() {
        let model = vec!["NVDA".to_string(), "AAPL".to_string()];
        let text = vec!["AAPL".to_string(), "BTC".to_string()];
        assert_eq!(union_symbols(&model, &text), vec!["NVDA", "AAPL", "BTC"]);
    }
}
