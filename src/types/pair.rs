use chrono::Duration;
use serde::Serialize;
use std::fmt;

use crate::error::PairError;

/// The currency pairs the aggregator knows how to read.
pub const SUPPORTED_PAIRS: &[(&str, &str)] = &[
    ("EUR", "USD"),
    ("GBP", "USD"),
    ("USD", "JPY"),
    ("USD", "CHF"),
    ("AUD", "USD"),
    ("USD", "CAD"),
    ("NZD", "USD"),
    ("EUR", "GBP"),
    ("EUR", "JPY"),
    ("GBP", "JPY"),
];

/// A supported (base, quote) currency pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CurrencyPair {
    pub base: &'static str,
    pub quote: &'static str,
}

impl CurrencyPair {
    /// Parse "EURUSD", "EUR/USD", "eur-usd" etc. into a supported pair.
    pub fn parse(input: &str) -> Result<Self, PairError> {
        let cleaned: String = input
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_uppercase();

        SUPPORTED_PAIRS
            .iter()
            .find(|(b, q)| format!("{b}{q}") == cleaned)
            .map(|&(base, quote)| Self { base, quote })
            .ok_or_else(|| PairError::BadPair(input.trim().to_string()))
    }

    pub fn all() -> impl Iterator<Item = Self> {
        SUPPORTED_PAIRS
            .iter()
            .map(|&(base, quote)| Self { base, quote })
    }

    /// Both legs, base first.
    pub fn currencies(&self) -> [&'static str; 2] {
        [self.base, self.quote]
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Directional sentiment reading for a pair over a lookback window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairSentiment {
    pub pair: CurrencyPair,
    /// avg(base) − avg(quote), clamped to [-1, 1].
    pub sentiment: f64,
    pub base_avg: f64,
    pub base_count: usize,
    pub quote_avg: f64,
    pub quote_count: usize,
    #[serde(serialize_with = "serialize_hours")]
    pub lookback: Duration,
    pub signal: &'static str,
}

fn serialize_hours<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(d.num_hours())
}

/// Map a pair sentiment value to its human-readable signal tag.
pub fn signal_for(sentiment: f64) -> &'static str {
    if sentiment >= 0.3 {
        "Favor base strength"
    } else if sentiment <= -0.3 {
        "Favor quote strength"
    } else {
        "Neutral"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_common_spellings() {
        for input in ["EURUSD", "EUR/USD", "eur-usd", " eur_usd "] {
            let pair = CurrencyPair::parse(input).unwrap();
            assert_eq!(pair.base, "EUR");
            assert_eq!(pair.quote, "USD");
        }
    }

    #[test]
    fn test_parse_rejects_unknown_pairs() {
        assert!(matches!(
            CurrencyPair::parse("USDEUR"),
            Err(PairError::BadPair(_))
        ));
        assert!(matches!(
            CurrencyPair::parse("BTCUSD"),
            Err(PairError::BadPair(_))
        ));
        assert!(matches!(CurrencyPair::parse(""), Err(PairError::BadPair(_))));
    }

    #[test]
    fn test_all_supported() {
        assert_eq!(CurrencyPair::all().count(), 10);
        assert!(CurrencyPair::all().any(|p| p.to_string() == "GBP/JPY"));
    }

    #[test]
    fn test_signal_thresholds() {
        assert_eq!(signal_for(0.3), "Favor base strength");
        assert_eq!(signal_for(0.6333), "Favor base strength");
        assert_eq!(signal_for(-0.3), "Favor quote strength");
        assert_eq!(signal_for(0.29), "Neutral");
        assert_eq!(signal_for(-0.29), "Neutral");
        assert_eq!(signal_for(0.0), "Neutral");
    }
}
