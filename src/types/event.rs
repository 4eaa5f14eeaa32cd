use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Impact;

/// An economic event from the calendar.
///
/// The natural key is (timestamp, name, currency); `id` is assigned by the
/// store on first insert and absent on freshly scraped events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Scheduled instant, converted to UTC by the scraper.
    pub timestamp: DateTime<Utc>,

    /// Currency affected (e.g. "USD", "EUR")
    pub currency: String,

    /// Event title (e.g. "Non-Farm Payrolls", "Interest Rate Decision")
    pub name: String,

    pub impact: Impact,

    /// Released value, with unit suffix as the source shows it ("272K", "0.3%")
    pub actual: Option<String>,
    pub forecast: Option<String>,
    pub previous: Option<String>,

    /// Rows the source lists as "Tentative" keep the 00:00 source-day slot.
    #[serde(default)]
    pub tentative: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EconomicEvent {
    /// A freshly scraped event, not yet persisted or scored.
    pub fn scraped(
        timestamp: DateTime<Utc>,
        currency: impl Into<String>,
        name: impl Into<String>,
        impact: Impact,
    ) -> Self {
        Self {
            id: None,
            timestamp,
            currency: currency.into(),
            name: name.into(),
            impact,
            actual: None,
            forecast: None,
            previous: None,
            tentative: false,
            sentiment_score: None,
            raw_response: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Whether the analyze phase should look at this event: it must carry a
    /// released value and not be a bank holiday. Mirrors the store's
    /// unscored filter.
    #[allow(dead_code)]
    pub fn is_scorable(&self) -> bool {
        self.sentiment_score.is_none() && self.actual.is_some() && self.impact != Impact::Holiday
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(actual: Option<&str>, impact: Impact) -> EconomicEvent {
        let mut e = EconomicEvent::scraped(
            Utc.with_ymd_and_hms(2024, 6, 7, 12, 30, 0).unwrap(),
            "USD",
            "Non-Farm Payrolls",
            impact,
        );
        e.actual = actual.map(String::from);
        e
    }

    #[test]
    fn test_scorable_requires_actual() {
        assert!(sample(Some("272K"), Impact::High).is_scorable());
        assert!(!sample(None, Impact::High).is_scorable());
    }

    #[test]
    fn test_holidays_never_scorable() {
        assert!(!sample(Some("x"), Impact::Holiday).is_scorable());
    }

    #[test]
    fn test_scored_event_not_rescored() {
        let mut e = sample(Some("272K"), Impact::High);
        e.sentiment_score = Some(0.8);
        assert!(!e.is_scorable());
    }
}
