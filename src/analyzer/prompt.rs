//! Prompt construction. One builder per item kind × image disposition;
//! the templates are fixed strings with the item's fields spliced in.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::types::{EconomicEvent, ForumPost};

const NA: &str = "N/A";

/// The analyzer-facing projection of an economic event: exactly the fields
/// the model sees, with missing values rendered as "N/A".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFields {
    pub name: String,
    pub currency: String,
    pub impact: String,
    pub actual: String,
    pub forecast: String,
    pub previous: String,
}

impl EventFields {
    pub fn from_event(event: &EconomicEvent) -> Self {
        let or_na = |v: &Option<String>| v.clone().unwrap_or_else(|| NA.to_string());
        Self {
            name: event.name.clone(),
            currency: event.currency.clone(),
            impact: event.impact.as_str().to_string(),
            actual: or_na(&event.actual),
            forecast: or_na(&event.forecast),
            previous: or_na(&event.previous),
        }
    }

    #[allow(dead_code)]
    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("event_name", self.name.clone()),
            ("currency", self.currency.clone()),
            ("impact", self.impact.clone()),
            ("actual", self.actual.clone()),
            ("forecast", self.forecast.clone()),
            ("previous", self.previous.clone()),
        ])
    }

    #[allow(dead_code)]
    pub fn from_map(map: &BTreeMap<&'static str, String>) -> Self {
        let get = |k: &str| map.get(k).cloned().unwrap_or_else(|| NA.to_string());
        Self {
            name: get("event_name"),
            currency: get("currency"),
            impact: get("impact"),
            actual: get("actual"),
            forecast: get("forecast"),
            previous: get("previous"),
        }
    }
}

/// Whether a post image could be attached to the request.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageDisposition {
    /// No image URL on the post.
    None,
    /// Image downloaded and attached to the multimodal request.
    Attached,
    /// Image URL present but the download failed; the model must reason
    /// from text alone.
    Unavailable { url: String, reason: String },
}

pub fn event_prompt(event: &EconomicEvent) -> String {
    let fields = EventFields::from_event(event);
    format!(
        "You are a financial analyst. Score the market sentiment impact of this \
economic calendar release for its currency.\n\n\
Event: {name}\n\
Currency: {currency}\n\
Impact level: {impact}\n\
Actual: {actual}\n\
Forecast: {forecast}\n\
Previous: {previous}\n\n\
Scoring rules:\n\
- Compare actual against forecast: a beat is bullish for the currency, a miss is bearish.\n\
- Weight by the size of the surprise relative to the previous reading.\n\
- Weight by impact level: high-impact releases move markets more.\n\
- Consider the indicator's significance (employment, inflation and rate decisions dominate).\n\
- Use 0.0 when actual is unavailable or the release is neutral.\n\n\
Respond with a single JSON object and nothing else:\n\
{{\"score\": <number between -1.0 and 1.0>, \"reasoning\": \"<one or two sentences>\"}}",
        name = fields.name,
        currency = fields.currency,
        impact = fields.impact,
        actual = fields.actual,
        forecast = fields.forecast,
        previous = fields.previous,
    )
}

pub fn post_prompt(post: &ForumPost, image: &ImageDisposition) -> String {
    let mut body = String::new();
    let _ = write!(
        body,
        "You are a financial analyst. Score the overall market sentiment of this \
forum post and the sentiment toward each ticker it mentions.\n\n\
Channel: {}\n\
Title: {}\n",
        post.channel, post.title
    );

    if let Some(text) = &post.body {
        if !text.trim().is_empty() {
            let _ = write!(body, "Body: {text}\n");
        }
    }
    if let Some(url) = &post.url {
        let _ = write!(body, "URL: {url}\n");
    }

    match image {
        ImageDisposition::Attached => {
            body.push_str("\nAn image from the post is attached; read any chart, position screenshot or text it contains.\n");
        }
        ImageDisposition::Unavailable { url, reason } => {
            let _ = write!(
                body,
                "\nNote: the post links an image at {url} which could not be downloaded ({reason}). \
Do not guess its contents; reason from the title and any text above only.\n"
            );
        }
        ImageDisposition::None => {}
    }

    body.push_str(
        "\nRespond with a single JSON object and nothing else:\n\
{\"score\": <number between -1.0 and 1.0>, \
\"reasoning\": \"<one or two sentences>\", \
\"symbols\": [\"<ticker>\", ...], \
\"symbol_sentiments\": {\"<ticker>\": <number between -1.0 and 1.0>, ...}}",
    );
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Impact;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn event() -> EconomicEvent {
        let mut e = EconomicEvent::scraped(
            Utc.with_ymd_and_hms(2024, 6, 7, 12, 30, 0).unwrap(),
            "USD",
            "Non-Farm Payrolls",
            Impact::High,
        );
        e.actual = Some("272K".into());
        e.forecast = Some("180K".into());
        e
    }

    fn post() -> ForumPost {
        ForumPost {
            id: None,
            external_id: "x1".into(),
            channel: "stocks".into(),
            title: "NVDA earnings tonight".into(),
            body: None,
            url: Some("https://i.redd.it/abc.png".into()),
            score: 10,
            num_comments: 2,
            flair: None,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 7, 15, 0, 0).unwrap(),
            fetched_at: Utc.with_ymd_and_hms(2024, 6, 7, 15, 30, 0).unwrap(),
            symbols: vec![],
            symbol_sentiments: HashMap::new(),
            sentiment_score: None,
            raw_response: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_event_fields_round_trip() {
        let fields = EventFields::from_event(&event());
        assert_eq!(EventFields::from_map(&fields.to_map()), fields);
    }

    #[test]
    fn test_missing_values_render_na() {
        let fields = EventFields::from_event(&event());
        assert_eq!(fields.previous, "N/A");
        assert_eq!(fields.actual, "272K");
        let prompt = event_prompt(&event());
        assert!(prompt.contains("Previous: N/A"));
        assert!(prompt.contains("Actual: 272K"));
        assert!(prompt.contains("Impact level: high"));
    }

    #[test]
    fn test_event_prompt_requests_json() {
        let prompt = event_prompt(&event());
        assert!(prompt.contains("\"score\""));
        assert!(prompt.contains("\"reasoning\""));
    }

    #[test]
    fn test_post_prompt_image_unavailable_is_explicit() {
        let p = post();
        let prompt = post_prompt(
            &p,
            &ImageDisposition::Unavailable {
                url: "https://i.redd.it/abc.png".into(),
                reason: "image fetch failed with HTTP 404".into(),
            },
        );
        // Fallback prompt still names the URL, flags it unavailable, and
        // directs the model to text-only reasoning
        assert!(prompt.contains("https://i.redd.it/abc.png"));
        assert!(prompt.contains("could not be downloaded"));
        assert!(prompt.contains("title and any text above only"));
        assert!(prompt.contains("\"symbol_sentiments\""));
    }

    #[test]
    fn test_post_prompt_attached_differs_from_fallback() {
        let p = post();
        let attached = post_prompt(&p, &ImageDisposition::Attached);
        let none = post_prompt(&p, &ImageDisposition::None);
        assert!(attached.contains("is attached"));
        assert!(!none.contains("is attached"));
        assert_ne!(attached, none);
    }
}
