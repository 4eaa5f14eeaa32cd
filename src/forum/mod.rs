//! Authenticated client for the forum's listing API.
//!
//! Uses the application-only OAuth flow: client credentials are exchanged
//! for a bearer token which is refreshed shortly before expiry. The client
//! owns the per-minute request budget; callers block until capacity frees.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ForumConfig;
use crate::error::ForumError;
use crate::types::ForumPost;

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";

/// Listing sort modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostSort {
    Hot,
    New,
    Top,
}

impl PostSort {
    pub fn as_str(self) -> &'static str {
        match self {
            PostSort::Hot => "hot",
            PostSort::New => "new",
            PostSort::Top => "top",
        }
    }
}

impl fmt::Display for PostSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window for `top` listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFilter {
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

struct BearerToken {
    value: String,
    expires_at: Instant,
}

pub struct ForumClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    user_agent: String,
    token: Mutex<Option<BearerToken>>,
    /// Minimum spacing between requests, derived from the per-minute budget.
    min_delay: Duration,
    last_request: Mutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl ForumClient {
    /// Credentials are required up front; a client without them is a
    /// configuration error, not a runtime one.
    pub fn new(config: &ForumConfig, cancel: CancellationToken) -> Result<Self, ForumError> {
        let client_id = config
            .client_id
            .clone()
            .ok_or_else(|| ForumError::Auth("FORUM_CLIENT_ID is not set".into()))?;
        let client_secret = config
            .client_secret
            .clone()
            .ok_or_else(|| ForumError::Auth("FORUM_CLIENT_SECRET is not set".into()))?;

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ForumError::Network(e.to_string()))?;

        let rpm = config.requests_per_minute.max(1);
        Ok(Self {
            http,
            client_id,
            client_secret,
            user_agent: config.user_agent.clone(),
            token: Mutex::new(None),
            min_delay: Duration::from_millis(60_000 / rpm as u64),
            last_request: Mutex::new(None),
            cancel,
        })
    }

    pub async fn fetch_hot(
        &self,
        channels: &[String],
        limit: u32,
    ) -> Result<Vec<ForumPost>, ForumError> {
        self.fetch(channels, PostSort::Hot, None, limit).await
    }

    pub async fn fetch_new(
        &self,
        channels: &[String],
        limit: u32,
    ) -> Result<Vec<ForumPost>, ForumError> {
        self.fetch(channels, PostSort::New, None, limit).await
    }

    pub async fn fetch_top(
        &self,
        channels: &[String],
        time_filter: TimeFilter,
        limit: u32,
    ) -> Result<Vec<ForumPost>, ForumError> {
        self.fetch(channels, PostSort::Top, Some(time_filter), limit)
            .await
    }

    /// Fetch up to `limit` posts per channel, flattened in channel order.
    /// Cross-channel duplicates are left in; the store deduplicates on
    /// external id.
    pub async fn fetch(
        &self,
        channels: &[String],
        sort: PostSort,
        time_filter: Option<TimeFilter>,
        limit: u32,
    ) -> Result<Vec<ForumPost>, ForumError> {
        let mut posts = Vec::new();
        for channel in channels {
            if self.cancel.is_cancelled() {
                return Err(ForumError::Cancelled);
            }
            match self.fetch_channel_with_retry(channel, sort, time_filter, limit).await {
                Ok(batch) => {
                    debug!(channel, sort = %sort, count = batch.len(), "Fetched channel listing");
                    posts.extend(batch);
                }
                // One bad channel (banned, private, renamed) should not
                // starve the others
                Err(e) if !matches!(e, ForumError::Auth(_) | ForumError::Cancelled) => {
                    warn!(channel, "Skipping channel: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(posts)
    }

    async fn fetch_channel_with_retry(
        &self,
        channel: &str,
        sort: PostSort,
        time_filter: Option<TimeFilter>,
        limit: u32,
    ) -> Result<Vec<ForumPost>, ForumError> {
        let mut last_err = ForumError::Network("no attempts made".into());
        for attempt in 0..3 {
            if attempt > 0 {
                let backoff = Duration::from_secs(2u64.pow(attempt));
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(ForumError::Cancelled),
                    _ = sleep(backoff) => {}
                }
            }
            match self.fetch_channel(channel, sort, time_filter, limit).await {
                Ok(batch) => return Ok(batch),
                Err(e) if e.is_transient() => {
                    warn!(channel, attempt, "Transient forum failure: {e}");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn fetch_channel(
        &self,
        channel: &str,
        sort: PostSort,
        time_filter: Option<TimeFilter>,
        limit: u32,
    ) -> Result<Vec<ForumPost>, ForumError> {
        let token = self.bearer_token().await?;
        self.acquire_budget().await?;

        let mut url = format!("{API_BASE}/r/{channel}/{sort}?limit={limit}&raw_json=1");
        if sort == PostSort::Top {
            url.push_str(&format!("&t={}", time_filter.unwrap_or_default().as_str()));
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ForumError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 {
            // Token expired early; drop it so the next call re-authenticates
            *self.token.lock().await = None;
            return Err(ForumError::Auth("bearer token rejected".into()));
        }
        if !status.is_success() {
            return Err(ForumError::Status(status.as_u16()));
        }

        let listing: Listing = response
            .json()
            .await
            .map_err(|e| ForumError::Decode(e.to_string()))?;

        let fetched_at = Utc::now();
        Ok(listing
            .data
            .children
            .into_iter()
            .map(|child| child.data.into_post(fetched_at))
            .collect())
    }

    async fn bearer_token(&self) -> Result<String, ForumError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            // Refresh a minute before expiry
            if token.expires_at > Instant::now() + Duration::from_secs(60) {
                return Ok(token.value.clone());
            }
        }

        info!("Requesting forum API token");
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("User-Agent", &self.user_agent)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ForumError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ForumError::Auth(format!(
                "credential exchange rejected (HTTP {status})"
            )));
        }
        if !status.is_success() {
            return Err(ForumError::Status(status.as_u16()));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ForumError::Decode(e.to_string()))?;

        let value = token.access_token.clone();
        *guard = Some(BearerToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    /// Block until the per-minute budget allows another request.
    async fn acquire_budget(&self) -> Result<(), ForumError> {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_delay {
                let wait = self.min_delay - elapsed;
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(ForumError::Cancelled),
                    _ = sleep(wait) => {}
                }
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: RawPost,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: String,
    subreddit: String,
    title: String,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    score: i32,
    #[serde(default)]
    num_comments: i32,
    #[serde(default)]
    link_flair_text: Option<String>,
    created_utc: f64,
}

impl RawPost {
    fn into_post(self, fetched_at: DateTime<Utc>) -> ForumPost {
        let timestamp = Utc
            .timestamp_opt(self.created_utc as i64, 0)
            .single()
            .unwrap_or(fetched_at);
        ForumPost {
            id: None,
            external_id: self.id,
            channel: self.subreddit,
            title: self.title,
            body: self.selftext.filter(|s| !s.trim().is_empty()),
            url: self.url.filter(|s| !s.trim().is_empty()),
            score: self.score,
            num_comments: self.num_comments,
            flair: self.link_flair_text,
            timestamp,
            fetched_at,
            symbols: Vec::new(),
            symbol_sentiments: Default::default(),
            sentiment_score: None,
            raw_response: None,
            created_at: None,
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING_FIXTURE: &str = r#"{
        "kind": "Listing",
        "data": {
            "children": [
                {
                    "kind": "t3",
                    "data": {
                        "id": "1abcd2",
                        "subreddit": "wallstreetbets",
                        "title": "Bought $NVDA calls",
                        "selftext": "Earnings play.",
                        "url": "https://i.redd.it/abc.png",
                        "score": 120,
                        "num_comments": 34,
                        "link_flair_text": "YOLO",
                        "created_utc": 1717772400.0
                    }
                },
                {
                    "kind": "t3",
                    "data": {
                        "id": "1abcd3",
                        "subreddit": "stocks",
                        "title": "Link only",
                        "selftext": "",
                        "created_utc": 1717772460.0
                    }
                }
            ]
        }
    }"#;

    #[test]
    fn test_listing_decodes_to_posts() {
        let listing: Listing = serde_json::from_str(LISTING_FIXTURE).unwrap();
        let fetched_at = Utc::now();
        let posts: Vec<ForumPost> = listing
            .data
            .children
            .into_iter()
            .map(|c| c.data.into_post(fetched_at))
            .collect();

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].external_id, "1abcd2");
        assert_eq!(posts[0].channel, "wallstreetbets");
        assert_eq!(posts[0].body.as_deref(), Some("Earnings play."));
        assert_eq!(posts[0].flair.as_deref(), Some("YOLO"));
        assert_eq!(
            posts[0].timestamp,
            Utc.timestamp_opt(1_717_772_400, 0).unwrap()
        );

        // Empty selftext normalizes to None; missing fields take defaults
        assert_eq!(posts[1].body, None);
        assert_eq!(posts[1].score, 0);
        assert_eq!(posts[1].flair, None);
    }

    #[test]
    fn test_sort_and_filter_tokens() {
        assert_eq!(PostSort::Hot.as_str(), "hot");
        assert_eq!(PostSort::Top.as_str(), "top");
        assert_eq!(TimeFilter::default().as_str(), "day");
        assert_eq!(TimeFilter::All.as_str(), "all");
    }

    #[test]
    fn test_client_requires_credentials() {
        let config = ForumConfig {
            client_id: None,
            client_secret: None,
            user_agent: "test".into(),
            requests_per_minute: 60,
        };
        assert!(matches!(
            ForumClient::new(&config, CancellationToken::new()),
            Err(ForumError::Auth(_))
        ));
    }
}
