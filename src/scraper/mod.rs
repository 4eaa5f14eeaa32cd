pub mod browser;
pub mod parser;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate};
use chrono_tz::America::New_York;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::types::EconomicEvent;

pub use browser::{CalendarFetcher, format_week_param};
pub use parser::CalendarParser;

/// The Sunday starting the week containing `date` — the source's unit of
/// navigation and the backfill progress unit.
pub fn week_anchor(date: NaiveDate) -> NaiveDate {
    date - ChronoDuration::days(date.weekday().num_days_from_sunday() as i64)
}

/// Browser-driven calendar scraper with polite pacing and bounded retry.
pub struct CalendarScraper {
    fetcher: CalendarFetcher,
    parser: CalendarParser,
    config: ScraperConfig,
    cancel: CancellationToken,
    last_request: tokio::sync::Mutex<Option<tokio::time::Instant>>,
}

impl CalendarScraper {
    pub fn new(config: ScraperConfig, cancel: CancellationToken) -> Result<Self, ScrapeError> {
        Ok(Self {
            fetcher: CalendarFetcher::new(config.clone()),
            parser: CalendarParser::new()?,
            config,
            cancel,
            last_request: tokio::sync::Mutex::new(None),
        })
    }

    /// Scrape every event in the week containing `date`, ordered by UTC
    /// timestamp. Transient failures (timeouts, challenges) retry with
    /// capped exponential backoff; anything else fails the week.
    pub async fn scrape_week(&self, date: NaiveDate) -> Result<Vec<EconomicEvent>, ScrapeError> {
        let anchor = week_anchor(date);
        let mut last_err = ScrapeError::Navigation {
            url: format!("calendar?week={}", format_week_param(anchor)),
            reason: "no attempts made".into(),
        };

        for attempt in 0..=self.config.max_retries {
            if self.cancel.is_cancelled() {
                self.fetcher.shutdown();
                return Err(ScrapeError::Cancelled);
            }

            self.polite_delay().await?;

            match self.fetcher.fetch_week_html(anchor).await {
                Ok(html) => {
                    let events = self.parser.parse(&html, anchor)?;
                    info!(week = %anchor, count = events.len(), "Scraped calendar week");
                    return Ok(events);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let backoff = backoff_delay(self.config.request_delay_ms, attempt);
                    warn!(
                        week = %anchor,
                        attempt = attempt + 1,
                        "Transient scrape failure ({e}), backing off {backoff:?}"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.fetcher.shutdown();
                            return Err(ScrapeError::Cancelled);
                        }
                        _ = sleep(backoff) => {}
                    }
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }

    /// Scrape a single source-timezone calendar day.
    pub async fn scrape_day(&self, date: NaiveDate) -> Result<Vec<EconomicEvent>, ScrapeError> {
        let events = self.scrape_week(date).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.timestamp.with_timezone(&New_York).date_naive() == date)
            .collect())
    }

    /// Close the browser. The scraper can still be used afterwards; the
    /// next fetch relaunches.
    pub fn shutdown(&self) {
        self.fetcher.shutdown();
    }

    /// Enforce the minimum inter-request delay plus random jitter.
    async fn polite_delay(&self) -> Result<(), ScrapeError> {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let jitter = rand::rng().random_range(0..=self.config.jitter_ms);
            let floor = Duration::from_millis(self.config.request_delay_ms + jitter);
            let elapsed = prev.elapsed();
            if elapsed < floor {
                let wait = floor - elapsed;
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(ScrapeError::Cancelled),
                    _ = sleep(wait) => {}
                }
            }
        }
        *last = Some(tokio::time::Instant::now());
        Ok(())
    }
}

/// Exponential backoff base 2, capped at one minute.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let ms = base_ms.saturating_mul(2u64.saturating_pow(attempt + 1));
    Duration::from_millis(ms.min(60_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_week_anchor_is_sunday() {
        // 2024-06-07 is a Friday; its week starts Sunday 2024-06-02
        let friday = NaiveDate::from_ymd_opt(2024, 6, 7).unwrap();
        assert_eq!(
            week_anchor(friday),
            NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()
        );
        // A Sunday anchors itself
        let sunday = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        assert_eq!(week_anchor(sunday), sunday);
        // Saturday belongs to the preceding Sunday
        let saturday = NaiveDate::from_ymd_opt(2024, 6, 8).unwrap();
        assert_eq!(
            week_anchor(saturday),
            NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()
        );
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1000, 0), Duration::from_millis(2000));
        assert_eq!(backoff_delay(1000, 1), Duration::from_millis(4000));
        assert_eq!(backoff_delay(1000, 2), Duration::from_millis(8000));
        assert_eq!(backoff_delay(60_000, 8), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_cancelled_scrape_returns_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scraper = CalendarScraper::new(ScraperConfig::default(), cancel).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 6, 7).unwrap();
        assert!(matches!(
            scraper.scrape_week(date).await,
            Err(ScrapeError::Cancelled)
        ));
    }
}
