//! The Harvest → Analyze → Persist orchestrator. Phases run in a fixed
//! order, each independently skippable; recoverable per-item failures are
//! logged and counted, only phase-level failures abort the run.

use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::America::New_York;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analyzer::SentimentAnalyzer;
use crate::config::{Config, DEFAULT_CHANNELS};
use crate::forum::{ForumClient, PostSort, TimeFilter};
use crate::scraper::{CalendarScraper, week_anchor};
use crate::store::Store;
use crate::types::EconomicEvent;

/// Calendar range for the event harvest phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPeriod {
    Today,
    Week,
    Month,
}

/// What one invocation should do.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub scrape_events: Option<EventPeriod>,
    pub scrape_posts: Option<PostSort>,
    pub top_time_filter: TimeFilter,
    pub analyze: bool,
    pub dry_run: bool,
    pub channels: Vec<String>,
    pub post_limit: u32,
    /// When non-empty, harvested events are filtered to these currencies
    /// (the monitor scopes runs to a pair this way).
    pub currencies: Vec<String>,
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            scrape_events: None,
            scrape_posts: None,
            top_time_filter: TimeFilter::default(),
            analyze: false,
            dry_run: false,
            channels: Vec::new(),
            post_limit: 25,
            currencies: Vec::new(),
        }
    }
}

impl RunPlan {
    /// A plan with nothing to do means "print usage", not an empty run.
    pub fn has_action(&self) -> bool {
        self.scrape_events.is_some() || self.scrape_posts.is_some() || self.analyze
    }

    pub fn effective_channels(&self) -> Vec<String> {
        if self.channels.is_empty() {
            DEFAULT_CHANNELS.iter().map(|s| s.to_string()).collect()
        } else {
            self.channels.clone()
        }
    }

    fn keeps_event(&self, event: &EconomicEvent) -> bool {
        self.currencies.is_empty()
            || self
                .currencies
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&event.currency))
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub events_scraped: usize,
    pub events_written: u64,
    pub posts_fetched: usize,
    pub posts_written: u64,
    pub events_scored: usize,
    pub posts_scored: usize,
    pub warnings: usize,
}

pub struct Pipeline {
    config: Config,
    store: Arc<Store>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(config: Config, store: Arc<Store>, cancel: CancellationToken) -> Self {
        Self {
            config,
            store,
            cancel,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Execute the plan. In dry-run mode every phase shares one
    /// transaction which is rolled back before returning, success or not.
    pub async fn run(&self, plan: &RunPlan) -> Result<RunReport> {
        if plan.dry_run {
            self.store
                .begin_dry_run()
                .await
                .wrap_err("could not open dry-run transaction")?;
        }

        let outcome = self.run_phases(plan).await;

        if plan.dry_run {
            // Visible only inside the transaction; gone after the rollback
            if let (Ok(events), Ok(posts)) = (
                self.store.event_count().await,
                self.store.post_count().await,
            ) {
                info!(events, posts, "Totals inside dry-run transaction");
            }
            if let Err(e) = self.store.rollback_dry_run().await {
                warn!("Dry-run rollback failed: {e}");
            }
        }

        outcome
    }

    async fn run_phases(&self, plan: &RunPlan) -> Result<RunReport> {
        let mut report = RunReport::default();

        if let Some(period) = plan.scrape_events {
            self.harvest_events(plan, period, &mut report)
                .await
                .map_err(|e| e.wrap_err("scrape-events phase"))?;
        }

        if let Some(sort) = plan.scrape_posts {
            self.harvest_posts(plan, sort, &mut report)
                .await
                .map_err(|e| e.wrap_err("scrape-posts phase"))?;
        }

        if plan.analyze {
            self.analyze_unscored(&mut report)
                .await
                .map_err(|e| e.wrap_err("analyze phase"))?;
        }

        info!(
            events_scraped = report.events_scraped,
            events_written = report.events_written,
            posts_fetched = report.posts_fetched,
            posts_written = report.posts_written,
            events_scored = report.events_scored,
            posts_scored = report.posts_scored,
            warnings = report.warnings,
            "Run complete"
        );
        Ok(report)
    }

    async fn harvest_events(
        &self,
        plan: &RunPlan,
        period: EventPeriod,
        report: &mut RunReport,
    ) -> Result<()> {
        let scraper = CalendarScraper::new(self.config.scraper.clone(), self.cancel.clone())?;
        // "today" in the calendar's own timezone, not the machine's
        let today = Utc::now().with_timezone(&New_York).date_naive();

        let mut events = Vec::new();
        match period {
            EventPeriod::Today => events = scraper.scrape_day(today).await?,
            EventPeriod::Week => events = scraper.scrape_week(today).await?,
            EventPeriod::Month => {
                // A failed week inside a month harvest is a warning, not a
                // run failure; the other weeks still land.
                for anchor in month_week_anchors(today) {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    match scraper.scrape_week(anchor).await {
                        Ok(batch) => events.extend(batch),
                        Err(e) => {
                            warn!(week = %anchor, "Week harvest failed: {e}");
                            report.warnings += 1;
                        }
                    }
                }
            }
        }
        scraper.shutdown();

        events.retain(|e| plan.keeps_event(e));
        report.events_scraped = events.len();
        report.events_written = self.store.upsert_events(&events).await?;
        info!(
            scraped = report.events_scraped,
            written = report.events_written,
            "Event harvest stored"
        );
        Ok(())
    }

    async fn harvest_posts(
        &self,
        plan: &RunPlan,
        sort: PostSort,
        report: &mut RunReport,
    ) -> Result<()> {
        let client = ForumClient::new(&self.config.forum, self.cancel.clone())?;
        let channels = plan.effective_channels();

        let posts = match sort {
            PostSort::Hot => client.fetch_hot(&channels, plan.post_limit).await?,
            PostSort::New => client.fetch_new(&channels, plan.post_limit).await?,
            PostSort::Top => {
                client
                    .fetch_top(&channels, plan.top_time_filter, plan.post_limit)
                    .await?
            }
        };

        report.posts_fetched = posts.len();
        report.posts_written = self.store.upsert_posts(&posts).await?;
        info!(
            fetched = report.posts_fetched,
            written = report.posts_written,
            "Post harvest stored"
        );
        Ok(())
    }

    /// Score everything the unscored filters surface. The snapshot is read
    /// once; items scored by a concurrent run are simply absent from it.
    async fn analyze_unscored(&self, report: &mut RunReport) -> Result<()> {
        let analyzer = SentimentAnalyzer::new(&self.config.llm, self.cancel.clone())?;

        let events = self.store.unscored_events().await?;
        info!(count = events.len(), "Analyzing unscored events");
        let results = analyzer.analyze_events(&events).await;
        for (event, result) in events.iter().zip(results) {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(id) = event.id else { continue };
            let raw = result.raw_response.clone().unwrap_or(serde_json::Value::Null);
            match self.store.update_event_score(id, result.score, &raw).await {
                Ok(()) => report.events_scored += 1,
                Err(e) => {
                    warn!(event = %event.name, "Could not persist event score: {e}");
                    report.warnings += 1;
                }
            }
            if result.meta.failure_reason.is_some() {
                report.warnings += 1;
            }
        }

        let posts = self.store.unscored_posts().await?;
        info!(count = posts.len(), "Analyzing unscored posts");
        let results = analyzer.analyze_posts(&posts).await;
        for (post, result) in posts.iter().zip(results) {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(id) = post.id else { continue };
            let raw = result.raw_response.clone().unwrap_or(serde_json::Value::Null);
            match self
                .store
                .update_post_score(
                    id,
                    result.score,
                    &result.symbols,
                    &result.symbol_sentiments,
                    &raw,
                )
                .await
            {
                Ok(()) => report.posts_scored += 1,
                Err(e) => {
                    warn!(post = %post.external_id, "Could not persist post score: {e}");
                    report.warnings += 1;
                }
            }
            if result.meta.failure_reason.is_some() {
                report.warnings += 1;
            }
        }

        Ok(())
    }
}

/// Week anchors covering the month containing `date`, ascending.
pub fn month_week_anchors(date: NaiveDate) -> Vec<NaiveDate> {
    let first = date.with_day(1).unwrap_or(date);
    let last = match first.with_month(first.month() % 12 + 1) {
        Some(next_first) if first.month() < 12 => next_first.pred_opt().unwrap_or(first),
        _ => NaiveDate::from_ymd_opt(first.year(), 12, 31).unwrap_or(first),
    };

    let mut anchors = Vec::new();
    let mut anchor = week_anchor(first);
    while anchor <= last {
        anchors.push(anchor);
        anchor += chrono::Duration::days(7);
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Impact;
    use chrono::TimeZone;

    #[test]
    fn test_month_week_anchors_cover_june_2024() {
        // June 2024: first is a Saturday, so the first anchor is May 26
        let anchors = month_week_anchors(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());
        assert_eq!(anchors.first().copied(), NaiveDate::from_ymd_opt(2024, 5, 26));
        assert_eq!(anchors.last().copied(), NaiveDate::from_ymd_opt(2024, 6, 30));
        assert_eq!(anchors.len(), 6);
        assert!(anchors.windows(2).all(|w| w[1] - w[0] == chrono::Duration::days(7)));
    }

    #[test]
    fn test_month_week_anchors_december() {
        let anchors = month_week_anchors(NaiveDate::from_ymd_opt(2024, 12, 10).unwrap());
        assert!(!anchors.is_empty());
        assert!(anchors.iter().all(|a| *a <= NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
    }

    #[test]
    fn test_plan_action_detection() {
        assert!(!RunPlan::default().has_action());
        let plan = RunPlan {
            analyze: true,
            ..RunPlan::default()
        };
        assert!(plan.has_action());
        let plan = RunPlan {
            scrape_events: Some(EventPeriod::Week),
            ..RunPlan::default()
        };
        assert!(plan.has_action());
    }

    #[test]
    fn test_default_channels_apply_when_unset() {
        let plan = RunPlan::default();
        assert_eq!(plan.effective_channels().len(), 6);
        let plan = RunPlan {
            channels: vec!["forex".into()],
            ..RunPlan::default()
        };
        assert_eq!(plan.effective_channels(), vec!["forex"]);
    }

    #[test]
    fn test_currency_scope_filter() {
        let plan = RunPlan {
            currencies: vec!["EUR".into(), "USD".into()],
            ..RunPlan::default()
        };
        let eur = EconomicEvent::scraped(
            Utc.with_ymd_and_hms(2024, 6, 7, 12, 0, 0).unwrap(),
            "EUR",
            "X",
            Impact::Low,
        );
        let jpy = EconomicEvent::scraped(
            Utc.with_ymd_and_hms(2024, 6, 7, 12, 0, 0).unwrap(),
            "JPY",
            "Y",
            Impact::Low,
        );
        assert!(plan.keeps_event(&eur));
        assert!(!plan.keeps_event(&jpy));
        assert!(RunPlan::default().keeps_event(&jpy));
    }
}
