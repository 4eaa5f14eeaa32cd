//! Historical calendar backfill: walk weeks ascending, persist each, and
//! checkpoint after every commit so an interrupted run resumes where it
//! stopped instead of re-harvesting.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use color_eyre::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ScraperConfig;
use crate::error::{BackfillError, ScrapeError};
use crate::scraper::{CalendarScraper, week_anchor};
use crate::store::Store;

/// Progress record, written atomically after each completed week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_completed_week_anchor: Option<NaiveDate>,
    #[serde(default)]
    pub failed_weeks: Vec<NaiveDate>,
    pub started_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

impl Checkpoint {
    fn fresh() -> Self {
        let now = Utc::now();
        Self {
            last_completed_week_anchor: None,
            failed_weeks: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub async fn load(path: &Path) -> Result<Option<Self>, BackfillError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Temp-file-and-rename so a crash mid-write never leaves a torn
    /// checkpoint behind.
    pub async fn save(&self, path: &Path) -> Result<(), BackfillError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct BackfillReport {
    pub weeks_completed: usize,
    pub weeks_skipped: usize,
    pub weeks_failed: usize,
    pub events_written: u64,
}

pub struct BackfillDriver {
    scraper: CalendarScraper,
    store: Arc<Store>,
    checkpoint_path: PathBuf,
    jitter_ms: u64,
    cancel: CancellationToken,
}

impl BackfillDriver {
    pub fn new(
        config: ScraperConfig,
        store: Arc<Store>,
        checkpoint_path: PathBuf,
        cancel: CancellationToken,
    ) -> Result<Self, ScrapeError> {
        let jitter_ms = config.jitter_ms;
        Ok(Self {
            scraper: CalendarScraper::new(config, cancel.clone())?,
            store,
            checkpoint_path,
            jitter_ms,
            cancel,
        })
    }

    /// Backfill `[start, end]` week by week, ascending. Weeks at or before
    /// the checkpoint are skipped; weeks that fail after the scraper's own
    /// retries are recorded and the drive continues.
    pub async fn run(&self, start: NaiveDate, end: NaiveDate) -> Result<BackfillReport> {
        let mut checkpoint = Checkpoint::load(&self.checkpoint_path)
            .await?
            .unwrap_or_else(Checkpoint::fresh);
        let mut report = BackfillReport::default();

        for anchor in anchors_between(start, end) {
            if self.cancel.is_cancelled() {
                info!("Backfill cancelled; checkpoint preserved");
                self.scraper.shutdown();
                return Ok(report);
            }

            if checkpoint
                .last_completed_week_anchor
                .is_some_and(|done| anchor <= done)
            {
                report.weeks_skipped += 1;
                continue;
            }

            match self.backfill_week(anchor).await {
                Ok(written) => {
                    report.weeks_completed += 1;
                    report.events_written += written;
                    checkpoint.last_completed_week_anchor = Some(anchor);
                }
                Err(BackfillError::Scrape(ScrapeError::Cancelled)) => {
                    info!("Backfill cancelled mid-week; checkpoint preserved");
                    self.scraper.shutdown();
                    return Ok(report);
                }
                Err(e) => {
                    warn!(week = %anchor, "Week backfill failed: {e}");
                    report.weeks_failed += 1;
                    if !checkpoint.failed_weeks.contains(&anchor) {
                        checkpoint.failed_weeks.push(anchor);
                    }
                }
            }

            // Checkpoint only after the upsert has committed
            checkpoint.updated_at = Utc::now();
            checkpoint.save(&self.checkpoint_path).await?;

            // Extra spacing between weeks, on top of the scraper's own
            // inter-request delay
            let extra = rand::rng().random_range(0..=self.jitter_ms);
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = sleep(Duration::from_millis(extra)) => {}
            }
        }

        self.scraper.shutdown();
        info!(
            completed = report.weeks_completed,
            skipped = report.weeks_skipped,
            failed = report.weeks_failed,
            events = report.events_written,
            "Backfill finished"
        );
        Ok(report)
    }

    async fn backfill_week(&self, anchor: NaiveDate) -> Result<u64, BackfillError> {
        let events = self.scraper.scrape_week(anchor).await?;
        info!(week = %anchor, count = events.len(), "Backfilled week");
        Ok(self.store.upsert_events(&events).await?)
    }
}

/// Week anchors from the week containing `start` through the week
/// containing `end`, ascending.
pub fn anchors_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut anchors = Vec::new();
    if end < start {
        return anchors;
    }
    let mut anchor = week_anchor(start);
    let last = week_anchor(end);
    while anchor <= last {
        anchors.push(anchor);
        anchor += ChronoDuration::days(7);
    }
    anchors
}
