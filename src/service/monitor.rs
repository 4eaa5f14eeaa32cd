//! Periodic pair monitor: one tick per interval, each tick runs
//! harvest + analyze scoped to the pair, then prints the pair reading.
//! Ticks run to completion and never overlap; an interrupt finishes the
//! current tick before exiting.

use color_eyre::Result;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::forum::PostSort;
use crate::service::pair::{PairAggregator, format_reading};
use crate::service::pipeline::{EventPeriod, Pipeline, RunPlan};
use crate::types::CurrencyPair;

pub struct Monitor {
    pipeline: Pipeline,
    pair: CurrencyPair,
    channels: Vec<String>,
    interval: Duration,
    cancel: CancellationToken,
}

impl Monitor {
    pub fn new(
        pipeline: Pipeline,
        pair: CurrencyPair,
        channels: Vec<String>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pipeline,
            pair,
            channels,
            interval,
            cancel,
        }
    }

    /// Run until cancelled. Tick failures are logged and the loop keeps
    /// going; only cancellation ends it.
    pub async fn run(&self) -> Result<()> {
        info!(pair = %self.pair, interval_secs = self.interval.as_secs(), "Monitor started");

        let mut ticker = time::interval(self.interval);
        // A slow tick delays the next one instead of bunching catch-up runs
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("Monitor tick failed: {e:#}");
                    }
                }
            }
        }

        info!("Monitor stopped");
        Ok(())
    }

    async fn tick(&self) -> Result<()> {
        let plan = RunPlan {
            scrape_events: Some(EventPeriod::Today),
            scrape_posts: Some(PostSort::Hot),
            analyze: true,
            channels: self.channels.clone(),
            currencies: self
                .pair
                .currencies()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            ..RunPlan::default()
        };

        let report = self.pipeline.run(&plan).await?;
        info!(
            events = report.events_scraped,
            posts = report.posts_fetched,
            scored = report.events_scored + report.posts_scored,
            "Tick pipeline done"
        );

        let aggregator = PairAggregator::new(self.pipeline.store());
        let reading = aggregator.pair_sentiment(self.pair, None).await?;
        println!("{}", format_reading(&reading));
        Ok(())
    }
}
