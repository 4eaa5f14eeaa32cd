mod analyzer;
mod config;
mod error;
mod forum;
mod scraper;
mod service;
mod store;
mod types;

use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::forum::{PostSort, TimeFilter};
use crate::service::backfill::BackfillDriver;
use crate::service::monitor::Monitor;
use crate::service::pair::{PairAggregator, format_reading};
use crate::service::pipeline::{EventPeriod, Pipeline, RunPlan};
use crate::store::Store;
use crate::types::CurrencyPair;

#[derive(Parser)]
#[command(
    name = "fx-sentinel",
    about = "Financial news sentiment ingestion and scoring pipeline",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Harvest events/posts, analyze unscored items, query pair sentiment
    Run {
        /// Harvest economic events for this period
        #[arg(long, value_enum)]
        scrape_events: Option<EventPeriodArg>,

        /// Harvest forum posts with this sort
        #[arg(long, value_enum)]
        scrape_posts: Option<PostSortArg>,

        /// Time window for the `top` sort
        #[arg(long, value_enum, default_value = "day")]
        top_period: TopPeriodArg,

        /// Per-channel post cap
        #[arg(long, default_value_t = 25)]
        posts_limit: u32,

        /// Override the default channel list (comma separated)
        #[arg(long, value_delimiter = ',')]
        channels: Vec<String>,

        /// Score unscored events and posts
        #[arg(long)]
        analyze: bool,

        /// Print sentiment for one pair, e.g. EURUSD
        #[arg(long)]
        pair: Option<String>,

        /// Print sentiment for every supported pair
        #[arg(long)]
        pair_all: bool,

        /// Roll back all writes on completion
        #[arg(long)]
        dry_run: bool,
    },

    /// Walk historical calendar weeks with checkpoint/resume
    Backfill {
        /// First date of the range (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last date of the range (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// Checkpoint file path
        #[arg(long, default_value = "backfill_checkpoint.json")]
        checkpoint: PathBuf,
    },

    /// Periodically harvest + analyze a pair and print its sentiment
    Monitor {
        /// Pair to watch, e.g. EURUSD
        #[arg(long)]
        pair: String,

        /// Minutes between ticks
        #[arg(long, default_value_t = 30)]
        interval_mins: u64,

        /// Override the default channel list (comma separated)
        #[arg(long, value_delimiter = ',')]
        channels: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EventPeriodArg {
    Today,
    Week,
    Month,
}

impl From<EventPeriodArg> for EventPeriod {
    fn from(arg: EventPeriodArg) -> Self {
        match arg {
            EventPeriodArg::Today => EventPeriod::Today,
            EventPeriodArg::Week => EventPeriod::Week,
            EventPeriodArg::Month => EventPeriod::Month,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PostSortArg {
    Hot,
    New,
    Top,
}

impl From<PostSortArg> for PostSort {
    fn from(arg: PostSortArg) -> Self {
        match arg {
            PostSortArg::Hot => PostSort::Hot,
            PostSortArg::New => PostSort::New,
            PostSortArg::Top => PostSort::Top,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TopPeriodArg {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl From<TopPeriodArg> for TimeFilter {
    fn from(arg: TopPeriodArg) -> Self {
        match arg {
            TopPeriodArg::Hour => TimeFilter::Hour,
            TopPeriodArg::Day => TimeFilter::Day,
            TopPeriodArg::Week => TimeFilter::Week,
            TopPeriodArg::Month => TimeFilter::Month,
            TopPeriodArg::Year => TimeFilter::Year,
            TopPeriodArg::All => TimeFilter::All,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        print_usage()?;
        return Ok(());
    };

    let config = Config::from_env()?;

    // One token for the whole process; ctrl-c finishes current work and
    // unwinds cleanly
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received; finishing current work");
                cancel.cancel();
            }
        });
    }

    match command {
        Command::Run {
            scrape_events,
            scrape_posts,
            top_period,
            posts_limit,
            channels,
            analyze,
            pair,
            pair_all,
            dry_run,
        } => {
            let plan = RunPlan {
                scrape_events: scrape_events.map(Into::into),
                scrape_posts: scrape_posts.map(Into::into),
                top_time_filter: top_period.into(),
                analyze,
                dry_run,
                channels,
                post_limit: posts_limit,
                currencies: Vec::new(),
            };

            // Invalid pair codes fail before any work happens
            let pair = pair.as_deref().map(CurrencyPair::parse).transpose()?;

            if !plan.has_action() && pair.is_none() && !pair_all {
                print_usage()?;
                return Ok(());
            }

            let store = Arc::new(Store::connect(&config.db).await?);

            if plan.has_action() {
                let pipeline = Pipeline::new(config, store.clone(), cancel.clone());
                pipeline.run(&plan).await?;
            }

            let aggregator = PairAggregator::new(&store);
            if let Some(pair) = pair {
                let reading = aggregator.pair_sentiment(pair, None).await?;
                println!("{}", format_reading(&reading));
            }
            if pair_all {
                for pair in CurrencyPair::all() {
                    let reading = aggregator.pair_sentiment(pair, None).await?;
                    println!("{}", format_reading(&reading));
                }
            }
        }

        Command::Backfill {
            start,
            end,
            checkpoint,
        } => {
            let store = Arc::new(Store::connect(&config.db).await?);
            let driver =
                BackfillDriver::new(config.scraper.clone(), store, checkpoint, cancel.clone())?;
            let report = driver.run(start, end).await?;
            println!(
                "Backfill: {} weeks completed, {} skipped, {} failed, {} events written",
                report.weeks_completed,
                report.weeks_skipped,
                report.weeks_failed,
                report.events_written
            );
        }

        Command::Monitor {
            pair,
            interval_mins,
            channels,
        } => {
            let pair = CurrencyPair::parse(&pair)?;
            let store = Arc::new(Store::connect(&config.db).await?);
            let pipeline = Pipeline::new(config, store, cancel.clone());
            let monitor = Monitor::new(
                pipeline,
                pair,
                channels,
                Duration::from_secs(interval_mins * 60),
                cancel.clone(),
            );
            monitor.run().await?;
        }
    }

    Ok(())
}

fn print_usage() -> Result<()> {
    Cli::command().print_help()?;
    println!();
    Ok(())
}
