//! Directional pair sentiment: mean event sentiment per currency over a
//! lookback window, differenced base minus quote.

use chrono::{Duration, Utc};

use crate::error::PairError;
use crate::store::Store;
use crate::types::{CurrencyPair, PairSentiment, clamp_score, signal_for};

/// One week of events.
pub fn default_lookback() -> Duration {
    Duration::hours(168)
}

/// Mean of a score slice; empty means neutral.
fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

/// The aggregation itself, kept free of the store so the arithmetic is
/// directly testable.
pub fn compute(
    pair: CurrencyPair,
    base_scores: &[f64],
    quote_scores: &[f64],
    lookback: Duration,
) -> PairSentiment {
    let base_avg = mean(base_scores);
    let quote_avg = mean(quote_scores);
    let sentiment = clamp_score(base_avg - quote_avg);
    PairSentiment {
        pair,
        sentiment,
        base_avg,
        base_count: base_scores.len(),
        quote_avg,
        quote_count: quote_scores.len(),
        lookback,
        signal: signal_for(sentiment),
    }
}

pub struct PairAggregator<'a> {
    store: &'a Store,
}

impl<'a> PairAggregator<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Sentiment for `pair` over `lookback` (default one week).
    pub async fn pair_sentiment(
        &self,
        pair: CurrencyPair,
        lookback: Option<Duration>,
    ) -> Result<PairSentiment, PairError> {
        let lookback = lookback.unwrap_or_else(default_lookback);
        let since = Utc::now() - lookback;

        let base_scores = self.scores_for(pair.base, since).await?;
        let quote_scores = self.scores_for(pair.quote, since).await?;

        Ok(compute(pair, &base_scores, &quote_scores, lookback))
    }

    async fn scores_for(
        &self,
        currency: &str,
        since: chrono::DateTime<Utc>,
    ) -> Result<Vec<f64>, PairError> {
        let events = self.store.events_for_currency(currency, since).await?;
        Ok(events
            .into_iter()
            .filter_map(|e| e.sentiment_score)
            .collect())
    }
}

/// Render a reading the way the CLI prints it.
pub fn format_reading(s: &PairSentiment) -> String {
    format!(
        "{}: {:+.4}  (base {} avg {:+.4} over {} events, quote {} avg {:+.4} over {} events, lookback {}h)  -> {}",
        s.pair,
        s.sentiment,
        s.pair.base,
        s.base_avg,
        s.base_count,
        s.pair.quote,
        s.quote_avg,
        s.quote_count,
        s.lookback.num_hours(),
        s.signal,
    )
}
