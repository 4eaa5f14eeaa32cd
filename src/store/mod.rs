//! Persistence for events and posts on a bounded Postgres pool.
//!
//! Every write goes through a transaction. In dry-run mode one transaction
//! is held open for the whole run — reads and writes both route through it
//! so the run sees its own work — and `rollback_dry_run` discards it all.

mod events;
mod posts;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::DbConfig;
use crate::error::StoreError;
use crate::types::{EconomicEvent, ForumPost};

pub struct Store {
    pool: PgPool,
    dry: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl Store {
    /// Connect the pool and apply migrations.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections())
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.url())
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(
            max_connections = config.max_connections(),
            "Store connected"
        );

        Ok(Self {
            pool,
            dry: Mutex::new(None),
        })
    }

    // ── Dry-run control ──────────────────────────────────────────────────

    /// Switch all subsequent operations onto one transaction that
    /// `rollback_dry_run` will discard.
    pub async fn begin_dry_run(&self) -> Result<(), StoreError> {
        let mut guard = self.dry.lock().await;
        if guard.is_none() {
            *guard = Some(self.pool.begin().await?);
            info!("Dry-run transaction opened; nothing will be committed");
        }
        Ok(())
    }

    pub async fn rollback_dry_run(&self) -> Result<(), StoreError> {
        match self.dry.lock().await.take() {
            Some(tx) => {
                tx.rollback().await?;
                info!("Dry-run transaction rolled back");
                Ok(())
            }
            None => Err(StoreError::NoDryRun),
        }
    }

    // ── Events ───────────────────────────────────────────────────────────

    /// Upsert by (timestamp, event_name, currency). Returns rows written.
    pub async fn upsert_events(&self, items: &[EconomicEvent]) -> Result<u64, StoreError> {
        if items.is_empty() {
            return Ok(0);
        }
        let mut guard = self.dry.lock().await;
        if let Some(tx) = guard.as_mut() {
            return Ok(events::upsert(&mut **tx, items).await?);
        }
        drop(guard);

        let mut tx = self.pool.begin().await?;
        let written = events::upsert(&mut tx, items).await?;
        tx.commit().await?;
        Ok(written)
    }

    pub async fn unscored_events(&self) -> Result<Vec<EconomicEvent>, StoreError> {
        let mut guard = self.dry.lock().await;
        if let Some(tx) = guard.as_mut() {
            return Ok(events::unscored(&mut **tx).await?);
        }
        drop(guard);

        let mut conn = self.pool.acquire().await?;
        Ok(events::unscored(&mut conn).await?)
    }

    /// Single-row score write in its own transaction, so one failure does
    /// not lose earlier progress during an analyze phase.
    pub async fn update_event_score(
        &self,
        id: i64,
        score: f64,
        raw_response: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut guard = self.dry.lock().await;
        if let Some(tx) = guard.as_mut() {
            return Ok(events::update_score(&mut **tx, id, score, raw_response).await?);
        }
        drop(guard);

        let mut tx = self.pool.begin().await?;
        events::update_score(&mut tx, id, score, raw_response).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Scored events for a currency with timestamp >= `since`.
    pub async fn events_for_currency(
        &self,
        currency: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<EconomicEvent>, StoreError> {
        let mut guard = self.dry.lock().await;
        if let Some(tx) = guard.as_mut() {
            return Ok(events::scored_for_currency(&mut **tx, currency, since).await?);
        }
        drop(guard);

        let mut conn = self.pool.acquire().await?;
        Ok(events::scored_for_currency(&mut conn, currency, since).await?)
    }

    pub async fn event_count(&self) -> Result<i64, StoreError> {
        let mut guard = self.dry.lock().await;
        if let Some(tx) = guard.as_mut() {
            return Ok(events::count(&mut **tx).await?);
        }
        drop(guard);

        let mut conn = self.pool.acquire().await?;
        Ok(events::count(&mut conn).await?)
    }

    // ── Posts ────────────────────────────────────────────────────────────

    /// Upsert by external id. Returns rows written.
    pub async fn upsert_posts(&self, items: &[ForumPost]) -> Result<u64, StoreError> {
        if items.is_empty() {
            return Ok(0);
        }
        let mut guard = self.dry.lock().await;
        if let Some(tx) = guard.as_mut() {
            return Ok(posts::upsert(&mut **tx, items).await?);
        }
        drop(guard);

        let mut tx = self.pool.begin().await?;
        let written = posts::upsert(&mut tx, items).await?;
        tx.commit().await?;
        Ok(written)
    }

    pub async fn unscored_posts(&self) -> Result<Vec<ForumPost>, StoreError> {
        let mut guard = self.dry.lock().await;
        if let Some(tx) = guard.as_mut() {
            return Ok(posts::unscored(&mut **tx).await?);
        }
        drop(guard);

        let mut conn = self.pool.acquire().await?;
        Ok(posts::unscored(&mut conn).await?)
    }

    pub async fn update_post_score(
        &self,
        id: i64,
        score: f64,
        symbols: &[String],
        symbol_sentiments: &HashMap<String, f64>,
        raw_response: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut guard = self.dry.lock().await;
        if let Some(tx) = guard.as_mut() {
            return Ok(posts::update_score(
                &mut **tx,
                id,
                score,
                symbols,
                symbol_sentiments,
                raw_response,
            )
            .await?);
        }
        drop(guard);

        let mut tx = self.pool.begin().await?;
        posts::update_score(&mut tx, id, score, symbols, symbol_sentiments, raw_response).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn post_count(&self) -> Result<i64, StoreError> {
        let mut guard = self.dry.lock().await;
        if let Some(tx) = guard.as_mut() {
            return Ok(posts::count(&mut **tx).await?);
        }
        drop(guard);

        let mut conn = self.pool.acquire().await?;
        Ok(posts::count(&mut conn).await?)
    }
}
