//! SQL for the economic_events table.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::types::{EconomicEvent, Impact, clamp_score};

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: i64,
    timestamp: DateTime<Utc>,
    currency: String,
    event_name: String,
    impact: String,
    actual: Option<String>,
    forecast: Option<String>,
    previous: Option<String>,
    tentative: bool,
    sentiment_score: Option<f64>,
    raw_response: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EventRow> for EconomicEvent {
    fn from(row: EventRow) -> Self {
        EconomicEvent {
            id: Some(row.id),
            timestamp: row.timestamp,
            currency: row.currency,
            name: row.event_name,
            impact: Impact::from_str_lossy(&row.impact),
            actual: row.actual,
            forecast: row.forecast,
            previous: row.previous,
            tentative: row.tentative,
            sentiment_score: row.sentiment_score,
            raw_response: row.raw_response,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        }
    }
}

const COLUMNS: &str = "id, timestamp, currency, event_name, impact, actual, forecast, previous, \
                       tentative, sentiment_score, raw_response, created_at, updated_at";

/// Insert-or-update by natural key. Scraped attributes win; analysis
/// columns are left alone so a re-scrape never clears a score.
pub async fn upsert(conn: &mut PgConnection, events: &[EconomicEvent]) -> Result<u64, sqlx::Error> {
    let mut written = 0u64;
    for event in events {
        let result = sqlx::query(
            r#"
            INSERT INTO economic_events
                (timestamp, currency, event_name, impact, actual, forecast, previous, tentative)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (timestamp, event_name, currency) DO UPDATE SET
                impact     = EXCLUDED.impact,
                actual     = EXCLUDED.actual,
                forecast   = EXCLUDED.forecast,
                previous   = EXCLUDED.previous,
                tentative  = EXCLUDED.tentative,
                updated_at = now()
            "#,
        )
        .bind(event.timestamp)
        .bind(&event.currency)
        .bind(&event.name)
        .bind(event.impact.as_str())
        .bind(&event.actual)
        .bind(&event.forecast)
        .bind(&event.previous)
        .bind(event.tentative)
        .execute(&mut *conn)
        .await?;
        written += result.rows_affected();
    }
    Ok(written)
}

/// Events awaiting a score: a released value exists and the row is not a
/// bank holiday.
pub async fn unscored(conn: &mut PgConnection) -> Result<Vec<EconomicEvent>, sqlx::Error> {
    let rows: Vec<EventRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM economic_events \
         WHERE sentiment_score IS NULL AND actual IS NOT NULL AND impact <> 'holiday' \
         ORDER BY timestamp"
    ))
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn update_score(
    conn: &mut PgConnection,
    id: i64,
    score: f64,
    raw_response: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE economic_events \
         SET sentiment_score = $2, raw_response = $3, updated_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(clamp_score(score))
    .bind(raw_response)
    .execute(conn)
    .await?;
    Ok(())
}

/// Scored events for one currency since `since`, oldest first.
pub async fn scored_for_currency(
    conn: &mut PgConnection,
    currency: &str,
    since: DateTime<Utc>,
) -> Result<Vec<EconomicEvent>, sqlx::Error> {
    let rows: Vec<EventRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM economic_events \
         WHERE currency = $1 AND timestamp >= $2 AND sentiment_score IS NOT NULL \
         ORDER BY timestamp"
    ))
    .bind(currency)
    .bind(since)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn count(conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM economic_events")
        .fetch_one(conn)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_row_conversion() {
        let row = EventRow {
            id: 7,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 7, 12, 30, 0).unwrap(),
            currency: "USD".into(),
            event_name: "Non-Farm Payrolls".into(),
            impact: "high".into(),
            actual: Some("272K".into()),
            forecast: Some("180K".into()),
            previous: Some("165K".into()),
            tentative: false,
            sentiment_score: Some(0.8),
            raw_response: Some(serde_json::json!({"score": 0.8})),
            created_at: Utc.with_ymd_and_hms(2024, 6, 7, 13, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 6, 7, 14, 0, 0).unwrap(),
        };
        let event: EconomicEvent = row.into();
        assert_eq!(event.id, Some(7));
        assert_eq!(event.impact, Impact::High);
        assert_eq!(event.sentiment_score, Some(0.8));
        assert!(event.updated_at >= event.created_at);
    }

    #[test]
    fn test_legacy_impact_tokens_normalize() {
        let row = EventRow {
            id: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            currency: "EUR".into(),
            event_name: "X".into(),
            impact: "Medium".into(),
            actual: None,
            forecast: None,
            previous: None,
            tentative: false,
            sentiment_score: None,
            raw_response: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let event: EconomicEvent = row.into();
        assert_eq!(event.impact, Impact::Medium);
    }
}
