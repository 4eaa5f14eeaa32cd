//! SQL for the forum_posts table.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use sqlx::types::Json;
use std::collections::HashMap;

use crate::types::{ForumPost, clamp_score};

#[derive(Debug, sqlx::FromRow)]
struct PostRow {
    id: i64,
    external_id: String,
    channel: String,
    title: String,
    body: Option<String>,
    url: Option<String>,
    score: i32,
    num_comments: i32,
    flair: Option<String>,
    timestamp: DateTime<Utc>,
    fetched_at: DateTime<Utc>,
    symbols: Vec<String>,
    symbol_sentiments: Json<HashMap<String, f64>>,
    sentiment_score: Option<f64>,
    raw_response: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PostRow> for ForumPost {
    fn from(row: PostRow) -> Self {
        ForumPost {
            id: Some(row.id),
            external_id: row.external_id,
            channel: row.channel,
            title: row.title,
            body: row.body,
            url: row.url,
            score: row.score,
            num_comments: row.num_comments,
            flair: row.flair,
            timestamp: row.timestamp,
            fetched_at: row.fetched_at,
            symbols: row.symbols,
            symbol_sentiments: row.symbol_sentiments.0,
            sentiment_score: row.sentiment_score,
            raw_response: row.raw_response,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        }
    }
}

const COLUMNS: &str = "id, external_id, channel, title, body, url, score, num_comments, flair, \
                       timestamp, fetched_at, symbols, symbol_sentiments, sentiment_score, \
                       raw_response, created_at, updated_at";

/// Insert-or-update by external id. Source attributes win; analysis
/// columns survive a refetch.
pub async fn upsert(conn: &mut PgConnection, posts: &[ForumPost]) -> Result<u64, sqlx::Error> {
    let mut written = 0u64;
    for post in posts {
        let result = sqlx::query(
            r#"
            INSERT INTO forum_posts
                (external_id, channel, title, body, url, score, num_comments, flair,
                 timestamp, fetched_at, symbols, symbol_sentiments)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (external_id) DO UPDATE SET
                channel      = EXCLUDED.channel,
                title        = EXCLUDED.title,
                body         = EXCLUDED.body,
                url          = EXCLUDED.url,
                score        = EXCLUDED.score,
                num_comments = EXCLUDED.num_comments,
                flair        = EXCLUDED.flair,
                timestamp    = EXCLUDED.timestamp,
                fetched_at   = EXCLUDED.fetched_at,
                updated_at   = now()
            "#,
        )
        .bind(&post.external_id)
        .bind(&post.channel)
        .bind(&post.title)
        .bind(&post.body)
        .bind(&post.url)
        .bind(post.score)
        .bind(post.num_comments)
        .bind(&post.flair)
        .bind(post.timestamp)
        .bind(post.fetched_at)
        .bind(&post.symbols)
        .bind(Json(&post.symbol_sentiments))
        .execute(&mut *conn)
        .await?;
        written += result.rows_affected();
    }
    Ok(written)
}

pub async fn unscored(conn: &mut PgConnection) -> Result<Vec<ForumPost>, sqlx::Error> {
    let rows: Vec<PostRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM forum_posts \
         WHERE sentiment_score IS NULL \
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
    symbols: &[String],
    symbol_sentiments: &HashMap<String, f64>,
    raw_response: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE forum_posts \
         SET sentiment_score = $2, symbols = $3, symbol_sentiments = $4, \
             raw_response = $5, updated_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(clamp_score(score))
    .bind(symbols)
    .bind(Json(symbol_sentiments))
    .bind(raw_response)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn count(conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM forum_posts")
        .fetch_one(conn)
        .await
}
