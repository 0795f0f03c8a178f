//! Collector resume checkpoint
//!
//! The collector persists its scrape state after each accepted tick so a
//! restart resumes where it left off instead of re-detecting the day state
//! from scratch. Stored as one value in the `settings` table; a missing or
//! unreadable checkpoint just means a cold start.

use chrono::{DateTime, Utc};
use kartwatch_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

const RESUME_STATE_KEY: &str = "collector_resume_state";

/// Scrape state surviving process restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    pub previous_fingerprint: Option<String>,
    pub last_telemetry_at: Option<DateTime<Utc>>,
    pub day_ended: bool,
    pub last_session: Option<i32>,
}

/// Load the checkpoint, or None on a cold start.
pub async fn load_resume_state(pool: &SqlitePool) -> Result<Option<ResumeState>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(RESUME_STATE_KEY)
            .fetch_optional(pool)
            .await?;

    match value {
        Some(value) => match serde_json::from_str(&value) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                // An unreadable checkpoint (e.g. written by an older build)
                // is discarded rather than blocking startup.
                tracing::warn!("Discarding unreadable resume checkpoint: {}", e);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Persist the checkpoint, replacing any previous value.
pub async fn save_resume_state(pool: &SqlitePool, state: &ResumeState) -> Result<()> {
    let value = serde_json::to_string(state)
        .map_err(|e| Error::Internal(format!("Failed to serialize resume state: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT (key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(RESUME_STATE_KEY)
    .bind(&value)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kartwatch_common::db::init_memory_pool;

    #[tokio::test]
    async fn cold_start_returns_none() {
        let pool = init_memory_pool().await.unwrap();
        assert!(load_resume_state(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let pool = init_memory_pool().await.unwrap();
        let state = ResumeState {
            previous_fingerprint: Some("abc123".to_string()),
            last_telemetry_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
            day_ended: true,
            last_session: Some(4),
        };

        save_resume_state(&pool, &state).await.unwrap();
        let loaded = load_resume_state(&pool).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn save_overwrites_previous_checkpoint() {
        let pool = init_memory_pool().await.unwrap();

        save_resume_state(&pool, &ResumeState::default()).await.unwrap();
        let updated = ResumeState {
            last_session: Some(2),
            ..ResumeState::default()
        };
        save_resume_state(&pool, &updated).await.unwrap();

        let loaded = load_resume_state(&pool).await.unwrap().unwrap();
        assert_eq!(loaded.last_session, Some(2));

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn unreadable_checkpoint_is_discarded() {
        let pool = init_memory_pool().await.unwrap();
        sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
            .bind(RESUME_STATE_KEY)
            .bind("not json")
            .execute(&pool)
            .await
            .unwrap();

        assert!(load_resume_state(&pool).await.unwrap().is_none());
    }
}
