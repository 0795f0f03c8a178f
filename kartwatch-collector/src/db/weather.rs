//! Weather history store
//!
//! Snapshots are append-only. The full snapshot is stored as JSON next to a
//! few indexed scalar columns; `last_weather_before` is the lookup used when
//! a session is attributed its weather at creation time.

use crate::models::WeatherData;
use chrono::{DateTime, Utc};
use kartwatch_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Store one weather snapshot, returning its row id.
pub async fn store_weather(pool: &SqlitePool, data: &WeatherData) -> Result<i64> {
    let json_data = serde_json::to_string(data)
        .map_err(|e| Error::Internal(format!("Failed to serialize weather: {}", e)))?;

    let row = sqlx::query(
        r#"
        INSERT INTO weather_history (recorded_at, air_temp, humidity, precipitation, cloud, json_data)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(data.timestamp_utc.to_rfc3339())
    .bind(data.temp_c)
    .bind(data.humidity)
    .bind(data.precipitation_mm)
    .bind(data.cloud)
    .bind(&json_data)
    .fetch_one(pool)
    .await?;

    Ok(row.get::<i64, _>("id"))
}

/// Most recent snapshot recorded strictly before `time`, or None.
///
/// Strictly-before matters: a session created at time T must be attributed
/// conditions known before T, never a snapshot recorded after session start.
pub async fn last_weather_before(
    pool: &SqlitePool,
    time: DateTime<Utc>,
) -> Result<Option<WeatherData>> {
    let row = sqlx::query(
        r#"
        SELECT id, json_data
        FROM weather_history
        WHERE recorded_at < ?
        ORDER BY recorded_at DESC
        LIMIT 1
        "#,
    )
    .bind(time.to_rfc3339())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let json_data: String = row.get("json_data");
            let mut data: WeatherData = serde_json::from_str(&json_data)
                .map_err(|e| Error::Internal(format!("Failed to deserialize weather: {}", e)))?;
            data.id = Some(row.get::<i64, _>("id"));
            Ok(Some(data))
        }
        None => Ok(None),
    }
}
