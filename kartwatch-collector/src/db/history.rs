//! Session and lap persistence
//!
//! [`HistoryRepository`] owns the write paths used by the collector loop and
//! the read paths consumed by the query API. All writes are idempotent
//! upserts keyed by the natural key, so a cold in-memory cache (e.g. after a
//! restart) never produces duplicate rows.

use crate::db::weather;
use crate::models::{
    KartDrive, LapEntry, PrecipitationClass, SessionInfo, SkyClass, WindClass,
};
use chrono::{DateTime, NaiveDate, Utc};
use kartwatch_common::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tokio::sync::Mutex;

/// Lap times at or outside these bounds are flagged invalid (but stored).
#[derive(Debug, Clone, Copy)]
pub struct InvalidLapBounds {
    pub below_secs: f64,
    pub above_secs: f64,
}

impl InvalidLapBounds {
    pub fn is_invalid(&self, time: f64) -> bool {
        time <= self.below_secs || time >= self.above_secs
    }
}

impl Default for InvalidLapBounds {
    fn default() -> Self {
        Self {
            below_secs: 20.0,
            above_secs: 90.0,
        }
    }
}

/// Repository for sessions and lap data.
///
/// Session creation is serialized through one mutex: concurrent first
/// arrivals for the same session id result in exactly one created session
/// row and one weather attribution.
pub struct HistoryRepository {
    pool: SqlitePool,
    bounds: InvalidLapBounds,
    created_sessions: Mutex<HashSet<String>>,
}

impl HistoryRepository {
    pub fn new(pool: SqlitePool, bounds: InvalidLapBounds) -> Self {
        Self {
            pool,
            bounds,
            created_sessions: Mutex::new(HashSet::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upsert one lap, creating its session first if this is the first lap
    /// observed for that session identity within the process lifetime.
    pub async fn save_lap(&self, day: NaiveDate, entry: &LapEntry) -> Result<()> {
        let session_id = entry.session_id();
        tracing::debug!(
            session_id = %session_id,
            kart = %entry.kart,
            lap = entry.lap,
            "Saving lap data"
        );

        self.create_or_get_session(day, entry).await?;

        sqlx::query(
            r#"
            INSERT INTO lap_data (session_id, recorded_at, kart, lap, laptime, position, gap, invalid_lap)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (session_id, kart, lap) DO UPDATE SET
                laptime = excluded.laptime,
                position = excluded.position,
                gap = excluded.gap,
                recorded_at = excluded.recorded_at,
                invalid_lap = excluded.invalid_lap
            "#,
        )
        .bind(&session_id)
        .bind(entry.recorded_at.to_rfc3339())
        .bind(&entry.kart)
        .bind(entry.lap)
        .bind(entry.time)
        .bind(entry.position)
        .bind(&entry.gap)
        .bind(self.bounds.is_invalid(entry.time))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create the session row and its weather attribution, once per session
    /// identity. Later calls for the same id only refresh `updated_at` (via
    /// the upsert) and are skipped entirely after the first success.
    ///
    /// A failure leaves the in-memory marker unset so the next tick retries.
    pub async fn create_or_get_session(&self, day: NaiveDate, entry: &LapEntry) -> Result<()> {
        let session_id = entry.session_id();

        let mut created = self.created_sessions.lock().await;
        if created.contains(&session_id) {
            return Ok(());
        }

        tracing::info!(session_id = %session_id, "Creating session");

        let weather = weather::last_weather_before(&self.pool, entry.recorded_at).await?;

        let mut tx = self.pool.begin().await?;

        // TODO: After a restart mid-session this attributes a second weather
        // row to an existing session instead of reusing its first one.
        let weather_id: i64 = {
            let row = sqlx::query(
                r#"
                INSERT INTO session_weather (recorded_at, weather_history_id, air_temp, humidity,
                                             precipitation, cloud, weather, sky, wind)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(entry.recorded_at.to_rfc3339())
            .bind(weather.as_ref().and_then(|w| w.id))
            .bind(weather.as_ref().map(|w| w.temp_c))
            .bind(weather.as_ref().map(|w| w.humidity))
            .bind(weather.as_ref().map(|w| w.precipitation_mm))
            .bind(weather.as_ref().map(|w| w.cloud))
            .bind(
                weather
                    .as_ref()
                    .map(|w| PrecipitationClass::from_precipitation_mm(w.precipitation_mm) as i64),
            )
            .bind(weather.as_ref().map(|w| SkyClass::from_cloud_percent(w.cloud) as i64))
            .bind(weather.as_ref().map(|w| WindClass::from_wind_kph(w.wind_kph) as i64))
            .fetch_one(&mut *tx)
            .await?;
            row.get("id")
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (id, recorded_at, updated_at, day, session, total_length, weather_id, track_config)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
            ON CONFLICT (id) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(&session_id)
        .bind(entry.recorded_at.to_rfc3339())
        .bind(entry.recorded_at.to_rfc3339())
        .bind(crate::models::day_number(day))
        .bind(entry.session)
        .bind(&entry.total_length)
        .bind(weather_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        created.insert(session_id);
        Ok(())
    }

    /// Session summaries for one calendar day, newest first.
    pub async fn get_session_infos_for_day(&self, day: NaiveDate) -> Result<Vec<SessionInfo>> {
        tracing::debug!(day = %day, "Getting session infos for day");

        let rows = sqlx::query(
            r#"
            SELECT s.id, COALESCE(s.updated_at, s.recorded_at) AS recorded_at, s.session,
                   COALESCE(w.air_temp, wh.air_temp) AS air_temp
            FROM sessions s
            JOIN session_weather w ON s.weather_id = w.id
            LEFT JOIN weather_history wh ON w.weather_history_id = wh.id
            WHERE s.day = ?
            ORDER BY s.recorded_at DESC
            "#,
        )
        .bind(crate::models::day_number(day))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let session: i32 = row.get("session");
                Ok(SessionInfo {
                    session_id: row.get("id"),
                    name: format!("Session {}", session),
                    recorded_at: parse_timestamp(row.get("recorded_at"))?,
                    air_temp: row.get("air_temp"),
                })
            })
            .collect()
    }

    /// All stored laps for one session.
    pub async fn get_history_for_session(&self, session_id: &str) -> Result<Vec<KartDrive>> {
        tracing::debug!(session_id = %session_id, "Getting history for session");

        let rows = sqlx::query(
            r#"
            SELECT id, kart, lap, laptime, invalid_lap
            FROM lap_data
            WHERE session_id = ?
            ORDER BY kart, lap
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| KartDrive {
                lap_id: row.get("id"),
                kart: row.get("kart"),
                lap: row.get("lap"),
                time: row.get("laptime"),
                invalid_lap: row.get("invalid_lap"),
            })
            .collect())
    }

    /// Explicit validity toggle, the only post-creation mutation of a lap.
    pub async fn update_lap_validity(&self, lap_id: i64, is_invalid: bool) -> Result<()> {
        sqlx::query("UPDATE lap_data SET invalid_lap = ? WHERE id = ?")
            .bind(is_invalid)
            .bind(lap_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Total number of laps ever recorded.
    pub async fn total_laps_driven(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lap_data")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Timestamp of the earliest recorded lap, or None on an empty store.
    pub async fn first_recorded_time(&self) -> Result<Option<DateTime<Utc>>> {
        let recorded_at: Option<String> = sqlx::query_scalar(
            "SELECT recorded_at FROM lap_data ORDER BY recorded_at LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        recorded_at.map(parse_timestamp).transpose()
    }
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            kartwatch_common::Error::Internal(format!("Failed to parse timestamp: {}", e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::weather::store_weather;
    use crate::models::WeatherData;
    use chrono::TimeZone;
    use kartwatch_common::db::init_memory_pool;
    use std::sync::Arc;

    fn entry(at: DateTime<Utc>, session: i32, kart: &str, lap: i32, time: f64) -> LapEntry {
        LapEntry {
            recorded_at: at,
            session,
            total_length: "450".to_string(),
            kart: kart.to_string(),
            lap,
            time,
            position: 1,
            gap: None,
        }
    }

    fn snapshot(at: DateTime<Utc>, cloud: f64) -> WeatherData {
        WeatherData {
            timestamp_utc: at,
            temp_c: 22.0,
            is_day: true,
            condition_code: 1000,
            condition_text: "Sunny".to_string(),
            wind_kph: 5.0,
            wind_degree: 90.0,
            pressure_mb: 1013.0,
            precipitation_mm: 0.0,
            humidity: 40.0,
            cloud,
            feels_like_c: 22.0,
            dew_point_c: 8.0,
            id: None,
        }
    }

    async fn repo() -> HistoryRepository {
        let pool = init_memory_pool().await.unwrap();
        HistoryRepository::new(pool, InvalidLapBounds::default())
    }

    #[tokio::test]
    async fn lap_upsert_is_idempotent() {
        let repo = repo().await;
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let day = at.date_naive();

        let e = entry(at, 3, "7", 5, 62.345);
        repo.save_lap(day, &e).await.unwrap();
        repo.save_lap(day, &e).await.unwrap();

        assert_eq!(repo.total_laps_driven().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn repeated_write_updates_time_and_position() {
        let repo = repo().await;
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let day = at.date_naive();

        repo.save_lap(day, &entry(at, 3, "7", 5, 62.345)).await.unwrap();

        let mut updated = entry(at, 3, "7", 5, 61.001);
        updated.position = 2;
        repo.save_lap(day, &updated).await.unwrap();

        let laps = repo
            .get_history_for_session(&updated.session_id())
            .await
            .unwrap();
        assert_eq!(laps.len(), 1);
        assert_eq!(laps[0].time, 61.001);
    }

    #[tokio::test]
    async fn invalid_lap_flag_is_stored_not_filtered() {
        let repo = repo().await;
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let day = at.date_naive();

        repo.save_lap(day, &entry(at, 3, "7", 1, 15.0)).await.unwrap();
        repo.save_lap(day, &entry(at, 3, "7", 2, 62.0)).await.unwrap();
        repo.save_lap(day, &entry(at, 3, "7", 3, 95.0)).await.unwrap();

        let laps = repo
            .get_history_for_session(&entry(at, 3, "7", 1, 15.0).session_id())
            .await
            .unwrap();
        assert_eq!(laps.len(), 3);
        assert!(laps[0].invalid_lap);
        assert!(!laps[1].invalid_lap);
        assert!(laps[2].invalid_lap);
    }

    #[tokio::test]
    async fn validity_toggle_round_trips() {
        let repo = repo().await;
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let day = at.date_naive();
        let e = entry(at, 3, "7", 5, 62.0);

        repo.save_lap(day, &e).await.unwrap();
        let laps = repo.get_history_for_session(&e.session_id()).await.unwrap();
        assert!(!laps[0].invalid_lap);

        repo.update_lap_validity(laps[0].lap_id, true).await.unwrap();
        let laps = repo.get_history_for_session(&e.session_id()).await.unwrap();
        assert!(laps[0].invalid_lap);
    }

    #[tokio::test]
    async fn session_creation_is_idempotent_under_concurrency() {
        let repo = Arc::new(repo().await);
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let day = at.date_naive();

        let mut handles = Vec::new();
        for kart in 0..8 {
            let repo = Arc::clone(&repo);
            let e = entry(at, 3, &kart.to_string(), 1, 60.0);
            handles.push(tokio::spawn(async move {
                repo.create_or_get_session(day, &e).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(repo.pool())
            .await
            .unwrap();
        let attributions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM session_weather")
            .fetch_one(repo.pool())
            .await
            .unwrap();

        assert_eq!(sessions, 1);
        assert_eq!(attributions, 1);
    }

    #[tokio::test]
    async fn session_gets_weather_known_before_first_lap() {
        let repo = repo().await;
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let day = at.date_naive();

        // Clear sky before the session, overcast after it started
        store_weather(repo.pool(), &snapshot(at - chrono::Duration::minutes(5), 10.0))
            .await
            .unwrap();
        store_weather(repo.pool(), &snapshot(at + chrono::Duration::minutes(5), 90.0))
            .await
            .unwrap();

        let e = entry(at, 3, "7", 1, 60.0);
        repo.create_or_get_session(day, &e).await.unwrap();

        let (cloud, sky): (f64, i64) =
            sqlx::query_as("SELECT cloud, sky FROM session_weather LIMIT 1")
                .fetch_one(repo.pool())
                .await
                .unwrap();
        assert_eq!(cloud, 10.0);
        assert_eq!(sky, SkyClass::Clear as i64);
    }

    #[tokio::test]
    async fn session_without_weather_history_still_created() {
        let repo = repo().await;
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let day = at.date_naive();

        let e = entry(at, 3, "7", 1, 60.0);
        repo.save_lap(day, &e).await.unwrap();

        let infos = repo.get_session_infos_for_day(day).await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].session_id, e.session_id());
        assert_eq!(infos[0].name, "Session 3");
        assert_eq!(infos[0].air_temp, None);
    }

    #[tokio::test]
    async fn sessions_listed_per_day_only() {
        let repo = repo().await;
        let day1 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 6, 2, 12, 0, 0).unwrap();

        repo.save_lap(day1.date_naive(), &entry(day1, 1, "7", 1, 60.0))
            .await
            .unwrap();
        repo.save_lap(day2.date_naive(), &entry(day2, 1, "7", 1, 60.0))
            .await
            .unwrap();

        let infos = repo.get_session_infos_for_day(day1.date_naive()).await.unwrap();
        assert_eq!(infos.len(), 1);
    }

    #[tokio::test]
    async fn first_recorded_time_on_empty_store() {
        let repo = repo().await;
        assert!(repo.first_recorded_time().await.unwrap().is_none());
        assert_eq!(repo.total_laps_driven().await.unwrap(), 0);
    }
}
