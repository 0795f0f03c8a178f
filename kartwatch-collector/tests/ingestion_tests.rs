//! Integration tests for the ingestion pipeline
//!
//! Drives the tick-processing path end to end against an in-memory database:
//! change detection, dedup, session creation and weather attribution.

use chrono::{DateTime, TimeZone, Utc};
use kartwatch_collector::db::{HistoryRepository, InvalidLapBounds};
use kartwatch_collector::models::WeatherData;
use kartwatch_collector::services::collector::{process_payload, CollectorState, TickReport};
use serde_json::json;
use sqlx::SqlitePool;

async fn setup_repo() -> HistoryRepository {
    let pool = kartwatch_common::db::init_memory_pool()
        .await
        .expect("Should create in-memory database");
    HistoryRepository::new(pool, InvalidLapBounds::default())
}

fn payload(session: &str, rows: serde_json::Value) -> Vec<u8> {
    json!({
        "headinfo": { "number": session, "len": "450" },
        "results": rows,
    })
    .to_string()
    .into_bytes()
}

fn snapshot(at: DateTime<Utc>, temp_c: f64, cloud: f64) -> WeatherData {
    WeatherData {
        timestamp_utc: at,
        temp_c,
        is_day: true,
        condition_code: 1000,
        condition_text: "Sunny".to_string(),
        wind_kph: 5.0,
        wind_degree: 90.0,
        pressure_mb: 1013.0,
        precipitation_mm: 0.0,
        humidity: 40.0,
        cloud,
        feels_like_c: temp_c,
        dew_point_c: 8.0,
        id: None,
    }
}

async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn identical_ticks_produce_one_lap_and_one_session() {
    let repo = setup_repo().await;
    let mut state = CollectorState::default();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    let raw = payload("3", json!([["1", "Driver", "7", "5", "x", "x", "1:02.345", "0.5"]]));

    let first = process_payload(&mut state, &raw, now, &repo, 600.0)
        .await
        .unwrap();
    assert_eq!(first, TickReport::Stored { saved: 1, skipped: 0 });

    let second = process_payload(&mut state, &raw, now, &repo, 600.0)
        .await
        .unwrap();
    assert_eq!(second, TickReport::Unchanged);

    assert_eq!(count(repo.pool(), "lap_data").await, 1);
    assert_eq!(count(repo.pool(), "sessions").await, 1);
    assert_eq!(count(repo.pool(), "session_weather").await, 1);

    let time: f64 = sqlx::query_scalar("SELECT laptime FROM lap_data LIMIT 1")
        .fetch_one(repo.pool())
        .await
        .unwrap();
    assert_eq!(time, 62.345);
}

#[tokio::test]
async fn sessions_inherit_the_weather_known_at_their_start() {
    let repo = setup_repo().await;
    let mut state = CollectorState::default();
    let base = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

    // Clear sky, then cloudy half an hour later
    kartwatch_collector::db::weather::store_weather(repo.pool(), &snapshot(base, 22.0, 10.0))
        .await
        .unwrap();
    kartwatch_collector::db::weather::store_weather(
        repo.pool(),
        &snapshot(base + chrono::Duration::minutes(30), 22.0, 80.0),
    )
    .await
    .unwrap();
    assert_eq!(count(repo.pool(), "weather_history").await, 2);

    // Session 1 starts while the sky was still clear
    let raw = payload("1", json!([["1", "Driver", "7", "1", "x", "x", "55.0", null]]));
    process_payload(
        &mut state,
        &raw,
        base + chrono::Duration::minutes(10),
        &repo,
        600.0,
    )
    .await
    .unwrap();

    // Session 2 starts under clouds
    let raw = payload("2", json!([["1", "Driver", "7", "1", "x", "x", "56.0", null]]));
    process_payload(
        &mut state,
        &raw,
        base + chrono::Duration::minutes(40),
        &repo,
        600.0,
    )
    .await
    .unwrap();

    let skies: Vec<(i64,)> = sqlx::query_as("SELECT sky FROM session_weather ORDER BY id")
        .fetch_all(repo.pool())
        .await
        .unwrap();
    // 1 = Clear, 2 = Cloudy
    assert_eq!(skies, vec![(1,), (2,)]);
}

#[tokio::test]
async fn malformed_rows_do_not_block_their_siblings() {
    let repo = setup_repo().await;
    let mut state = CollectorState::default();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    let raw = payload(
        "3",
        json!([
            ["1", "Driver", "7", "5", "x", "x", null, null],
            ["2", "Driver", "8", "bad-lap", "x", "x", "60.0", null],
            ["3", "Driver", "9", "2", "x", "x", "58.5", null],
        ]),
    );

    let report = process_payload(&mut state, &raw, now, &repo, 600.0)
        .await
        .unwrap();
    assert_eq!(report, TickReport::Stored { saved: 1, skipped: 0 });

    let kart: String = sqlx::query_scalar("SELECT kart FROM lap_data LIMIT 1")
        .fetch_one(repo.pool())
        .await
        .unwrap();
    assert_eq!(kart, "9");
}

#[tokio::test]
async fn restart_with_cold_cache_does_not_duplicate_laps() {
    let pool = kartwatch_common::db::init_memory_pool().await.unwrap();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let raw = payload("3", json!([["1", "Driver", "7", "5", "x", "x", "62.0", null]]));

    // First process lifetime
    {
        let repo = HistoryRepository::new(pool.clone(), InvalidLapBounds::default());
        let mut state = CollectorState::default();
        process_payload(&mut state, &raw, now, &repo, 600.0)
            .await
            .unwrap();
    }

    // Restart: fresh repository and collector state, same database
    {
        let repo = HistoryRepository::new(pool.clone(), InvalidLapBounds::default());
        let mut state = CollectorState::default();
        process_payload(&mut state, &raw, now, &repo, 600.0)
            .await
            .unwrap();
    }

    // The upsert keeps the lap row unique even though every cache was cold
    assert_eq!(count(&pool, "lap_data").await, 1);
    assert_eq!(count(&pool, "sessions").await, 1);
}
