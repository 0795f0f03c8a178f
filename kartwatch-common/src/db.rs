//! Database pool and schema initialization
//!
//! All kartwatch services share one SQLite database. Tables are created on
//! startup if missing; the schema is additive-only.

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize the database connection pool, creating the file and tables
/// if they do not exist yet.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the kartwatch tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Key/value settings, also used for the collector's resume checkpoint
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ambient weather snapshots, append-only
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weather_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recorded_at TEXT NOT NULL,
            air_temp REAL NOT NULL,
            humidity REAL NOT NULL,
            precipitation REAL NOT NULL,
            cloud REAL NOT NULL,
            json_data TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_weather_history_recorded_at \
         ON weather_history (recorded_at)",
    )
    .execute(pool)
    .await?;

    // Weather attribution frozen onto a session at creation time
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_weather (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recorded_at TEXT NOT NULL,
            weather_history_id INTEGER,
            air_temp REAL,
            humidity REAL,
            precipitation REAL,
            cloud REAL,
            weather INTEGER,
            sky INTEGER,
            wind INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            recorded_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            day INTEGER NOT NULL,
            session INTEGER NOT NULL,
            total_length TEXT NOT NULL,
            weather_id INTEGER NOT NULL,
            track_config TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_day ON sessions (day)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lap_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            kart TEXT NOT NULL,
            lap INTEGER NOT NULL,
            laptime REAL NOT NULL,
            position INTEGER NOT NULL,
            gap TEXT,
            invalid_lap INTEGER NOT NULL DEFAULT 0,
            UNIQUE (session_id, kart, lap)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (settings, weather_history, session_weather, sessions, lap_data)"
    );

    Ok(())
}

/// Open an in-memory database with the full schema, for tests.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePool::connect("sqlite::memory:").await?;
    init_tables(&pool).await?;
    Ok(pool)
}
