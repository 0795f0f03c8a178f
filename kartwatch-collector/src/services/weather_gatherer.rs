//! Weather polling loop
//!
//! Runs on its own fixed cadence, independent of the telemetry collector.
//! A snapshot is stored only when its conditions differ from the last stored
//! one; the "last stored" reference lives in memory, so after a restart the
//! current conditions are re-stored once. Accepted minor duplication.

use crate::db::weather;
use crate::models::WeatherData;
use crate::services::collector::sleep_or_cancelled;
use crate::services::weather_client::WeatherClient;
use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Whether a freshly fetched snapshot should be stored.
pub fn should_store(last_stored: Option<&WeatherData>, fetched: &WeatherData) -> bool {
    match last_stored {
        Some(last) => !last.same_conditions(fetched),
        None => true,
    }
}

/// The weather polling service.
pub struct WeatherGatherer {
    client: WeatherClient,
    pool: SqlitePool,
    interval: Duration,
    last_stored: Option<WeatherData>,
}

impl WeatherGatherer {
    pub fn new(client: WeatherClient, pool: SqlitePool, interval: Duration) -> Self {
        Self {
            client,
            pool,
            interval,
            last_stored: None,
        }
    }

    /// Run until the cancellation token fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Started gathering weather");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let span = tracing::info_span!("weather_tick", trace_id = %Uuid::new_v4());
            self.tick().instrument(span).await;

            if sleep_or_cancelled(self.interval, &cancel).await {
                break;
            }
        }

        tracing::info!("Stopped gathering weather");
    }

    /// One poll: fetch, compare, store on change. A failed fetch or store is
    /// logged and retried on the next tick.
    async fn tick(&mut self) {
        let data = match self.client.fetch_current(Utc::now()).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Could not get the weather from the weather API: {}", e);
                return;
            }
        };

        if !should_store(self.last_stored.as_ref(), &data) {
            tracing::trace!("Weather unchanged since last stored value, skipping");
            return;
        }

        match weather::store_weather(&self.pool, &data).await {
            Ok(id) => {
                tracing::info!(id, temp_c = data.temp_c, "Stored changed weather snapshot");
                self.last_stored = Some(WeatherData {
                    id: Some(id),
                    ..data
                });
            }
            Err(e) => {
                tracing::error!("Failed to store the weather: {}", e);
            }
        }
    }
}
