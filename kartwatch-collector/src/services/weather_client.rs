//! Weather API client
//!
//! Fetches current ambient conditions from WeatherAPI. The API key is passed
//! as a query parameter; a failed fetch is reported to the poller, which
//! simply waits for its next tick.

use crate::models::WeatherData;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Weather client errors
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Weather API returned status {0}")]
    Status(u16),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Deserialize)]
struct RawWeather {
    current: RawCurrent,
}

#[derive(Debug, Deserialize)]
struct RawCurrent {
    temp_c: f64,
    is_day: i32,
    condition: RawCondition,
    wind_kph: f64,
    wind_degree: f64,
    pressure_mb: f64,
    precip_mm: f64,
    humidity: f64,
    cloud: f64,
    feelslike_c: f64,
    dewpoint_c: f64,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    code: i32,
    text: String,
}

/// Client for the upstream weather endpoint
pub struct WeatherClient {
    http_client: reqwest::Client,
    url: String,
    api_key: String,
    location: String,
}

impl WeatherClient {
    pub fn new(
        url: String,
        api_key: String,
        location: String,
        timeout: Duration,
    ) -> Result<Self, WeatherError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WeatherError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            url,
            api_key,
            location,
        })
    }

    /// Fetch current conditions, timestamped with `now`.
    pub async fn fetch_current(&self, now: DateTime<Utc>) -> Result<WeatherData, WeatherError> {
        tracing::debug!(location = %self.location, "Fetching current weather");

        let response = self
            .http_client
            .get(&self.url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", self.location.as_str()),
                ("aqi", "no"),
            ])
            .send()
            .await
            .map_err(|e| WeatherError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::Status(status.as_u16()));
        }

        let raw: RawWeather = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        Ok(raw_to_data(raw, now))
    }
}

fn raw_to_data(raw: RawWeather, now: DateTime<Utc>) -> WeatherData {
    WeatherData {
        timestamp_utc: now,
        temp_c: raw.current.temp_c,
        is_day: raw.current.is_day == 1,
        condition_code: raw.current.condition.code,
        condition_text: raw.current.condition.text,
        wind_kph: raw.current.wind_kph,
        wind_degree: raw.current.wind_degree,
        pressure_mb: raw.current.pressure_mb,
        precipitation_mm: raw.current.precip_mm,
        humidity: raw.current.humidity,
        cloud: raw.current.cloud,
        feels_like_c: raw.current.feelslike_c,
        dew_point_c: raw.current.dewpoint_c,
        id: None,
    }
}
