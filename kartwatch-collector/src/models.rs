//! Domain types for the karting telemetry collector

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One timed lap by one kart in one session, as parsed from the live-timing
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LapEntry {
    pub recorded_at: DateTime<Utc>,
    /// Session number, scoped to a calendar day
    pub session: i32,
    /// Track length/category as reported by the timing source
    pub total_length: String,
    pub kart: String,
    pub lap: i32,
    /// Lap time in decimal seconds
    pub time: f64,
    pub position: i32,
    /// Opaque upstream gap value; format varies, treated as a string
    pub gap: Option<String>,
}

impl LapEntry {
    /// Session identity: `<day_number>-<session>`
    pub fn session_id(&self) -> String {
        format!("{}-{}", day_number(self.recorded_at.date_naive()), self.session)
    }

    /// Deduplication key for the ingestion cache
    pub fn lap_key(&self) -> LapKey {
        LapKey {
            day: day_number(self.recorded_at.date_naive()),
            session: self.session,
            kart: self.kart.clone(),
            lap: self.lap,
        }
    }
}

/// Key identifying one lap across ticks: (day, session, kart, lap)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LapKey {
    pub day: i32,
    pub session: i32,
    pub kart: String,
    pub lap: i32,
}

/// Days since 0001-01-01 (zero-based), the day numbering used in session ids.
pub fn day_number(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - 1
}

/// A point-in-time ambient weather reading.
///
/// Stored verbatim as JSON alongside a few indexed scalar columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherData {
    pub timestamp_utc: DateTime<Utc>,
    pub temp_c: f64,
    pub is_day: bool,
    pub condition_code: i32,
    pub condition_text: String,
    pub wind_kph: f64,
    pub wind_degree: f64,
    pub pressure_mb: f64,
    pub precipitation_mm: f64,
    pub humidity: f64,
    pub cloud: f64,
    pub feels_like_c: f64,
    pub dew_point_c: f64,
    /// Database identifier, set after the row is stored
    #[serde(default)]
    pub id: Option<i64>,
}

impl WeatherData {
    /// Value equality for change detection: every field except the timestamp
    /// (and the database id) must match.
    pub fn same_conditions(&self, other: &WeatherData) -> bool {
        self.temp_c == other.temp_c
            && self.is_day == other.is_day
            && self.condition_code == other.condition_code
            && self.condition_text == other.condition_text
            && self.wind_kph == other.wind_kph
            && self.wind_degree == other.wind_degree
            && self.pressure_mb == other.pressure_mb
            && self.precipitation_mm == other.precipitation_mm
            && self.humidity == other.humidity
            && self.cloud == other.cloud
            && self.feels_like_c == other.feels_like_c
            && self.dew_point_c == other.dew_point_c
    }
}

/// Precipitation class frozen onto a session at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecipitationClass {
    Dry = 1,
    Damp = 2,
    Wet = 3,
    ExtraWet = 4,
}

impl PrecipitationClass {
    pub fn from_precipitation_mm(mm: f64) -> Self {
        if mm == 0.0 {
            Self::Dry
        } else if mm < 1.0 {
            Self::Damp
        } else if mm < 5.0 {
            Self::Wet
        } else {
            Self::ExtraWet
        }
    }
}

/// Sky class frozen onto a session at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkyClass {
    Clear = 1,
    Cloudy = 2,
    Overcast = 3,
}

impl SkyClass {
    pub fn from_cloud_percent(cloud: f64) -> Self {
        if cloud < 15.0 {
            Self::Clear
        } else if cloud < 70.0 {
            Self::Cloudy
        } else {
            Self::Overcast
        }
    }
}

/// Wind class frozen onto a session at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindClass {
    NoWind = 1,
    Windy = 2,
}

impl WindClass {
    pub fn from_wind_kph(kph: f64) -> Self {
        if kph < 10.0 {
            Self::NoWind
        } else {
            Self::Windy
        }
    }
}

/// Session summary returned by the read-side repository path
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub name: String,
    pub recorded_at: DateTime<Utc>,
    pub air_temp: Option<f64>,
}

/// One stored lap as returned by the read-side repository path
#[derive(Debug, Clone, Serialize)]
pub struct KartDrive {
    pub lap_id: i64,
    pub kart: String,
    pub lap: i32,
    pub time: f64,
    pub invalid_lap: bool,
}
