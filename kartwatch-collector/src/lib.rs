//! kartwatch-collector library interface
//!
//! Exposes the ingestion pipeline and repository paths for integration
//! testing and for the read-side query service.

pub mod db;
pub mod models;
pub mod services;

pub use db::{HistoryRepository, InvalidLapBounds};
pub use services::{Collector, CollectorSettings, WeatherGatherer};
