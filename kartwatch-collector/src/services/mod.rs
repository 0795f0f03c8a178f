//! Collector services

pub mod collector;
pub mod parser;
pub mod timing_client;
pub mod weather_client;
pub mod weather_gatherer;

pub use collector::{Collector, CollectorSettings, CollectorState};
pub use timing_client::TimingClient;
pub use weather_client::WeatherClient;
pub use weather_gatherer::WeatherGatherer;
