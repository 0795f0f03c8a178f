//! Database access for the collector
//!
//! Pool and schema initialization live in `kartwatch_common::db`; this module
//! owns the collector's queries.

pub mod checkpoint;
pub mod history;
pub mod weather;

pub use history::{HistoryRepository, InvalidLapBounds};
