//! # Kartwatch Common Library
//!
//! Shared code for the kartwatch services:
//! - Error types
//! - Configuration loading
//! - Database pool and schema initialization

pub mod config;
pub mod db;
pub mod error;

pub use config::Config;
pub use error::{Error, Result};
