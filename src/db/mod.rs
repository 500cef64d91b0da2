//! Database module for netpulse.
//!
//! Provides SQLite storage for the metric time-series and alert history.

mod models;
mod store;

pub use models::*;
pub use store::*;
