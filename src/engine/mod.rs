//! Measurement and analysis engines.
//!
//! The latency and packet loss engines turn probe reports into numbers; the
//! trend analyzer keeps a per-target history of those numbers.

mod latency;
mod packet_loss;
pub mod stats;
mod trend;

pub use latency::*;
pub use packet_loss::*;
pub use trend::*;
