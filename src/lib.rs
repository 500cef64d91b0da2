//! netpulse - network health monitoring.
//!
//! Probes a set of hosts on an interval, records latency, packet loss and
//! jitter in SQLite, and raises deduplicated threshold alerts.

pub mod alert;
pub mod config;
pub mod db;
pub mod engine;
pub mod monitor;
pub mod probe;
pub mod web;
