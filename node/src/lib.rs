//! Bandwidth recorder daemon: live capture, aggregation workers and the
//! scrape endpoint around the `bandwidth_core` counters.

pub mod capture;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod worker;

pub use crate::config::{ConfigOverrides, RecorderConfig};
pub use crate::metrics::RecorderMetrics;
pub use crate::worker::WorkerError;
