//! Reconnection statistics

mod metrics;

pub use metrics::SupervisorStats;
