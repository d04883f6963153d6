//! Counters kept by the reconnection supervisor

use std::time::Duration;

use tokio::time::Instant;

use crate::transport::Signal;

/// Supervisor-level statistics
#[derive(Debug, Clone)]
pub struct SupervisorStats {
    /// Transport instances constructed, the initial one included
    pub transports_created: u64,
    /// Completed reconnections
    pub reconnects: u64,
    /// Error signals acted on
    pub errors: u64,
    /// Disconnect signals acted on
    pub disconnects: u64,
    /// Timeout signals acted on
    pub timeouts: u64,
    /// Signals from replaced transports that were ignored
    pub stale_signals: u64,
    /// When the last signal was acted on
    pub last_signal_at: Option<Instant>,
    /// When the supervisor was created
    pub started_at: Instant,
}

impl Default for SupervisorStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorStats {
    pub fn new() -> Self {
        Self {
            transports_created: 0,
            reconnects: 0,
            errors: 0,
            disconnects: 0,
            timeouts: 0,
            stale_signals: 0,
            last_signal_at: None,
            started_at: Instant::now(),
        }
    }

    /// Count a signal from the live transport
    pub fn record(&mut self, signal: &Signal) {
        match signal {
            Signal::Error(_) => self.errors += 1,
            Signal::Disconnect => self.disconnects += 1,
            Signal::Timeout => self.timeouts += 1,
        }
        self.last_signal_at = Some(Instant::now());
    }

    /// Total signals acted on
    pub fn signals(&self) -> u64 {
        self.errors + self.disconnects + self.timeouts
    }

    /// Time since the supervisor was created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time since the last signal, if there was one
    pub fn since_last_signal(&self) -> Option<Duration> {
        self.last_signal_at.map(|at| at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_stats_new() {
        let stats = SupervisorStats::new();
        assert_eq!(stats.transports_created, 0);
        assert_eq!(stats.reconnects, 0);
        assert_eq!(stats.signals(), 0);
        assert!(stats.last_signal_at.is_none());
        assert!(stats.since_last_signal().is_none());
    }

    #[test]
    fn test_record_counts_per_kind() {
        let mut stats = SupervisorStats::new();
        stats.record(&Signal::Timeout);
        stats.record(&Signal::Timeout);
        stats.record(&Signal::Disconnect);
        stats.record(&Signal::Error(Error::Timeout(Duration::from_secs(1))));

        assert_eq!(stats.timeouts, 2);
        assert_eq!(stats.disconnects, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.signals(), 4);
        assert!(stats.last_signal_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime_follows_clock() {
        let stats = SupervisorStats::new();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(stats.uptime() >= Duration::from_secs(5));
    }
}
