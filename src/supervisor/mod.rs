//! Transport supervision and reconnection
//!
//! [`RtspPipeline`] keeps an RTSP session alive across network failures by
//! replacing the transport at the head of its pipeline in place.
//! [`PipelineHandle`] drives one from its own task.

pub mod config;
mod handle;
mod reconnect;

use std::fmt;

pub use config::{PipelineConfig, DEFAULT_RECONNECT_INTERVAL};
pub use handle::PipelineHandle;
pub use reconnect::{normalize_session_uri, RtspPipeline};

/// Supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A transport is live
    Connected,
    /// The live transport failed, a reconnection is scheduled
    WaitingToReconnect,
    /// The transport is being replaced
    Reconnecting,
    /// Ended on purpose, no further reconnection
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::WaitingToReconnect => write!(f, "waiting-to-reconnect"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Stopped => write!(f, "stopped"),
        }
    }
}
