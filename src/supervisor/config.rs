//! Pipeline configuration

use std::time::Duration;

use crate::transport::{TransportConfig, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_USER_AGENT};

/// Default wait between a failure and the reconnection attempt
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Reconnecting pipeline configuration options
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Target URI (`rtsp://`, `http://` or `https://`)
    pub uri: String,

    /// Wait between a transport failure and the reconnection attempt
    pub reconnect_interval: Duration,

    /// Inactivity window before a transport reports a timeout
    pub connection_timeout: Duration,

    /// Client id sent in tunnel requests
    pub user_agent: String,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Read buffer size per connection
    pub read_buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            tcp_nodelay: true,
            read_buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl PipelineConfig {
    /// Create a config for a target URI
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    /// Set the target URI
    pub fn transport_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// Set the reconnection interval
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the client id used in tunnel requests
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// Set the read buffer size (at least 1KB)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1024);
        self
    }

    /// Settings handed to each transport instance
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connection_timeout: self.connection_timeout,
            user_agent: self.user_agent.clone(),
            tcp_nodelay: self.tcp_nodelay,
            read_buffer_size: self.read_buffer_size,
        }
    }
}
