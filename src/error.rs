//! Error types
//!
//! Transport failures never escape to the application as faults: they are
//! turned into [`Signal`](crate::transport::Signal)s that the supervisor
//! reacts to. The only error a caller sees directly is a configuration error
//! when building a pipeline.

use std::fmt;
use std::time::Duration;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Underlying socket error (read or write on an established connection)
    Io(std::io::Error),

    /// Socket or TLS connect failure
    ConnectionRefused {
        /// `host:port` that was dialled
        addr: String,
        source: std::io::Error,
    },

    /// No data arrived within the configured window
    Timeout(Duration),

    /// Malformed tunnel handshake or first command
    Tunnel(TunnelError),

    /// Invalid pipeline configuration
    Config(ConfigError),

    /// TLS setup failure (bad server name)
    Tls(String),
}

impl Error {
    /// Build a connection refused error for an endpoint
    pub fn refused(host: &str, port: u16, source: std::io::Error) -> Self {
        Error::ConnectionRefused {
            addr: format!("{}:{}", host, port),
            source,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::ConnectionRefused { addr, source } => {
                write!(f, "connection to {} refused: {}", addr, source)
            }
            Error::Timeout(after) => write!(f, "no data received for {:?}", after),
            Error::Tunnel(e) => write!(f, "tunnel protocol error: {}", e),
            Error::Config(e) => write!(f, "configuration error: {}", e),
            Error::Tls(msg) => write!(f, "TLS error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::ConnectionRefused { source, .. } => Some(source),
            Error::Tunnel(e) => Some(e),
            Error::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<TunnelError> for Error {
    fn from(e: TunnelError) -> Self {
        Error::Tunnel(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

/// Errors while deriving a tunnel (or TCP) endpoint and handshaking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelError {
    /// First command did not look like `METHOD url VERSION`
    InvalidRequestLine,
    /// Request URL could not be parsed
    InvalidUrl(String),
    /// Request URL has no hostname
    MissingHost,
    /// The server answered the GET handshake with a non-2xx status
    Rejected(u16),
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelError::InvalidRequestLine => write!(f, "invalid request line"),
            TunnelError::InvalidUrl(url) => write!(f, "invalid request url: {}", url),
            TunnelError::MissingHost => write!(f, "request url has no hostname"),
            TunnelError::Rejected(status) => write!(f, "handshake rejected with status {}", status),
        }
    }
}

impl std::error::Error for TunnelError {}

/// Configuration errors, fatal at construction time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Transport URI could not be parsed
    InvalidUri(String),
    /// No transport exists for this URI scheme
    UnsupportedScheme(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidUri(uri) => write!(f, "invalid transport uri: {}", uri),
            ConfigError::UnsupportedScheme(scheme) => {
                write!(f, "no transport implementation for scheme '{}'", scheme)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
