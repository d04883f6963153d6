//! Network transports
//!
//! A transport is the [`Component`] at the head of a pipeline. It owns the
//! physical connection, writes egress commands onto the wire and pushes
//! whatever the network sends into the ingress flow.
//!
//! Transports never fail loudly. Connection problems are reported on a
//! separate control channel as a [`Signal`] and the owner (normally the
//! reconnection supervisor) decides what to do about them.
//!
//! - [`TcpTransport`]: one raw socket, RTSP straight to the camera
//! - [`HttpTunnelTransport`]: RTSP tunnelled through a GET/POST pair of HTTP(S)
//!   connections

pub mod endpoint;
pub mod http;
mod net;
pub mod tcp;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::component::{Completion, Component};
use crate::error::{ConfigError, Error, Result};

pub use endpoint::Endpoint;
pub use http::HttpTunnelTransport;
pub use tcp::TcpTransport;

/// Default RTSP port used by the TCP transport
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// Default port for a plain HTTP tunnel
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default port for an HTTPS tunnel
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Default inactivity window before a timeout signal
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default client id sent in tunnel requests
pub const DEFAULT_USER_AGENT: &str = concat!("rtsp-transport/", env!("CARGO_PKG_VERSION"));

/// Health notifications a transport sends to its owner
#[derive(Debug)]
pub enum Signal {
    /// Connection could not be established, or the socket failed
    Error(Error),
    /// The peer closed the connection
    Disconnect,
    /// No data arrived within the connection timeout
    Timeout,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Error(e) => write!(f, "error: {}", e),
            Signal::Disconnect => write!(f, "disconnect"),
            Signal::Timeout => write!(f, "timeout"),
        }
    }
}

/// A signal tagged with the generation of the transport that sent it
#[derive(Debug)]
pub struct TransportSignal {
    pub generation: u64,
    pub signal: Signal,
}

/// Sending half of a transport's control channel
#[derive(Debug, Clone)]
pub struct SignalSender {
    generation: u64,
    tx: mpsc::UnboundedSender<TransportSignal>,
}

impl SignalSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TransportSignal>) -> Self {
        Self { generation, tx }
    }

    /// Create a sender together with its receiving end
    pub fn channel(generation: u64) -> (Self, mpsc::UnboundedReceiver<TransportSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(generation, tx), rx)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn error(&self, error: Error) {
        self.send(Signal::Error(error));
    }

    pub fn disconnect(&self) {
        self.send(Signal::Disconnect);
    }

    pub fn timeout(&self) {
        self.send(Signal::Timeout);
    }

    fn send(&self, signal: Signal) {
        // Nobody listening any more: the owner has moved on.
        let _ = self.tx.send(TransportSignal {
            generation: self.generation,
            signal,
        });
    }
}

/// Which transport a target URI calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Direct RTSP over TCP (`rtsp://`)
    Tcp,
    /// RTSP over an HTTP tunnel (`http://` or `https://`)
    HttpTunnel { tls: bool },
}

impl TransportKind {
    /// Select a transport from the URI scheme
    pub fn from_uri(uri: &str) -> std::result::Result<Self, ConfigError> {
        let url = Url::parse(uri).map_err(|_| ConfigError::InvalidUri(uri.to_string()))?;
        match url.scheme() {
            "rtsp" => Ok(TransportKind::Tcp),
            "http" => Ok(TransportKind::HttpTunnel { tls: false }),
            "https" => Ok(TransportKind::HttpTunnel { tls: true }),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::HttpTunnel { tls: false } => write!(f, "http"),
            TransportKind::HttpTunnel { tls: true } => write!(f, "https"),
        }
    }
}

/// Settings handed to every transport instance
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Inactivity window before a timeout signal
    pub connection_timeout: Duration,

    /// Client id sent in tunnel requests
    pub user_agent: String,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Read buffer size per connection
    pub read_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            tcp_nodelay: true,
            read_buffer_size: 64 * 1024, // 64KB
        }
    }
}

/// Builds transport components for the supervisor
pub trait TransportFactory: Send {
    fn create(
        &self,
        kind: TransportKind,
        config: &TransportConfig,
        signals: SignalSender,
    ) -> Box<dyn Component>;
}

/// Factory for the real network transports
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkTransports;

impl TransportFactory for NetworkTransports {
    fn create(
        &self,
        kind: TransportKind,
        config: &TransportConfig,
        signals: SignalSender,
    ) -> Box<dyn Component> {
        match kind {
            TransportKind::Tcp => Box::new(TcpTransport::new(config.clone(), signals)),
            TransportKind::HttpTunnel { tls } => {
                Box::new(HttpTunnelTransport::new(config.clone(), tls, signals))
            }
        }
    }
}

/// Background task owning a transport's sockets
///
/// Egress bytes are queued on an unbounded channel, so commands written while
/// the connection is still being set up go out in order once it is ready.
pub(crate) struct Worker {
    commands: mpsc::UnboundedSender<Bytes>,
    shutdown: oneshot::Sender<()>,
    done: Completion,
}

impl Worker {
    /// Spawn `serve` on the current runtime
    ///
    /// An `Err` from `serve` becomes an error signal. Ending the worker (or
    /// dropping it) cancels `serve`, which closes its sockets.
    pub(crate) fn spawn<F, Fut>(signals: SignalSender, serve: F) -> Self
    where
        F: FnOnce(mpsc::UnboundedReceiver<Bytes>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let (completer, done) = Completion::pending();
        let serve = serve(commands_rx);

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx => {}
                result = serve => {
                    if let Err(e) = result {
                        tracing::debug!(error = %e, "Transport worker failed");
                        signals.error(e);
                    }
                }
            }
            completer.complete();
        });

        Self {
            commands,
            shutdown,
            done,
        }
    }

    /// Queue bytes for the wire
    ///
    /// Returns false once the worker has stopped.
    pub(crate) fn send(&self, bytes: Bytes) -> bool {
        self.commands.send(bytes).is_ok()
    }

    /// Stop the worker, closing its sockets
    pub(crate) fn end(self) -> Completion {
        let _ = self.shutdown.send(());
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_uri() {
        assert_eq!(
            TransportKind::from_uri("rtsp://camera/stream").unwrap(),
            TransportKind::Tcp
        );
        assert_eq!(
            TransportKind::from_uri("http://camera/stream").unwrap(),
            TransportKind::HttpTunnel { tls: false }
        );
        assert_eq!(
            TransportKind::from_uri("HTTPS://camera/stream").unwrap(),
            TransportKind::HttpTunnel { tls: true }
        );
    }

    #[test]
    fn test_kind_rejects_other_schemes() {
        assert_eq!(
            TransportKind::from_uri("ws://camera/stream"),
            Err(ConfigError::UnsupportedScheme("ws".into()))
        );
        assert!(matches!(
            TransportKind::from_uri("not a uri"),
            Err(ConfigError::InvalidUri(_))
        ));
    }

    #[test]
    fn test_signal_sender_tags_generation() {
        let (signals, mut rx) = SignalSender::channel(7);
        signals.timeout();
        signals.disconnect();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.generation, 7);
        assert!(matches!(first.signal, Signal::Timeout));
        assert!(matches!(rx.try_recv().unwrap().signal, Signal::Disconnect));
    }

    #[tokio::test]
    async fn test_worker_error_becomes_signal() {
        let (signals, mut rx) = SignalSender::channel(1);
        let worker = Worker::spawn(signals, |_commands| async {
            Err(Error::Timeout(Duration::from_secs(1)))
        });

        let signal = rx.recv().await.unwrap();
        assert!(matches!(signal.signal, Signal::Error(Error::Timeout(_))));
        worker.end().wait().await;
    }

    #[tokio::test]
    async fn test_worker_end_cancels_serve() {
        let (signals, mut rx) = SignalSender::channel(1);
        let worker = Worker::spawn(signals, |mut commands| async move {
            while commands.recv().await.is_some() {}
            Ok(())
        });

        assert!(worker.send(Bytes::from_static(b"x")));
        worker.end().wait().await;
        assert!(rx.try_recv().is_err());
    }
}
