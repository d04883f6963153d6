//! Direct RTSP over TCP
//!
//! The socket is opened lazily: the first egress command names the camera,
//! every command after that is written through unchanged. Incoming bytes are
//! pushed verbatim as raw ingress messages.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::endpoint::Endpoint;
use super::{net, SignalSender, TransportConfig, Worker, DEFAULT_RTSP_PORT};
use crate::component::{Completion, Component, Context, Link};
use crate::error::Result;
use crate::message::Message;

enum State {
    /// No command seen yet
    Idle,
    /// Worker running (connecting or connected)
    Open(Worker),
    /// Ended by the owner
    Ended,
}

/// Transport writing RTSP straight onto a TCP socket
pub struct TcpTransport {
    config: TransportConfig,
    signals: SignalSender,
    link: Option<Link>,
    endpoint: Option<Endpoint>,
    state: State,
}

impl TcpTransport {
    pub fn new(config: TransportConfig, signals: SignalSender) -> Self {
        Self {
            config,
            signals,
            link: None,
            endpoint: None,
            state: State::Idle,
        }
    }

    /// Endpoint derived from the first command, if any was sent yet
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.state, State::Ended)
    }

    fn open(&mut self, first_command: &[u8]) {
        let endpoint = match Endpoint::from_request(first_command, DEFAULT_RTSP_PORT) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::error!(error = %e, "Cannot derive TCP endpoint from first command");
                self.signals.error(e.into());
                return;
            }
        };

        tracing::debug!(endpoint = %endpoint, "Opening TCP connection");

        let config = self.config.clone();
        let link = self.link.clone();
        let signals = self.signals.clone();
        let target = endpoint.clone();
        let worker = Worker::spawn(self.signals.clone(), move |commands| {
            serve(target, config, link, signals, commands)
        });

        self.endpoint = Some(endpoint);
        self.state = State::Open(worker);
    }
}

impl Component for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn on_attach(&mut self, link: Link) {
        self.link = Some(link);
    }

    fn on_egress(&mut self, msg: Message, _ctx: &mut Context) {
        tracing::trace!(
            command = %String::from_utf8_lossy(msg.payload()),
            "TCP egress"
        );

        if matches!(self.state, State::Idle) {
            self.open(msg.payload());
        }

        match &self.state {
            State::Open(worker) => {
                let bytes = msg.len();
                if !worker.send(msg.into_payload()) {
                    tracing::warn!(
                        endpoint = ?self.endpoint,
                        bytes = bytes,
                        "Message lost during send, connection is gone"
                    );
                }
            }
            State::Idle => {}
            State::Ended => {
                tracing::warn!(bytes = msg.len(), "Message dropped, TCP transport ended");
            }
        }
    }

    fn end(&mut self) -> Completion {
        match std::mem::replace(&mut self.state, State::Ended) {
            State::Open(worker) => {
                tracing::debug!(endpoint = ?self.endpoint, "Ending TCP transport");
                worker.end()
            }
            State::Idle | State::Ended => Completion::ready(),
        }
    }
}

async fn serve(
    endpoint: Endpoint,
    config: TransportConfig,
    link: Option<Link>,
    signals: SignalSender,
    mut commands: mpsc::UnboundedReceiver<Bytes>,
) -> Result<()> {
    let timeout = config.connection_timeout;

    let connect = net::connect_tcp(&endpoint.host, endpoint.port, config.tcp_nodelay);
    let stream = match tokio::time::timeout(timeout, connect).await {
        Ok(stream) => stream?,
        Err(_) => {
            tracing::warn!(endpoint = %endpoint, "Timeout when connecting");
            signals.timeout();
            return Ok(());
        }
    };

    tracing::info!(endpoint = %endpoint, "TCP connection established");

    let (reader, writer) = stream.into_split();
    pump(&endpoint, &config, link.as_ref(), &signals, &mut commands, reader, writer).await
}

/// Move commands onto the socket and socket bytes onto the link
///
/// Returns once the command channel closes or the peer hangs up. A failed
/// write loses that command only.
async fn pump<R, W>(
    endpoint: &Endpoint,
    config: &TransportConfig,
    link: Option<&Link>,
    signals: &SignalSender,
    commands: &mut mpsc::UnboundedReceiver<Bytes>,
    mut reader: R,
    mut writer: W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let timeout = config.connection_timeout;
    let mut buf = BytesMut::with_capacity(config.read_buffer_size);
    let watchdog = tokio::time::sleep(timeout);
    tokio::pin!(watchdog);
    let mut reading = true;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    return Ok(());
                };
                match writer.write_all(&command).await {
                    Ok(()) => watchdog.as_mut().reset(Instant::now() + timeout),
                    Err(e) => tracing::warn!(
                        endpoint = %endpoint,
                        error = %e,
                        bytes = command.len(),
                        "Message lost during send"
                    ),
                }
            }
            read = reader.read_buf(&mut buf), if reading => {
                if read? == 0 {
                    tracing::info!(endpoint = %endpoint, "TCP connection closed by peer");
                    signals.disconnect();
                    return Ok(());
                }
                watchdog.as_mut().reset(Instant::now() + timeout);
                if let Some(link) = link {
                    link.push(Message::raw(buf.split().freeze()));
                } else {
                    buf.clear();
                }
                buf.reserve(config.read_buffer_size);
            }
            _ = &mut watchdog, if reading => {
                tracing::warn!(
                    endpoint = %endpoint,
                    timeout_ms = timeout.as_millis() as u64,
                    "No data received, ending ingress"
                );
                signals.timeout();
                reading = false;
            }
        }
    }
}
