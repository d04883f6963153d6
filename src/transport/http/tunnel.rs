//! RTSP-over-HTTP tunnel
//!
//! The tunnel is two HTTP connections to the same path, tied together by a
//! shared `x-sessioncookie`:
//!
//! ```text
//! Client                                        Server
//!   |--- GET <path> HTTP/1.0 (x-sessioncookie) --->|
//!   |<-- HTTP/1.0 200 OK --------------------------|   handshake chunk
//!   |--- POST <path> HTTP/1.0 (x-sessioncookie) -->|
//!   |                                              |
//!   |--- base64(RTSP request) on POST ------------>|
//!   |<-- RTSP response / interleaved RTP on GET ---|
//! ```
//!
//! The GET connection carries everything the server sends, the POST
//! connection carries every command as one base64 chunk. Its body is declared
//! with a `Content-Length` that is never reached so the request stays open.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::component::Link;
use crate::error::{Error, Result, TunnelError};
use crate::message::Message;
use crate::transport::endpoint::Endpoint;
use crate::transport::net::{self, BoxedStream};
use crate::transport::{SignalSender, TransportConfig};

/// Declared POST body length; commands stream in far below it
pub const POST_CONTENT_LENGTH: u32 = 32767;

/// Content type of both tunnel halves
pub const TUNNEL_CONTENT_TYPE: &str = "application/x-rtsp-tunnelled";

/// Tunnel setup progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Nothing opened yet
    Idle,
    /// GET sent, waiting for the handshake chunk
    GetPending,
    /// GET answered, POST not opened yet
    GetEstablished,
    /// POST connection being opened
    PostPending,
    /// Both halves open, commands flow
    Ready,
    /// One of the halves closed
    Closed,
}

/// Commands written but not yet acknowledged
///
/// The tunnel has no way to match a response to its request, so the next
/// chunk on the GET connection acknowledges every command outstanding at
/// that moment.
#[derive(Debug, Default)]
pub struct AckTracker {
    outstanding: usize,
    acknowledged: u64,
}

impl AckTracker {
    /// Record a command written on the POST connection
    pub fn sent(&mut self) {
        self.outstanding += 1;
    }

    /// Record a GET data event; returns how many commands it acknowledged
    pub fn on_data(&mut self) -> usize {
        let acked = std::mem::take(&mut self.outstanding);
        self.acknowledged += acked as u64;
        acked
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }
}

/// One tunnel session
#[derive(Debug)]
pub struct HttpTunnel {
    session_id: String,
    endpoint: Endpoint,
    tls: bool,
    user_agent: String,
    state: TunnelState,
}

impl HttpTunnel {
    /// Create a tunnel session with a fresh session cookie
    pub fn new(endpoint: Endpoint, tls: bool, user_agent: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            endpoint,
            tls,
            user_agent: user_agent.into(),
            state: TunnelState::Idle,
        }
    }

    /// The `x-sessioncookie` shared by both halves
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Request head opening the GET (server to client) half
    pub fn get_request(&self) -> String {
        format!(
            "GET {path} HTTP/1.0\r\n\
             CSeq: 1\r\n\
             User-Agent: {agent}\r\n\
             Accept: {content_type}\r\n\
             x-sessioncookie: {cookie}\r\n\
             Connection: keep-alive\r\n\
             Pragma: no-cache\r\n\
             Cache-Control: no-cache\r\n\r\n",
            path = self.endpoint.path,
            agent = self.user_agent,
            content_type = TUNNEL_CONTENT_TYPE,
            cookie = self.session_id,
        )
    }

    /// Request head opening the POST (client to server) half
    pub fn post_request(&self) -> String {
        format!(
            "POST {path} HTTP/1.0\r\n\
             CSeq: 1\r\n\
             User-Agent: {agent}\r\n\
             x-sessioncookie: {cookie}\r\n\
             Content-Type: {content_type}\r\n\
             Pragma: no-cache\r\n\
             Cache-Control: no-cache\r\n\
             Content-Length: {length}\r\n\
             Expires: Sun, 9 Jan 1972 00:00:00 GMT\r\n\r\n",
            path = self.endpoint.path,
            agent = self.user_agent,
            cookie = self.session_id,
            content_type = TUNNEL_CONTENT_TYPE,
            length = POST_CONTENT_LENGTH,
        )
    }

    /// Encode one command as a POST body chunk
    pub fn encode_command(command: &[u8]) -> String {
        STANDARD.encode(command)
    }

    fn transition(&mut self, next: TunnelState) {
        tracing::trace!(
            session_id = %self.session_id,
            from = ?self.state,
            to = ?next,
            "Tunnel state change"
        );
        self.state = next;
    }

    /// Open the GET half and wait for its handshake
    async fn open_get(&mut self, config: &TransportConfig) -> Result<BoxedStream> {
        let Endpoint { host, port, .. } = self.endpoint.clone();

        self.transition(TunnelState::GetPending);
        let mut get = net::connect(&host, port, self.tls, config.tcp_nodelay).await?;
        write_flush(&mut get, self.get_request().as_bytes()).await?;

        let mut handshake = BytesMut::with_capacity(1024);
        if get.read_buf(&mut handshake).await? == 0 {
            return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        check_handshake(&handshake)?;
        tracing::info!(
            endpoint = %self.endpoint,
            session_id = %self.session_id,
            "HTTP tunnel GET connection established"
        );
        self.transition(TunnelState::GetEstablished);

        Ok(get)
    }

    /// Open the POST half, once the GET half is established
    async fn open_post(&mut self, config: &TransportConfig) -> Result<BoxedStream> {
        let Endpoint { host, port, .. } = self.endpoint.clone();

        self.transition(TunnelState::PostPending);
        let mut post = net::connect(&host, port, self.tls, config.tcp_nodelay).await?;
        write_flush(&mut post, self.post_request().as_bytes()).await?;
        tracing::info!(
            endpoint = %self.endpoint,
            session_id = %self.session_id,
            "HTTP tunnel POST connection established"
        );
        self.transition(TunnelState::Ready);

        Ok(post)
    }

    /// Run the tunnel until a half closes, the owner ends it, or setup fails
    ///
    /// The watchdog covers the GET half only, from connect through the
    /// handshake and every read after. The POST half has none.
    pub(crate) async fn run(
        mut self,
        config: TransportConfig,
        link: Option<Link>,
        signals: SignalSender,
        mut commands: mpsc::UnboundedReceiver<Bytes>,
    ) -> Result<()> {
        let timeout = config.connection_timeout;
        let watchdog = tokio::time::sleep(timeout);
        tokio::pin!(watchdog);

        let get = tokio::select! {
            opened = self.open_get(&config) => opened?,
            _ = &mut watchdog => {
                tracing::warn!(endpoint = %self.endpoint, "Timeout during tunnel GET setup");
                signals.timeout();
                return Ok(());
            }
        };
        let post = self.open_post(&config).await?;
        watchdog.as_mut().reset(Instant::now() + timeout);

        let (mut get_reader, _get_writer) = tokio::io::split(get);
        let (mut post_reader, mut post_writer) = tokio::io::split(post);
        let mut buf = BytesMut::with_capacity(config.read_buffer_size);
        let mut scratch = [0u8; 512];
        let mut acks = AckTracker::default();
        let mut reading = true;

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        return Ok(());
                    };
                    let chunk = Self::encode_command(&command);
                    match write_flush(&mut post_writer, chunk.as_bytes()).await {
                        Ok(()) => acks.sent(),
                        Err(e) => tracing::warn!(
                            endpoint = %self.endpoint,
                            error = %e,
                            bytes = command.len(),
                            "Message lost during send"
                        ),
                    }
                }
                read = get_reader.read_buf(&mut buf), if reading => {
                    if read? == 0 {
                        tracing::info!(endpoint = %self.endpoint, "HTTP tunnel GET connection closed");
                        self.transition(TunnelState::Closed);
                        signals.disconnect();
                        return Ok(());
                    }
                    watchdog.as_mut().reset(Instant::now() + timeout);

                    let acked = acks.on_data();
                    if acked > 0 {
                        tracing::trace!(acked = acked, total = acks.acknowledged(), "Commands acknowledged");
                    }

                    if let Some(link) = &link {
                        link.push(Message::raw(buf.split().freeze()));
                    } else {
                        buf.clear();
                    }
                    buf.reserve(config.read_buffer_size);
                }
                read = post_reader.read(&mut scratch) => {
                    match read? {
                        0 => {
                            tracing::info!(endpoint = %self.endpoint, "HTTP tunnel POST connection closed");
                            self.transition(TunnelState::Closed);
                            signals.disconnect();
                            return Ok(());
                        }
                        n => tracing::trace!(bytes = n, "Ignoring data on POST connection"),
                    }
                }
                _ = &mut watchdog, if reading => {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        timeout_ms = timeout.as_millis() as u64,
                        "Timeout on HTTP tunnel GET connection"
                    );
                    signals.timeout();
                    reading = false;
                }
            }
        }
    }
}

/// Validate the first chunk on the GET connection
///
/// Anything not starting with an HTTP status line is accepted as is; some
/// servers skip the status line entirely.
pub fn check_handshake(chunk: &[u8]) -> std::result::Result<(), TunnelError> {
    if !chunk.starts_with(b"HTTP/") {
        return Ok(());
    }

    let line_end = chunk
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(chunk.len());
    let status = std::str::from_utf8(&chunk[..line_end])
        .ok()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok());

    match status {
        Some(code) if (200..300).contains(&code) => Ok(()),
        Some(code) => Err(TunnelError::Rejected(code)),
        None => Ok(()),
    }
}

async fn write_flush<W>(writer: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(data).await?;
    writer.flush().await
}
