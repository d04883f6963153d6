//! RTSP over HTTP(S) tunnelling
//!
//! Many deployments only let outbound HTTP(S) through. This transport looks
//! like any other duplex component to the pipeline while the bytes actually
//! travel over a [`HttpTunnel`]: a GET connection for everything coming back
//! and a POST connection for base64-encoded commands.
//!
//! The tunnel endpoint is unknown until the first command is written; its
//! request line names host, port and path.

pub mod tunnel;

pub use tunnel::{AckTracker, HttpTunnel, TunnelState};

use super::endpoint::Endpoint;
use super::{SignalSender, TransportConfig, Worker, DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT};
use crate::component::{Completion, Component, Context, Link};
use crate::message::Message;

enum State {
    Idle,
    Open(Worker),
    Ended,
}

/// Transport carrying RTSP through an HTTP(S) tunnel
pub struct HttpTunnelTransport {
    config: TransportConfig,
    tls: bool,
    signals: SignalSender,
    link: Option<Link>,
    endpoint: Option<Endpoint>,
    session_id: Option<String>,
    state: State,
}

impl HttpTunnelTransport {
    /// Create a tunnel transport; `tls` selects HTTPS
    pub fn new(config: TransportConfig, tls: bool, signals: SignalSender) -> Self {
        Self {
            config,
            tls,
            signals,
            link: None,
            endpoint: None,
            session_id: None,
            state: State::Idle,
        }
    }

    /// Endpoint derived from the first command
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Session cookie of this instance's tunnel, once opened
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.state, State::Ended)
    }

    fn default_port(&self) -> u16 {
        if self.tls {
            DEFAULT_HTTPS_PORT
        } else {
            DEFAULT_HTTP_PORT
        }
    }

    fn open(&mut self, first_command: &[u8]) {
        let endpoint = match Endpoint::from_request(first_command, self.default_port()) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::error!(error = %e, "Cannot derive tunnel endpoint from first command");
                self.signals.error(e.into());
                return;
            }
        };

        let tls = self.tls || endpoint.port == DEFAULT_HTTPS_PORT;
        let tunnel = HttpTunnel::new(endpoint.clone(), tls, self.config.user_agent.clone());

        tracing::debug!(
            endpoint = %endpoint,
            tls = tls,
            session_id = %tunnel.session_id(),
            "Opening HTTP tunnel"
        );

        let config = self.config.clone();
        let link = self.link.clone();
        let signals = self.signals.clone();
        self.session_id = Some(tunnel.session_id().to_string());
        self.endpoint = Some(endpoint);
        self.state = State::Open(Worker::spawn(self.signals.clone(), move |commands| {
            tunnel.run(config, link, signals, commands)
        }));
    }
}

impl Component for HttpTunnelTransport {
    fn name(&self) -> &'static str {
        "http-tunnel"
    }

    fn on_attach(&mut self, link: Link) {
        self.link = Some(link);
    }

    fn on_egress(&mut self, msg: Message, _ctx: &mut Context) {
        tracing::trace!(
            command = %String::from_utf8_lossy(msg.payload()),
            "HTTP tunnel egress"
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
                        "Message lost during send, tunnel is gone"
                    );
                }
            }
            State::Idle => {}
            State::Ended => {
                tracing::warn!(bytes = msg.len(), "Message dropped, HTTP tunnel ended");
            }
        }
    }

    fn end(&mut self) -> Completion {
        match std::mem::replace(&mut self.state, State::Ended) {
            State::Open(worker) => {
                tracing::debug!(
                    endpoint = ?self.endpoint,
                    session_id = ?self.session_id,
                    "Destroying HTTP tunnel"
                );
                worker.end()
            }
            State::Idle | State::Ended => Completion::ready(),
        }
    }
}
