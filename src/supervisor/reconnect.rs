//! Reconnecting RTSP pipeline
//!
//! The supervisor owns a [`Pipeline`] of `[transport, (auth), session, ..]`
//! and the control channel every transport reports on. When the live
//! transport signals a failure it waits `reconnect_interval`, then swaps a
//! fresh transport of the same kind into the head slot and restarts the
//! session. The rest of the pipeline is never rebuilt.
//!
//! ```text
//!                     Connected
//!   signal (live gen)     │      ▲ new transport, ResetState + Play
//!                         ▼      │
//!             WaitingToReconnect ──► Reconnecting
//!
//!   end() from any state ──► Stopped
//! ```

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::config::PipelineConfig;
use super::handle::PipelineHandle;
use super::ConnectionState;
use crate::component::{Completion, Component, ComponentId, Control, Pipeline};
use crate::error::Result;
use crate::message::Message;
use crate::stats::SupervisorStats;
use crate::transport::{
    NetworkTransports, Signal, SignalSender, TransportConfig, TransportFactory, TransportKind,
    TransportSignal,
};

/// One unit of work for the supervisor
pub(super) enum Event {
    /// A link message was dispatched through the pipeline
    Ingress,
    /// A transport reported on the control channel
    Signal(TransportSignal),
    /// The reconnect deadline passed
    ReconnectDue,
}

/// A pipeline that rebuilds its transport after failures
pub struct RtspPipeline {
    config: PipelineConfig,
    transport_config: TransportConfig,
    kind: TransportKind,
    session_uri: String,
    factory: Box<dyn TransportFactory>,
    pipeline: Pipeline,
    transport: Option<ComponentId>,
    /// Ended transport still in the pipeline until its teardown resolves
    retiring: Option<(ComponentId, Completion)>,
    session: ComponentId,
    generation: u64,
    signals_tx: mpsc::UnboundedSender<TransportSignal>,
    signals_rx: mpsc::UnboundedReceiver<TransportSignal>,
    state: ConnectionState,
    reconnect_at: Option<Instant>,
    stats: SupervisorStats,
}

impl RtspPipeline {
    /// Build a pipeline using the network transports
    ///
    /// `session` builds the RTSP session stage from the normalised `rtsp://`
    /// URI.
    pub fn new<F>(config: PipelineConfig, session: F) -> Result<Self>
    where
        F: FnOnce(&str) -> Box<dyn Component>,
    {
        Self::with_transports(config, session, NetworkTransports)
    }

    /// Build a pipeline with a custom transport factory
    pub fn with_transports<F, T>(config: PipelineConfig, session: F, factory: T) -> Result<Self>
    where
        F: FnOnce(&str) -> Box<dyn Component>,
        T: TransportFactory + 'static,
    {
        let kind = TransportKind::from_uri(&config.uri)?;
        let session_uri = normalize_session_uri(&config.uri);

        let mut pipeline = Pipeline::new();
        let session = pipeline.append(session(&session_uri));
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        let mut this = Self {
            transport_config: config.transport_config(),
            config,
            kind,
            session_uri,
            factory: Box::new(factory),
            pipeline,
            transport: None,
            retiring: None,
            session,
            generation: 0,
            signals_tx,
            signals_rx,
            state: ConnectionState::Connected,
            reconnect_at: None,
            stats: SupervisorStats::new(),
        };
        this.install_transport();

        tracing::info!(
            uri = %this.config.uri,
            transport = %this.kind,
            session_uri = %this.session_uri,
            "RTSP pipeline created"
        );

        Ok(this)
    }

    /// Splice an authentication stage in front of the session stage
    ///
    /// The stage stays in place across reconnections.
    pub fn with_auth(mut self, auth: Box<dyn Component>) -> Self {
        let name = auth.name();
        if self.pipeline.insert_before(self.session, auth).is_some() {
            tracing::debug!(component = name, "Auth stage added");
        }
        self
    }

    /// Add a component at the application end (a multiplexer, typically)
    pub fn append(&mut self, component: Box<dyn Component>) -> ComponentId {
        self.pipeline.append(component)
    }

    /// Start the session
    pub fn play(&mut self) {
        self.pipeline.control(self.session, Control::Play);
    }

    /// Write a message into the egress flow at the application end
    pub fn write(&mut self, msg: Message) {
        self.pipeline.write(msg);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &SupervisorStats {
        &self.stats
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// URI handed to the session stage
    pub fn session_uri(&self) -> &str {
        &self.session_uri
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    /// Id of the live transport, if any
    pub fn transport(&self) -> Option<ComponentId> {
        self.transport
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// Run one scheduling step
    ///
    /// Handles a single piece of work: ingress from the transport, a transport
    /// signal, or the reconnect deadline. Returns false once stopped.
    ///
    /// A step may be cancelled at any point. A reconnection cut short while
    /// the old transport tears down is finished by the next step.
    pub async fn step(&mut self) -> bool {
        if self.state == ConnectionState::Stopped {
            return false;
        }
        let event = self.next_event().await;
        self.handle(event).await;
        self.state != ConnectionState::Stopped
    }

    /// Run until stopped
    pub async fn run(&mut self) {
        while self.step().await {}
    }

    /// Stop the session and tear the transport down
    ///
    /// Any pending reconnection is cancelled. Resolves once the transport has
    /// finished tearing down; calling it again after a cancelled `end` waits
    /// for that teardown.
    pub async fn end(&mut self) {
        if self.state != ConnectionState::Stopped {
            tracing::info!(uri = %self.config.uri, state = %self.state, "Ending RTSP pipeline");

            self.state = ConnectionState::Stopped;
            self.reconnect_at = None;
            self.pipeline.control(self.session, Control::Stop);
            self.retire_transport();
        }
        self.finish_retiring().await;
    }

    /// Move the pipeline onto its own task
    pub fn spawn(self) -> PipelineHandle {
        PipelineHandle::spawn(self)
    }

    /// Wait for the next event
    ///
    /// Cancel safe: nothing is lost if the returned future is dropped.
    pub(super) async fn next_event(&mut self) -> Event {
        if self.state == ConnectionState::Reconnecting {
            return Event::ReconnectDue;
        }

        let deadline = self.reconnect_at;
        let reconnect = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            signal = self.signals_rx.recv() => match signal {
                Some(signal) => Event::Signal(signal),
                // The supervisor holds a sender, so the channel never closes
                None => Event::Ingress,
            },
            _ = self.pipeline.dispatch_next() => Event::Ingress,
            _ = reconnect => Event::ReconnectDue,
        }
    }

    pub(super) async fn handle(&mut self, event: Event) {
        match event {
            Event::Ingress => {}
            Event::Signal(signal) => self.on_signal(signal),
            Event::ReconnectDue => match self.state {
                ConnectionState::WaitingToReconnect => {
                    self.state = ConnectionState::Reconnecting;
                    self.reconnect_at = None;
                    self.retire_transport();
                    self.finish_reconnect().await;
                }
                ConnectionState::Reconnecting => {
                    tracing::debug!(uri = %self.config.uri, "Resuming interrupted reconnection");
                    self.finish_reconnect().await;
                }
                ConnectionState::Connected | ConnectionState::Stopped => {}
            },
        }
    }

    fn on_signal(&mut self, TransportSignal { generation, signal }: TransportSignal) {
        if generation != self.generation {
            self.stats.stale_signals += 1;
            tracing::trace!(
                generation = generation,
                live = self.generation,
                signal = %signal,
                "Ignoring signal from replaced transport"
            );
            return;
        }

        match self.state {
            // Steps stop running once stopped; `end` has retired the transport
            ConnectionState::Stopped => {
                tracing::trace!(signal = %signal, "Ignoring signal after stop");
            }
            ConnectionState::WaitingToReconnect | ConnectionState::Reconnecting => {
                tracing::debug!(signal = %signal, state = %self.state, "Reconnection already pending");
            }
            ConnectionState::Connected => {
                match &signal {
                    Signal::Error(e) => tracing::error!(
                        uri = %self.config.uri,
                        generation = generation,
                        error = %e,
                        "Connection lost"
                    ),
                    Signal::Disconnect | Signal::Timeout => tracing::warn!(
                        uri = %self.config.uri,
                        generation = generation,
                        signal = %signal,
                        "Connection lost"
                    ),
                }
                self.stats.record(&signal);

                let interval = self.config.reconnect_interval;
                tracing::info!(
                    interval_ms = interval.as_millis() as u64,
                    "Reconnecting after interval"
                );
                self.state = ConnectionState::WaitingToReconnect;
                self.reconnect_at = Some(Instant::now() + interval);
            }
        }
    }

    /// Wait out the old transport's teardown, then install its replacement
    ///
    /// Safe to cancel: the teardown stays in `retiring` and the state stays
    /// `Reconnecting` until this runs to the end.
    async fn finish_reconnect(&mut self) {
        self.finish_retiring().await;
        self.install_transport();

        self.pipeline.control(self.session, Control::ResetState);
        self.pipeline.control(self.session, Control::Play);

        self.stats.reconnects += 1;
        self.state = ConnectionState::Connected;

        tracing::info!(
            uri = %self.config.uri,
            generation = self.generation,
            reconnects = self.stats.reconnects,
            "Transport replaced"
        );
    }

    fn install_transport(&mut self) {
        self.generation += 1;
        let signals = SignalSender::new(self.generation, self.signals_tx.clone());
        let transport = self
            .factory
            .create(self.kind, &self.transport_config, signals);
        let name = transport.name();

        let id = self.pipeline.prepend(transport);
        self.transport = Some(id);
        self.stats.transports_created += 1;

        tracing::debug!(
            transport = name,
            id = %id,
            generation = self.generation,
            "Transport installed"
        );
    }

    /// Start ending the live transport
    fn retire_transport(&mut self) {
        let Some(id) = self.transport.take() else {
            return;
        };
        let completion = self
            .pipeline
            .end_component(id)
            .unwrap_or_else(Completion::ready);
        self.retiring = Some((id, completion));
    }

    async fn finish_retiring(&mut self) {
        if let Some((_, completion)) = self.retiring.as_mut() {
            completion.wait_in_place().await;
        }
        if let Some((id, _)) = self.retiring.take() {
            self.pipeline.remove(id);
        }
    }
}

/// Rewrite an `http(s)://` URI to `rtsp://` for the session stage
///
/// Other URIs come back unchanged.
pub fn normalize_session_uri(uri: &str) -> String {
    match uri.split_once("://") {
        Some((scheme, rest))
            if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") =>
        {
            format!("rtsp://{}", rest)
        }
        _ => uri.to_string(),
    }
}
