//! Duplex pipeline components
//!
//! A component sits in a [`Pipeline`] and sees two flows:
//!
//! ```text
//!            ingress (network -> application)
//!   ┌───────────┐    ┌───────────┐    ┌───────────┐
//!   │ transport │ -> │   auth    │ -> │   rtsp    │ -> sinks
//!   │           │ <- │           │ <- │  session  │ <- application
//!   └───────────┘    └───────────┘    └───────────┘
//!            egress (application -> network)
//! ```
//!
//! Handlers are synchronous: they receive a message plus a [`Context`] and
//! push whatever they want forwarded in either direction. Components that
//! produce data asynchronously (sockets) get a [`Link`] when inserted and push
//! ingress through it; the pipeline dispatches those messages on the owning
//! task, so every stage runs on one logical thread.

mod pipeline;

pub use pipeline::{ComponentId, Pipeline};

use tokio::sync::{mpsc, oneshot};

use crate::message::Message;
use pipeline::Injected;

/// Session-level commands sent to a component outside the data flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Start (or restart) the session
    Play,
    /// Stop the session
    Stop,
    /// Forget all negotiated session state
    ResetState,
}

/// A duplex pipeline stage
pub trait Component: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Called once when the component is inserted into a pipeline
    fn on_attach(&mut self, _link: Link) {}

    /// Handle a message travelling toward the application
    fn on_ingress(&mut self, msg: Message, ctx: &mut Context) {
        ctx.push_ingress(msg);
    }

    /// Handle a message travelling toward the network
    fn on_egress(&mut self, msg: Message, ctx: &mut Context) {
        ctx.push_egress(msg);
    }

    /// Handle a session command
    fn on_control(&mut self, _control: Control, _ctx: &mut Context) {}

    /// Tear down any live resource
    ///
    /// Must be idempotent and must tolerate the resource being gone already.
    /// The returned completion resolves once teardown is finished.
    fn end(&mut self) -> Completion {
        Completion::ready()
    }
}

/// Messages emitted by a handler, per direction
#[derive(Debug, Default)]
pub struct Context {
    ingress: Vec<Message>,
    egress: Vec<Message>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward a message toward the application
    pub fn push_ingress(&mut self, msg: Message) {
        self.ingress.push(msg);
    }

    /// Send a message toward the network
    pub fn push_egress(&mut self, msg: Message) {
        self.egress.push(msg);
    }

    pub(crate) fn take(self) -> (Vec<Message>, Vec<Message>) {
        (self.ingress, self.egress)
    }
}

/// Handle for pushing ingress into the pipeline from outside a handler
#[derive(Debug, Clone)]
pub struct Link {
    id: ComponentId,
    tx: mpsc::UnboundedSender<Injected>,
}

impl Link {
    pub(crate) fn new(id: ComponentId, tx: mpsc::UnboundedSender<Injected>) -> Self {
        Self { id, tx }
    }

    /// Id of the component this link belongs to
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Push a message into the ingress flow after this component
    ///
    /// Returns false once the pipeline is gone.
    pub fn push(&self, msg: Message) -> bool {
        self.tx
            .send(Injected {
                from: self.id,
                msg,
            })
            .is_ok()
    }
}

/// Resolves once a component has finished tearing down
#[derive(Debug)]
pub struct Completion {
    rx: Option<oneshot::Receiver<()>>,
}

impl Completion {
    /// A completion that is already resolved
    pub fn ready() -> Self {
        Self { rx: None }
    }

    /// A completion resolved by the returned [`Completer`]
    pub fn pending() -> (Completer, Self) {
        let (tx, rx) = oneshot::channel();
        (Completer { tx }, Self { rx: Some(rx) })
    }

    /// Wait for teardown to finish
    pub async fn wait(mut self) {
        self.wait_in_place().await;
    }

    /// Wait for teardown to finish without giving up the completion
    ///
    /// Dropping the returned future leaves the completion pending, so it can
    /// be awaited again later.
    pub async fn wait_in_place(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // A dropped completer counts as finished.
            let _ = rx.await;
        }
        self.rx = None;
    }

    pub fn is_resolved(&self) -> bool {
        self.rx.is_none()
    }
}

/// Resolves a [`Completion`] when completed or dropped
#[derive(Debug)]
pub struct Completer {
    tx: oneshot::Sender<()>,
}

impl Completer {
    pub fn complete(self) {
        let _ = self.tx.send(());
    }
}

/// A component with no behaviour of its own
#[derive(Debug, Default)]
pub struct Passthrough {
    name: &'static str,
}

impl Passthrough {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Component for Passthrough {
    fn name(&self) -> &'static str {
        if self.name.is_empty() {
            "passthrough"
        } else {
            self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_ready() {
        Completion::ready().wait().await;
    }

    #[tokio::test]
    async fn test_completion_resolves_when_completer_dropped() {
        let (completer, completion) = Completion::pending();
        drop(completer);
        completion.wait().await;
    }

    #[tokio::test]
    async fn test_completion_resolves_on_complete() {
        let (completer, completion) = Completion::pending();
        tokio::spawn(async move { completer.complete() });
        completion.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_survives_cancelled_wait() {
        let (completer, mut completion) = Completion::pending();

        let waited =
            tokio::time::timeout(std::time::Duration::from_secs(1), completion.wait_in_place())
                .await;
        assert!(waited.is_err());
        assert!(!completion.is_resolved());

        completer.complete();
        completion.wait_in_place().await;
        assert!(completion.is_resolved());

        // Resolved completions return at once
        completion.wait_in_place().await;
    }

    #[test]
    fn test_passthrough_forwards_both_ways() {
        let mut stage = Passthrough::new("auth");
        let mut ctx = Context::new();
        stage.on_ingress(Message::raw(&b"in"[..]), &mut ctx);
        stage.on_egress(Message::raw(&b"out"[..]), &mut ctx);

        let (ingress, egress) = ctx.take();
        assert_eq!(ingress, vec![Message::raw(&b"in"[..])]);
        assert_eq!(egress, vec![Message::raw(&b"out"[..])]);
        assert_eq!(stage.name(), "auth");
    }
}
