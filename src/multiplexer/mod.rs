//! Ingress fan-out
//!
//! The [`Multiplexer`] sits at the application end of a pipeline and hands a
//! copy of every ingress message to each registered sink, in registration
//! order. A sink that is full misses that message, so bounded sinks are
//! lossy under backpressure; a sink that is closed is removed. Neither holds
//! up the others.

mod sink;

pub use sink::{MessageSink, SinkError, SinkId, SinkSet};

use crate::component::{Component, Context};
use crate::message::Message;

/// Component delivering each ingress message to every sink
#[derive(Debug, Default)]
pub struct Multiplexer {
    sinks: SinkSet,
    delivered: u64,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing (possibly shared) sink set
    pub fn with_sinks(sinks: SinkSet) -> Self {
        Self {
            sinks,
            delivered: 0,
        }
    }

    /// Handle to the sink set; sinks added through it take effect immediately
    pub fn sinks(&self) -> SinkSet {
        self.sinks.clone()
    }

    /// Messages received so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    fn fan_out(&self, msg: &Message) {
        let mut closed = Vec::new();

        for (id, sink) in self.sinks.snapshot() {
            match sink.lock().deliver(msg.clone()) {
                Ok(()) => {}
                Err(SinkError::Full) => {
                    tracing::warn!(sink = %id, bytes = msg.len(), "Sink full, message lost");
                }
                Err(SinkError::Closed) => {
                    tracing::debug!(sink = %id, "Sink closed, removing");
                    closed.push(id);
                }
            }
        }

        self.sinks.prune(&closed);
    }
}

impl Component for Multiplexer {
    fn name(&self) -> &'static str {
        "multiplexer"
    }

    fn on_ingress(&mut self, msg: Message, _ctx: &mut Context) {
        self.delivered += 1;
        if self.sinks.is_empty() {
            tracing::trace!(bytes = msg.len(), "No sinks, message dropped");
            return;
        }
        self.fan_out(&msg);
    }
}
