//! Downstream consumers of a multiplexer

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::message::Message;

/// Why a sink did not take a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The sink is alive but cannot take more right now
    Full,
    /// The sink is gone for good
    Closed,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Full => write!(f, "sink full"),
            SinkError::Closed => write!(f, "sink closed"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Something that accepts ingress messages
///
/// Delivery never waits. A sink returning [`SinkError::Full`] loses that
/// message and sees a gap in its stream; sinks that must not lose data either
/// stay unbounded or buffer internally before reporting `Full`.
pub trait MessageSink: Send {
    fn deliver(&mut self, msg: Message) -> Result<(), SinkError>;
}

impl MessageSink for mpsc::UnboundedSender<Message> {
    fn deliver(&mut self, msg: Message) -> Result<(), SinkError> {
        self.send(msg).map_err(|_| SinkError::Closed)
    }
}

/// Lossy: a full channel drops the message rather than waiting for room
impl MessageSink for mpsc::Sender<Message> {
    fn deliver(&mut self, msg: Message) -> Result<(), SinkError> {
        self.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Identifies a sink within its set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

type SharedSink = Arc<Mutex<Box<dyn MessageSink>>>;

#[derive(Default)]
struct Inner {
    next_id: u64,
    sinks: Vec<(SinkId, SharedSink)>,
}

/// Shared, ordered set of sinks
///
/// Clones refer to the same set, so sinks can be added or removed while the
/// multiplexer is running.
#[derive(Clone, Default)]
pub struct SinkSet {
    inner: Arc<Mutex<Inner>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink at the end of the delivery order
    pub fn add(&self, sink: impl MessageSink + 'static) -> SinkId {
        let mut inner = self.inner.lock();
        let id = SinkId(inner.next_id);
        inner.next_id += 1;
        inner
            .sinks
            .push((id, Arc::new(Mutex::new(Box::new(sink) as Box<dyn MessageSink>))));
        id
    }

    /// Remove a sink; returns false if it was not in the set
    pub fn remove(&self, id: SinkId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.sinks.len();
        inner.sinks.retain(|(sink_id, _)| *sink_id != id);
        inner.sinks.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().sinks.is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().sinks.clear();
    }

    /// Current sinks in delivery order
    ///
    /// Delivery runs against the snapshot with the set unlocked, so a sink
    /// added during a delivery only sees the following messages.
    pub(crate) fn snapshot(&self) -> Vec<(SinkId, SharedSink)> {
        self.inner.lock().sinks.clone()
    }

    /// Drop sinks that reported themselves closed
    pub(crate) fn prune(&self, closed: &[SinkId]) {
        if closed.is_empty() {
            return;
        }
        self.inner
            .lock()
            .sinks
            .retain(|(id, _)| !closed.contains(id));
    }
}

impl fmt::Debug for SinkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkSet").field("len", &self.len()).finish()
    }
}
