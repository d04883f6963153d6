//! Messages exchanged between pipeline stages

use bytes::Bytes;

/// What a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Unparsed bytes straight off (or onto) the wire
    Raw,
    /// An RTSP request or response
    Rtsp,
    /// A session description
    Sdp,
    /// An RTP packet
    Rtp,
    /// An RTCP packet
    Rtcp,
}

/// The unit passed between pipeline stages
///
/// Messages are immutable once built and cheap to clone: the payload is a
/// reference counted `Bytes`, so fan-out never copies the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
    kind: MessageKind,
}

impl Message {
    /// Create a message of the given kind
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            kind,
        }
    }

    /// Create a raw message
    pub fn raw(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Raw, payload)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the message, keeping only the payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
