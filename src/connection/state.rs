//! Connection lifecycle states and the events that drive them

use std::fmt;

/// Identifies one dialed connection; each dial gets a fresh id
pub type LinkId = u64;

/// Lifecycle state of the managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing dialed yet
    #[default]
    Disconnected,
    /// Dial in progress, waiting for the open event
    Connecting,
    /// Connected; heartbeat running
    Open,
    /// Connection closed, reconnect timer armed
    ClosedPendingRetry,
    /// `disconnect()` was called; no further dials or reconnects
    ShuttingDown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::ClosedPendingRetry => "closed-pending-retry",
            ConnectionState::ShuttingDown => "shutting-down",
        };
        f.write_str(name)
    }
}

/// Inbound payload, kept opaque
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

/// Something that happened on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Handshake completed
    Opened,
    /// A data frame arrived
    Message(Payload),
    /// Transport-level failure; a `Closed` always follows
    Error(String),
    /// The connection is gone. Terminal for its link.
    Closed { reason: Option<String> },
}

/// A [`LinkEvent`] tagged with the connection that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEnvelope {
    pub link: LinkId,
    pub event: LinkEvent,
}

impl LinkEnvelope {
    pub fn new(link: LinkId, event: LinkEvent) -> Self {
        Self { link, event }
    }
}
