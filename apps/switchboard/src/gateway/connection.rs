//! Per-connection transport handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use switchboard_common::id::{prefix, prefixed_ulid};
use tokio::sync::mpsc;

use crate::error::SendError;

/// Identity of one open connection, unique for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Allocate a fresh `conn_` prefixed ULID.
    pub fn generate() -> Self {
        Self(prefixed_ulid(prefix::CONNECTION))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The capability the engine needs from a transport connection.
///
/// Implementations must make `send` cheap and non-blocking; it is called while
/// fanning out to many targets.
pub trait Connection: Send + Sync {
    fn id(&self) -> &ConnectionId;

    /// Whether the peer can still receive frames.
    fn is_open(&self) -> bool;

    /// Queue one text frame for the peer.
    fn send(&self, frame: String) -> Result<(), SendError>;
}

/// A WebSocket connection whose frames are written by a dedicated writer task.
///
/// `send` pushes onto the writer's outbox; the outbox closes when the writer
/// task exits, which flips `is_open` to false.
pub struct SocketConnection {
    id: ConnectionId,
    outbox: mpsc::UnboundedSender<String>,
    open: AtomicBool,
}

impl SocketConnection {
    pub fn new(id: ConnectionId, outbox: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id,
            outbox,
            open: AtomicBool::new(true),
        }
    }

    /// Mark closed. Subsequent sends fail and liveness checks report false.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl Connection for SocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outbox.is_closed()
    }

    fn send(&self, frame: String) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError(self.id.to_string()));
        }
        self.outbox
            .send(frame)
            .map_err(|_| SendError(self.id.to_string()))
    }
}
