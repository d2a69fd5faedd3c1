use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{error::PushError, event::HubEvent, sink::EventSink};

/// Connection states. Linear progression, no backwards transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    /// Created, not yet registered.
    Pending = 0,
    /// Registered and receiving pushes.
    Active = 1,
    /// Terminal.
    Closed = 2,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnState::Pending,
            1 => ConnState::Active,
            _ => ConnState::Closed,
        }
    }
}

/// Why a connection left the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client dropped the stream.
    Completed,
    IdleTimeout,
    /// A broadcast push failed.
    PushFailed,
    /// A heartbeat or sweep probe failed.
    HeartbeatFailed,
    /// Admission refused; the connection only carried the error event.
    Rejected,
    HandshakeFailed,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Completed => "completed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::PushFailed => "push_failed",
            CloseReason::HeartbeatFailed => "heartbeat_failed",
            CloseReason::Rejected => "rejected",
            CloseReason::HandshakeFailed => "handshake_failed",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// One subscriber's push channel and its bookkeeping.
pub struct Connection {
    id: String,
    client_key: String,
    created_at: DateTime<Utc>,
    idle_timeout: Duration,
    state: AtomicU8,
    closed: CancellationToken,
    sink: Arc<dyn EventSink>,
}

impl Connection {
    pub fn new(
        client_key: impl Into<String>,
        sink: Arc<dyn EventSink>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            client_key: client_key.into(),
            created_at: Utc::now(),
            idle_timeout,
            state: AtomicU8::new(ConnState::Pending as u8),
            closed: CancellationToken::new(),
            sink,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnState::Closed
    }

    /// Token cancelled exactly when the connection closes.
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Resolves once the remote end has gone away.
    pub async fn peer_gone(&self) {
        self.sink.closed().await
    }

    /// `Pending -> Active`. Returns false if the connection was not pending.
    pub(crate) fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                ConnState::Pending as u8,
                ConnState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closed`. Only the first caller wins; it gets back the state
    /// the connection was in so it can undo the matching bookkeeping.
    /// Every later call returns `None`.
    pub fn close(&self, reason: CloseReason) -> Option<ConnState> {
        let prev = self.state.swap(ConnState::Closed as u8, Ordering::AcqRel);
        let prev = ConnState::from_u8(prev);
        if prev == ConnState::Closed {
            return None;
        }
        self.closed.cancel();
        tracing::debug!(conn_id = %self.id, client = %self.client_key, %reason, "connection closed");
        Some(prev)
    }

    /// Push one event, failing fast when the connection is already closed.
    pub async fn push(&self, event: HubEvent, timeout: Duration) -> Result<(), PushError> {
        if self.is_closed() {
            return Err(PushError::Closed);
        }
        self.sink.push(event, timeout).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("client_key", &self.client_key)
            .field("state", &self.state())
            .finish()
    }
}
