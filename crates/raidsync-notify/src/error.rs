use thiserror::Error;

/// Outcome of a failed push to one peer.
///
/// Push failures are local to the connection they happened on: the hub turns
/// them into a removal and never hands them to announce or heartbeat callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// The peer went away or the connection was already closed.
    #[error("connection closed")]
    Closed,

    /// The peer did not drain its buffer within the push budget.
    #[error("push timed out after {ms}ms")]
    Timeout { ms: u64 },
}

/// Why a subscription did not become a live connection.
///
/// None of these fail the HTTP request itself: the subscriber still gets a
/// stream, which carries at most one `error` event and then ends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    #[error("subscription rejected: {0:?}")]
    Rejected(crate::admission::Admission),

    #[error("handshake failed: {0}")]
    HandshakeFailed(PushError),

    #[error("hub is shutting down")]
    ShuttingDown,
}
