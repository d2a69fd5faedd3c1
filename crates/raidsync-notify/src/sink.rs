use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_stream::wrappers::ReceiverStream;

use crate::{error::PushError, event::HubEvent};

/// Output side of one subscriber's push channel.
///
/// Implementations must be `Send + Sync` so a connection can be pushed to from
/// the broadcast path, the heartbeat task and its own watchdog at once.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event to the peer, giving up after `timeout`.
    async fn push(&self, event: HubEvent, timeout: Duration) -> Result<(), PushError>;

    /// Resolves once the peer has gone away.
    ///
    /// Sinks that cannot observe the remote end never resolve; their dead
    /// peers are found by the next failed push instead.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }
}

/// Sink backed by a bounded mpsc channel whose receiver is the HTTP response body.
///
/// When the client disconnects the server drops the body, the receiver goes
/// with it, and every further push fails with [`PushError::Closed`].
pub struct ChannelSink {
    tx: mpsc::Sender<HubEvent>,
}

/// Receiving half of a [`ChannelSink`].
pub type EventReceiver = ReceiverStream<HubEvent>;

/// Create a connected sink/stream pair buffering up to `capacity` events.
pub fn channel(capacity: usize) -> (ChannelSink, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink { tx }, ReceiverStream::new(rx))
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn push(&self, event: HubEvent, timeout: Duration) -> Result<(), PushError> {
        self.tx
            .send_timeout(event, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => PushError::Timeout {
                    ms: timeout.as_millis() as u64,
                },
                SendTimeoutError::Closed(_) => PushError::Closed,
            })
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    const BUDGET: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn pushes_arrive_in_order() {
        let (sink, mut rx) = channel(4);
        sink.push(HubEvent::new(1, "a", "x"), BUDGET).await.unwrap();
        sink.push(HubEvent::new(2, "b", "y"), BUDGET).await.unwrap();

        assert_eq!(rx.next().await.unwrap().name, "a");
        assert_eq!(rx.next().await.unwrap().name, "b");
    }

    #[tokio::test]
    async fn dropped_receiver_fails_with_closed() {
        let (sink, rx) = channel(4);
        drop(rx);
        let err = sink.push(HubEvent::new(1, "a", "x"), BUDGET).await.unwrap_err();
        assert_eq!(err, PushError::Closed);
        // closed() must resolve immediately once the peer is gone
        sink.closed().await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_buffer_times_out() {
        let (sink, _rx) = channel(1);
        sink.push(HubEvent::new(1, "a", "x"), BUDGET).await.unwrap();
        let err = sink.push(HubEvent::new(2, "b", "y"), BUDGET).await.unwrap_err();
        assert_eq!(err, PushError::Timeout { ms: 50 });
    }
}
