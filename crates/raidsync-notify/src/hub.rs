use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use chrono::{DateTime, SubsecRound, Utc};
use futures_util::{future::join_all, Stream, StreamExt};
use raidsync_core::config::{NotifyConfig, MIN_CHANNEL_CAPACITY};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    admission::{Admission, Limits},
    connection::{CloseReason, Connection},
    error::{PushError, SubscribeError},
    event::{self, format_timestamp, HubEvent},
    heartbeat::HeartbeatMonitor,
    registry::Registry,
    sink::{self, EventSink},
};

/// Events delivered to one subscriber, ending when its connection closes.
pub type EventStream = Pin<Box<dyn Stream<Item = HubEvent> + Send>>;

/// Outcome of [`Hub::subscribe`].
pub enum Subscription {
    /// Registered; `events` stays open until the connection closes.
    Active { conn_id: String, events: EventStream },
    /// Not registered; `events` carries at most one `error` event and ends.
    Refused {
        error: SubscribeError,
        events: EventStream,
    },
}

impl Subscription {
    pub fn into_events(self) -> EventStream {
        match self {
            Subscription::Active { events, .. } | Subscription::Refused { events, .. } => events,
        }
    }
}

/// Non-owning reference to a registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: String,
    closed: CancellationToken,
}

impl ConnectionHandle {
    /// Token cancelled when the connection closes for any reason.
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Summary of one [`Hub::announce`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceReport {
    /// Value published as `lastUpdated` by this call.
    pub timestamp: DateTime<Utc>,
    /// Connections that received both events.
    pub delivered: usize,
    /// Connections this call closed. A failed peer already closed by another
    /// path is neither delivered nor reaped here.
    pub reaped: usize,
}

/// Summary of one probe pass over the live set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub reaped: usize,
}

// Kept at the precision it is published with, so polled and pushed values
// compare equal.
fn clock_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Broadcast hub: admission, fan-out, liveness probing and reaping.
///
/// Constructed once at startup and shared as `Arc<Hub>`. Call [`Hub::start`]
/// to launch the heartbeat monitor and [`Hub::shutdown`] to stop it and close
/// every connection.
pub struct Hub {
    config: NotifyConfig,
    limits: Limits,
    registry: Registry,
    last_updated: RwLock<DateTime<Utc>>,
    event_seq: AtomicU64,
    /// Serialises probe passes so heartbeat and admission sweeps never overlap.
    sweep_gate: tokio::sync::Mutex<()>,
    shutting_down: AtomicBool,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl Hub {
    pub fn new(config: NotifyConfig) -> Self {
        Self {
            limits: Limits::from(&config),
            config,
            registry: Registry::new(),
            last_updated: RwLock::new(clock_now()),
            event_seq: AtomicU64::new(0),
            sweep_gate: tokio::sync::Mutex::new(()),
            shutting_down: AtomicBool::new(false),
            monitor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn live_count(&self) -> usize {
        self.registry.len()
    }

    /// Time of the most recent announce (hub start time before the first one).
    pub fn last_updated(&self) -> DateTime<Utc> {
        *self.last_updated.read().unwrap_or_else(|e| e.into_inner())
    }

    fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.config.push_timeout_ms)
    }

    fn next_event(&self, name: &str, data: impl Into<String>) -> HubEvent {
        HubEvent::new(self.event_seq.fetch_add(1, Ordering::Relaxed), name, data)
    }

    /// Advance the last-updated clock. Never moves backwards.
    fn touch(&self) -> DateTime<Utc> {
        let now = clock_now();
        let mut guard = self.last_updated.write().unwrap_or_else(|e| e.into_inner());
        if now > *guard {
            *guard = now;
        }
        *guard
    }

    // --- lifecycle ---------------------------------------------------------

    /// Launch the heartbeat monitor. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        let period = Duration::from_secs(self.config.heartbeat_interval_secs);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = HeartbeatMonitor::new(self, period);
        let task = tokio::spawn(monitor.run(shutdown_rx));
        *slot = Some(MonitorHandle { shutdown_tx, task });
        info!(
            max_connections = self.limits.max_connections,
            max_per_client = self.limits.max_per_client,
            "notification hub started"
        );
    }

    /// Stop the heartbeat monitor and close every live connection.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);

        let monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(monitor) = monitor {
            let _ = monitor.shutdown_tx.send(true);
            if let Err(e) = monitor.task.await {
                warn!(error = %e, "heartbeat monitor ended abnormally");
            }
        }

        let closed = self
            .registry
            .snapshot()
            .iter()
            .filter(|conn| self.reap(conn, CloseReason::Shutdown))
            .count();
        info!(closed, "notification hub stopped");
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    // --- admission ---------------------------------------------------------

    /// Apply the per-client and global caps, reserving a slot on success.
    ///
    /// A full hub triggers one sweep before giving up; a client at its own
    /// cap is refused without one.
    pub async fn try_admit(&self, client_key: &str) -> Admission {
        match self.registry.try_reserve(client_key, &self.limits) {
            Admission::RejectedGlobalCap => {}
            decision => return decision,
        }

        let report = self.sweep().await;
        debug!(
            client = %client_key,
            probed = report.probed,
            reaped = report.reaped,
            "global cap reached, swept before re-check"
        );
        self.registry.try_reserve(client_key, &self.limits)
    }

    /// Open a subscription backed by an in-process channel.
    pub async fn subscribe(self: &Arc<Self>, client_key: &str) -> Subscription {
        let (sink, rx) = sink::channel(self.config.channel_capacity.max(MIN_CHANNEL_CAPACITY));
        match self.subscribe_with(client_key, Arc::new(sink)).await {
            Ok(handle) => Subscription::Active {
                events: Box::pin(rx.take_until(handle.closed.cancelled_owned())),
                conn_id: handle.id,
            },
            Err(error) => Subscription::Refused {
                error,
                events: Box::pin(rx),
            },
        }
    }

    /// Admit, greet and register a subscriber that pushes through `sink`.
    ///
    /// On success the subscriber has received `connected` followed by
    /// `lastUpdated` and is in the registry. A rejected subscriber receives a
    /// single `error` event instead and is never registered.
    pub async fn subscribe_with(
        self: &Arc<Self>,
        client_key: &str,
        sink: Arc<dyn EventSink>,
    ) -> Result<ConnectionHandle, SubscribeError> {
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);
        let conn = Arc::new(Connection::new(client_key, sink, idle_timeout));

        if self.is_shutting_down() {
            conn.close(CloseReason::Shutdown);
            return Err(SubscribeError::ShuttingDown);
        }

        let admission = self.try_admit(client_key).await;
        if !admission.is_admitted() {
            self.reject(&conn, admission).await;
            return Err(SubscribeError::Rejected(admission));
        }

        let greeted_with = match self.handshake(&conn).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(conn_id = %conn.id(), client = %client_key, error = %e, "handshake failed");
                conn.close(CloseReason::HandshakeFailed);
                self.registry.cancel_reservation(client_key);
                return Err(SubscribeError::HandshakeFailed(e));
            }
        };

        if self.is_shutting_down() {
            conn.close(CloseReason::Shutdown);
            self.registry.cancel_reservation(client_key);
            return Err(SubscribeError::ShuttingDown);
        }
        if !self.registry.activate(Arc::clone(&conn)) {
            return Err(SubscribeError::HandshakeFailed(PushError::Closed));
        }
        // shutdown may have taken its snapshot between the check above and
        // activation; whichever side reaps first wins
        if self.is_shutting_down() {
            self.reap(&conn, CloseReason::Shutdown);
            return Err(SubscribeError::ShuttingDown);
        }

        // an announce may have landed between the greeting and registration
        let latest = self.last_updated();
        if latest > greeted_with {
            let ev = self.next_event(event::LAST_UPDATED, format_timestamp(&latest));
            if let Err(e) = conn.push(ev, self.push_timeout()).await {
                self.reap(&conn, CloseReason::PushFailed);
                return Err(SubscribeError::HandshakeFailed(e));
            }
        }

        self.spawn_watchdog(Arc::clone(&conn));
        info!(
            conn_id = %conn.id(),
            client = %client_key,
            live = self.registry.len(),
            "subscriber connected"
        );

        Ok(ConnectionHandle {
            id: conn.id().to_string(),
            closed: conn.close_signal(),
        })
    }

    async fn handshake(&self, conn: &Connection) -> Result<DateTime<Utc>, PushError> {
        let timeout = self.push_timeout();
        conn.push(self.next_event(event::CONNECTED, "connected"), timeout)
            .await?;
        let ts = self.last_updated();
        conn.push(
            self.next_event(event::LAST_UPDATED, format_timestamp(&ts)),
            timeout,
        )
        .await?;
        Ok(ts)
    }

    /// Deliver the single `error` event to a refused subscriber, then close it.
    async fn reject(&self, conn: &Connection, admission: Admission) {
        let message = admission
            .rejection_message(&self.limits)
            .unwrap_or_default();
        let timeout = Duration::from_millis(self.config.rejected_timeout_ms);
        if let Err(e) = conn.push(self.next_event(event::ERROR, message), timeout).await {
            debug!(client = %conn.client_key(), error = %e, "could not deliver rejection");
        }
        conn.close(CloseReason::Rejected);
        warn!(
            client = %conn.client_key(),
            decision = ?admission,
            live = self.registry.len(),
            "subscription rejected"
        );
    }

    /// Close on idle timeout, or as soon as the peer drops the stream.
    fn spawn_watchdog(self: &Arc<Self>, conn: Arc<Connection>) {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let closed = conn.close_signal();
            tokio::select! {
                _ = closed.cancelled() => {}
                _ = conn.peer_gone() => {
                    hub.reap(&conn, CloseReason::Completed);
                }
                _ = tokio::time::sleep(conn.idle_timeout()) => {
                    if hub.reap(&conn, CloseReason::IdleTimeout) {
                        debug!(conn_id = %conn.id(), "connection reached idle timeout");
                    }
                }
            }
        });
    }

    // --- removal -----------------------------------------------------------

    /// Close a registered connection and drop it from the registry.
    ///
    /// Safe to call from any number of racing paths: only the first close
    /// touches the registry. Returns true for that first caller.
    pub fn reap(&self, conn: &Connection, reason: CloseReason) -> bool {
        if conn.close(reason).is_none() {
            return false;
        }
        let removed = self.registry.remove(conn);
        if removed {
            debug!(
                conn_id = %conn.id(),
                client = %conn.client_key(),
                %reason,
                live = self.registry.len(),
                "connection reaped"
            );
        }
        removed
    }

    // --- broadcast ---------------------------------------------------------

    /// Record a change and push it to every live subscriber.
    ///
    /// Each connection gets the named event followed by `lastUpdated`, or is
    /// removed. Failures are isolated per connection and never returned.
    pub async fn announce(&self, event_type: &str, payload: &str) -> AnnounceReport {
        let timestamp = self.touch();
        let stamp = format_timestamp(&timestamp);
        let timeout = self.push_timeout();

        let snapshot = self.registry.snapshot();
        let results = join_all(snapshot.iter().map(|conn| {
            let change = self.next_event(event_type, payload);
            let clock = self.next_event(event::LAST_UPDATED, stamp.clone());
            async move {
                conn.push(change, timeout).await?;
                conn.push(clock, timeout).await
            }
        }))
        .await;

        let mut failed = 0;
        let mut reaped = 0;
        for (conn, result) in snapshot.iter().zip(results) {
            if let Err(e) = result {
                debug!(conn_id = %conn.id(), error = %e, "broadcast push failed");
                failed += 1;
                if self.reap(conn, CloseReason::PushFailed) {
                    reaped += 1;
                }
            }
        }

        let delivered = snapshot.len() - failed;
        if reaped > 0 {
            info!(count = reaped, "dead connections removed during broadcast");
        }
        info!(
            event = %event_type,
            delivered,
            live = self.registry.len(),
            "broadcast sent"
        );

        AnnounceReport {
            timestamp,
            delivered,
            reaped,
        }
    }

    // --- probing -----------------------------------------------------------

    /// One heartbeat pass. Returns `None` if another pass is already running.
    pub async fn heartbeat(&self) -> Option<SweepReport> {
        let Ok(_gate) = self.sweep_gate.try_lock() else {
            debug!("probe pass already running, heartbeat skipped");
            return None;
        };
        Some(self.probe_all(event::HEARTBEAT, "heartbeat").await)
    }

    /// Opportunistic sweep used by admission. Waits for a running pass to
    /// finish rather than skipping, so the re-check sees fresh state.
    pub async fn sweep(&self) -> SweepReport {
        let _gate = self.sweep_gate.lock().await;
        self.probe_all(event::PING, "").await
    }

    async fn probe_all(&self, name: &str, data: &str) -> SweepReport {
        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            return SweepReport::default();
        }

        let timeout = self.push_timeout();
        let results = join_all(
            snapshot
                .iter()
                .map(|conn| conn.push(self.next_event(name, data), timeout)),
        )
        .await;

        let reaped = snapshot
            .iter()
            .zip(results)
            .filter(|(_, result)| result.is_err())
            .filter(|(conn, _)| self.reap(conn, CloseReason::HeartbeatFailed))
            .count();

        if reaped > 0 {
            info!(
                probe = %name,
                reaped,
                live = self.registry.len(),
                "unresponsive connections removed"
            );
        }

        SweepReport {
            probed: snapshot.len(),
            reaped,
        }
    }
}
