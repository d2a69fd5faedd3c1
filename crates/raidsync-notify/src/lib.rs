//! `raidsync-notify`: in-memory server-push hub for change notifications.
//!
//! # Overview
//!
//! Subscribers hold a long-lived stream of named text events. Write paths call
//! [`Hub::announce`] after a successful commit; the hub records the change time
//! and fans the event out to every live connection. A background
//! [`heartbeat::HeartbeatMonitor`] probes connections on a fixed period and
//! reaps the ones whose peer has disappeared.
//!
//! # Limits
//!
//! | Cap             | Behaviour when reached                                  |
//! |-----------------|---------------------------------------------------------|
//! | per client key  | reject immediately with one `error` event               |
//! | global          | run one sweep, re-check, then reject if still full      |
//!
//! Nothing is persisted: history is lost on restart and offline clients get
//! no replay.

pub mod admission;
pub mod client_key;
pub mod connection;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod hub;
pub mod registry;
pub mod sink;

pub use admission::{Admission, Limits};
pub use client_key::resolve_client_key;
pub use connection::{CloseReason, ConnState, Connection};
pub use error::{PushError, SubscribeError};
pub use event::HubEvent;
pub use hub::{AnnounceReport, ConnectionHandle, EventStream, Hub, Subscription, SweepReport};
pub use registry::Registry;
pub use sink::{ChannelSink, EventSink};
