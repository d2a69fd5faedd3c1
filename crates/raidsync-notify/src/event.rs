use chrono::{DateTime, SecondsFormat, Utc};

/// Sent once when a subscription is accepted.
pub const CONNECTED: &str = "connected";
/// Carries the hub's last-change timestamp.
pub const LAST_UPDATED: &str = "lastUpdated";
/// Periodic liveness probe sent by the heartbeat monitor.
pub const HEARTBEAT: &str = "heartbeat";
/// Probe sent by the admission sweep when the global cap is reached.
pub const PING: &str = "ping";
/// Sent once to a rejected subscriber.
pub const ERROR: &str = "error";

/// A named text event pushed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubEvent {
    /// Hub-wide sequence number, sent as the SSE `id:` field.
    pub id: u64,
    pub name: String,
    pub data: String,
}

impl HubEvent {
    pub fn new(id: u64, name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Wire format of every timestamp the hub publishes.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_are_rfc3339_utc_with_millis() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_timestamp(&ts), "2026-03-04T05:06:07.000Z");
        assert_eq!(DateTime::parse_from_rfc3339(&format_timestamp(&ts)).unwrap(), ts);
    }
}
