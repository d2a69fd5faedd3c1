use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    admission::{Admission, Limits},
    connection::Connection,
};

/// Live connections plus per-client counters, behind one lock.
///
/// Every insert, removal, increment and decrement happens inside a single
/// critical section, so `live.len()` always equals the sum of the counters
/// once reservations have settled. The lock is never held across an await.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    live: HashMap<String, Arc<Connection>>,
    per_client: HashMap<String, usize>,
    /// Admitted subscriptions still running their handshake.
    reserved: usize,
}

impl RegistryInner {
    fn decrement(&mut self, client_key: &str) {
        if let Some(n) = self.per_client.get_mut(client_key) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.per_client.remove(client_key);
            }
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // a panic elsewhere never leaves the maps half-updated; keep serving
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check both caps and, if they allow it, count the client and reserve a
    /// global slot in the same critical section.
    pub fn try_reserve(&self, client_key: &str, limits: &Limits) -> Admission {
        let mut inner = self.lock();
        let current = inner.per_client.get(client_key).copied().unwrap_or(0);
        if current >= limits.max_per_client {
            return Admission::RejectedPerClientCap;
        }
        if inner.live.len() + inner.reserved >= limits.max_connections {
            return Admission::RejectedGlobalCap;
        }
        *inner.per_client.entry(client_key.to_string()).or_insert(0) += 1;
        inner.reserved += 1;
        Admission::Admitted
    }

    /// Turn a reservation into a live entry and mark the connection active.
    ///
    /// Returns false (and releases the reservation) if the connection was
    /// closed before it could be registered.
    pub fn activate(&self, conn: Arc<Connection>) -> bool {
        let mut inner = self.lock();
        inner.reserved = inner.reserved.saturating_sub(1);
        if !conn.activate() {
            inner.decrement(conn.client_key());
            return false;
        }
        inner.live.insert(conn.id().to_string(), conn);
        true
    }

    /// Give back a reservation whose handshake never completed.
    pub fn cancel_reservation(&self, client_key: &str) {
        let mut inner = self.lock();
        inner.reserved = inner.reserved.saturating_sub(1);
        inner.decrement(client_key);
    }

    /// Remove a live connection and decrement its client's counter.
    /// Returns false if it was not registered.
    pub fn remove(&self, conn: &Connection) -> bool {
        let mut inner = self.lock();
        if inner.live.remove(conn.id()).is_none() {
            return false;
        }
        inner.decrement(conn.client_key());
        true
    }

    /// Copy of the live set, safe to iterate while others mutate the registry.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.lock().live.values().cloned().collect()
    }

    pub fn contains(&self, conn_id: &str) -> bool {
        self.lock().live.contains_key(conn_id)
    }

    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn client_count(&self, client_key: &str) -> usize {
        self.lock().per_client.get(client_key).copied().unwrap_or(0)
    }

    /// Sum of all per-client counters, including pending reservations.
    pub fn counted_total(&self) -> usize {
        self.lock().per_client.values().sum()
    }

    pub fn tracked_clients(&self) -> usize {
        self.lock().per_client.len()
    }

    pub fn reserved(&self) -> usize {
        self.lock().reserved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connection::CloseReason, sink::channel};
    use std::time::Duration;

    const LIMITS: Limits = Limits {
        max_connections: 3,
        max_per_client: 2,
    };

    fn conn(key: &str) -> Arc<Connection> {
        let (sink, _rx) = channel(1);
        Arc::new(Connection::new(key, Arc::new(sink), Duration::from_secs(60)))
    }

    fn admit(reg: &Registry, key: &str) -> Option<Arc<Connection>> {
        if !reg.try_reserve(key, &LIMITS).is_admitted() {
            return None;
        }
        let c = conn(key);
        assert!(reg.activate(c.clone()));
        Some(c)
    }

    #[test]
    fn per_client_cap_checked_before_global() {
        let reg = Registry::new();
        admit(&reg, "a").unwrap();
        admit(&reg, "a").unwrap();
        admit(&reg, "b").unwrap();
        // both caps are hit; per-client wins
        assert_eq!(reg.try_reserve("a", &LIMITS), Admission::RejectedPerClientCap);
        assert_eq!(reg.try_reserve("c", &LIMITS), Admission::RejectedGlobalCap);
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.counted_total(), 3);
    }

    #[test]
    fn reservations_count_toward_global_cap() {
        let reg = Registry::new();
        for key in ["a", "b", "c"] {
            assert!(reg.try_reserve(key, &LIMITS).is_admitted());
        }
        assert_eq!(reg.reserved(), 3);
        assert_eq!(reg.try_reserve("d", &LIMITS), Admission::RejectedGlobalCap);

        reg.cancel_reservation("a");
        assert_eq!(reg.reserved(), 2);
        assert_eq!(reg.client_count("a"), 0);
        assert!(reg.try_reserve("d", &LIMITS).is_admitted());
    }

    #[test]
    fn removal_is_counted_once() {
        let reg = Registry::new();
        let c = admit(&reg, "a").unwrap();
        admit(&reg, "a").unwrap();

        assert!(reg.remove(&c));
        assert!(!reg.remove(&c));
        assert_eq!(reg.client_count("a"), 1);
        assert_eq!(reg.len(), reg.counted_total());
    }

    #[test]
    fn zero_counts_are_dropped_from_the_map() {
        let reg = Registry::new();
        let c = admit(&reg, "a").unwrap();
        assert_eq!(reg.tracked_clients(), 1);
        reg.remove(&c);
        assert_eq!(reg.tracked_clients(), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn closed_connection_is_not_registered() {
        let reg = Registry::new();
        assert!(reg.try_reserve("a", &LIMITS).is_admitted());
        let c = conn("a");
        c.close(CloseReason::Shutdown);
        assert!(!reg.activate(c.clone()));
        assert!(!reg.contains(c.id()));
        assert_eq!(reg.reserved(), 0);
        assert_eq!(reg.client_count("a"), 0);
    }
}
