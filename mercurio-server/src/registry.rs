use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use mercurio_packets::ControlPacket;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A live client's outbound channel plus the connection metadata the
/// processor needs: keep-alive and the clean-session flag negotiated at
/// CONNECT time.
///
/// Writes go through `sender` which is non-blocking from the processor's
/// point of view — the call returns once the packet is enqueued.
#[derive(Clone, Debug)]
pub(crate) struct ConnectionDescriptor {
    id: Uuid,
    sender: mpsc::UnboundedSender<ControlPacket>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
}

impl ConnectionDescriptor {
    pub fn new(
        sender: mpsc::UnboundedSender<ControlPacket>,
        keep_alive_secs: u16,
        clean_session: bool,
    ) -> Self {
        ConnectionDescriptor {
            id: Uuid::new_v4(),
            sender,
            keep_alive_secs,
            clean_session,
        }
    }

    /// Enqueue a packet for delivery. A closed channel (client already
    /// gone) is not fatal to the caller; per spec this is an
    /// unknown-client race and should be logged and skipped.
    pub fn send(&self, packet: ControlPacket) -> Result<(), ControlPacket> {
        self.sender.send(packet).map_err(|e| e.0)
    }
}

impl PartialEq for ConnectionDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Concurrent map from client-id to live connection descriptor.
///
/// Corresponds to spec component 4.5.
#[derive(Clone, Default)]
pub(crate) struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<String, ConnectionDescriptor>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `descriptor` for `client_id`, returning the descriptor it
    /// replaced, if any (the caller is responsible for closing it via the
    /// connection-lost path with `sessionStolen=true`).
    pub fn put(&self, client_id: &str, descriptor: ConnectionDescriptor) -> Option<ConnectionDescriptor> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(client_id.to_string(), descriptor)
    }

    pub fn get(&self, client_id: &str) -> Option<ConnectionDescriptor> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(client_id)
            .cloned()
    }

    pub fn remove(&self, client_id: &str) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(client_id);
    }

    /// Remove `client_id`'s entry only if it still points at `descriptor`.
    /// Prevents a late connection-lost callback for an already-replaced
    /// descriptor from evicting a newer connection. Returns `true` if the
    /// entry was removed.
    pub fn remove_if_matches(&self, client_id: &str, descriptor: &ConnectionDescriptor) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match map.get(client_id) {
            Some(current) if current == descriptor => {
                map.remove(client_id);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> (ConnectionDescriptor, mpsc::UnboundedReceiver<ControlPacket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionDescriptor::new(tx, 60, true), rx)
    }

    #[test]
    fn put_then_get_roundtrips() {
        let registry = ConnectionRegistry::new();
        let (d, _rx) = descriptor();
        registry.put("c1", d);
        assert!(registry.get("c1").is_some());
    }

    #[test]
    fn put_evicts_prior_descriptor() {
        let registry = ConnectionRegistry::new();
        let (d1, _rx1) = descriptor();
        let (d2, _rx2) = descriptor();
        let evicted = registry.put("c1", d1.clone());
        assert!(evicted.is_none());
        let evicted = registry.put("c1", d2);
        assert!(evicted.is_some());
        assert_eq!(evicted.unwrap(), d1);
    }

    #[test]
    fn remove_if_matches_ignores_stale_descriptor() {
        let registry = ConnectionRegistry::new();
        let (d1, _rx1) = descriptor();
        let (d2, _rx2) = descriptor();
        registry.put("c1", d1.clone());
        registry.put("c1", d2.clone());

        // d1 is stale now; remove_if_matches must not evict d2.
        assert!(!registry.remove_if_matches("c1", &d1));
        assert!(registry.get("c1").is_some());

        assert!(registry.remove_if_matches("c1", &d2));
        assert!(registry.get("c1").is_none());
    }
}
