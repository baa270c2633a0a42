//! In-memory storage backend.
//!
//! Thread-safe, suitable for development, testing, and single-node
//! deployments where persistence across restarts is not required.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use mercurio_core::{qos::QoS, topic};

use crate::{
    ClientSession, Guid, MessageStore, Result, SessionStore, StorageError, StoredMessage,
    StoredWillMessage, Subscription,
};

/// In-memory storage backend implementing [`MessageStore`] and
/// [`SessionStore`]. All data is lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    messages: HashMap<Guid, StoredMessage>,
    /// Reference count per stored guid. A message is removed once this
    /// drops to zero. `store_publish_for_future` starts a guid at 1,
    /// representing the caller's own transient use of it (the routing
    /// pass); the caller releases that use with `discard` once routing
    /// is done, same as any other holder (retained/enqueued/in-flight).
    refcounts: HashMap<Guid, usize>,
    retained: HashMap<String, Guid>,
    sessions: HashMap<String, ClientSession>,
    wills: HashMap<String, StoredWillMessage>,
}

fn acquire_ref(inner: &mut Inner, guid: Guid) {
    *inner.refcounts.entry(guid).or_insert(0) += 1;
}

fn release_ref(inner: &mut Inner, guid: Guid) {
    if let Some(count) = inner.refcounts.get_mut(&guid) {
        if *count <= 1 {
            inner.refcounts.remove(&guid);
            inner.messages.remove(&guid);
        } else {
            *count -= 1;
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn store_publish_for_future(&self, mut msg: StoredMessage) -> Result<Guid> {
        let guid = Guid::new_v4();
        msg.guid = guid;
        let mut inner = self.lock_write();
        inner.messages.insert(guid, msg);
        acquire_ref(&mut inner, guid);
        Ok(guid)
    }

    async fn retrieve(&self, guid: Guid) -> Result<StoredMessage> {
        self.lock_read()
            .messages
            .get(&guid)
            .cloned()
            .ok_or_else(|| StorageError::MessageNotFound(guid.to_string()))
    }

    async fn discard(&self, guid: Guid) -> Result<()> {
        release_ref(&mut self.lock_write(), guid);
        Ok(())
    }

    async fn clean_retained(&self, topic: &str) -> Result<()> {
        let mut inner = self.lock_write();
        if let Some(old) = inner.retained.remove(topic) {
            release_ref(&mut inner, old);
        }
        Ok(())
    }

    async fn store_retained(&self, topic: &str, guid: Guid) -> Result<()> {
        let mut inner = self.lock_write();
        acquire_ref(&mut inner, guid);
        if let Some(old) = inner.retained.insert(topic.to_string(), guid) {
            if old != guid {
                release_ref(&mut inner, old);
            }
        }
        Ok(())
    }

    async fn search_matching(&self, filter: &str) -> Result<Vec<StoredMessage>> {
        let inner = self.lock_read();
        let mut out = Vec::new();
        for (stored_topic, guid) in inner.retained.iter() {
            if topic::matches(stored_topic, filter) {
                if let Some(msg) = inner.messages.get(guid) {
                    out.push(msg.clone());
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn session_for_client(&self, client_id: &str) -> Result<Option<ClientSession>> {
        Ok(self.lock_read().sessions.get(client_id).cloned())
    }

    async fn create_new_session(&self, client_id: &str, clean_session: bool) -> Result<()> {
        let mut inner = self.lock_write();
        match inner.sessions.get_mut(client_id) {
            Some(existing) if !clean_session => {
                existing.clean_session = false;
            }
            _ => {
                inner.sessions.insert(
                    client_id.to_string(),
                    ClientSession::new(client_id.to_string(), clean_session),
                );
            }
        }
        Ok(())
    }

    async fn next_packet_id(&self, client_id: &str) -> Result<u16> {
        let mut inner = self.lock_write();
        let session = inner
            .sessions
            .get_mut(client_id)
            .ok_or_else(|| StorageError::SessionNotFound(client_id.to_string()))?;

        let taken = |s: &ClientSession, id: u16| {
            s.in_flight.contains_key(&id) || s.second_phase.contains(&id)
        };

        let start = session.next_packet_id;
        let mut candidate = start;
        loop {
            candidate = candidate.wrapping_add(1);
            if candidate == 0 {
                candidate = 1;
            }
            if !taken(session, candidate) {
                break;
            }
            if candidate == start {
                return Err(StorageError::OperationFailed(
                    "packet-id space exhausted".into(),
                ));
            }
        }
        session.next_packet_id = candidate;
        Ok(candidate)
    }

    async fn enqueue_to_deliver(&self, client_id: &str, guid: Guid) -> Result<()> {
        let mut inner = self.lock_write();
        {
            let session = inner
                .sessions
                .get_mut(client_id)
                .ok_or_else(|| StorageError::SessionNotFound(client_id.to_string()))?;
            session.enqueued_for_delivery.push(guid);
        }
        acquire_ref(&mut inner, guid);
        Ok(())
    }

    async fn stored_messages(&self, client_id: &str) -> Result<Vec<Guid>> {
        Ok(self
            .lock_read()
            .sessions
            .get(client_id)
            .map(|s| s.enqueued_for_delivery.clone())
            .unwrap_or_default())
    }

    async fn remove_enqueued(&self, client_id: &str, guid: Guid) -> Result<()> {
        let mut inner = self.lock_write();
        let removed = {
            let session = inner
                .sessions
                .get_mut(client_id)
                .ok_or_else(|| StorageError::SessionNotFound(client_id.to_string()))?;
            let before = session.enqueued_for_delivery.len();
            session.enqueued_for_delivery.retain(|g| *g != guid);
            before != session.enqueued_for_delivery.len()
        };
        if removed {
            release_ref(&mut inner, guid);
        }
        Ok(())
    }

    async fn in_flight_ack_waiting(
        &self,
        client_id: &str,
        guid: Guid,
        packet_id: u16,
    ) -> Result<()> {
        let mut inner = self.lock_write();
        {
            let session = inner
                .sessions
                .get_mut(client_id)
                .ok_or_else(|| StorageError::SessionNotFound(client_id.to_string()))?;
            session.in_flight.insert(packet_id, guid);
        }
        acquire_ref(&mut inner, guid);
        Ok(())
    }

    async fn in_flight_acknowledged(&self, client_id: &str, packet_id: u16) -> Result<Guid> {
        let mut inner = self.lock_write();
        let guid = {
            let session = inner
                .sessions
                .get_mut(client_id)
                .ok_or_else(|| StorageError::SessionNotFound(client_id.to_string()))?;
            session.in_flight.remove(&packet_id).ok_or_else(|| {
                StorageError::OperationFailed(format!("no in-flight id {packet_id}"))
            })?
        };
        release_ref(&mut inner, guid);
        Ok(guid)
    }

    async fn second_phase_ack_waiting(&self, client_id: &str, packet_id: u16) -> Result<()> {
        let mut inner = self.lock_write();
        let guid = {
            let session = inner
                .sessions
                .get_mut(client_id)
                .ok_or_else(|| StorageError::SessionNotFound(client_id.to_string()))?;
            let guid = session.in_flight.remove(&packet_id);
            session.second_phase.insert(packet_id);
            guid
        };
        // The payload isn't needed again once the handshake reaches
        // second phase; only the packet-id is replayed on reconnect.
        if let Some(guid) = guid {
            release_ref(&mut inner, guid);
        }
        Ok(())
    }

    async fn second_phase_acknowledged(&self, client_id: &str, packet_id: u16) -> Result<()> {
        self.with_session_mut(client_id, |s| {
            s.second_phase.remove(&packet_id);
        })
    }

    async fn store_qos2_pending(&self, client_id: &str, packet_id: u16, guid: Guid) -> Result<()> {
        let mut inner = self.lock_write();
        {
            let session = inner
                .sessions
                .get_mut(client_id)
                .ok_or_else(|| StorageError::SessionNotFound(client_id.to_string()))?;
            session.qos2_pending.insert(packet_id, guid);
        }
        acquire_ref(&mut inner, guid);
        Ok(())
    }

    async fn stored_message(&self, client_id: &str, packet_id: u16) -> Result<Guid> {
        let mut inner = self.lock_write();
        let session = inner
            .sessions
            .get_mut(client_id)
            .ok_or_else(|| StorageError::SessionNotFound(client_id.to_string()))?;
        // Removing the qos2_pending holder does not release the guid's
        // reference: it transfers to the caller's own routing pass, which
        // must release it with `discard` once routing completes, exactly
        // like a freshly stored message.
        session
            .qos2_pending
            .remove(&packet_id)
            .ok_or_else(|| StorageError::OperationFailed(format!("no QoS2 pending id {packet_id}")))
    }

    async fn subscribe_to(&self, client_id: &str, filter: &str, qos: QoS) -> Result<()> {
        self.with_session_mut(client_id, |s| {
            s.subscriptions.insert(filter.to_string(), Subscription { qos });
        })
    }

    async fn unsubscribe_from(&self, client_id: &str, filter: &str) -> Result<()> {
        self.with_session_mut(client_id, |s| {
            s.subscriptions.remove(filter);
        })
    }

    async fn activate(&self, client_id: &str) -> Result<()> {
        self.with_session_mut(client_id, |s| s.active = true)
    }

    async fn deactivate(&self, client_id: &str) -> Result<()> {
        self.with_session_mut(client_id, |s| s.active = false)
    }

    async fn clean_session(&self, client_id: &str) -> Result<()> {
        let mut inner = self.lock_write();
        let released = {
            let session = inner
                .sessions
                .get_mut(client_id)
                .ok_or_else(|| StorageError::SessionNotFound(client_id.to_string()))?;
            session.purge()
        };
        for guid in released {
            release_ref(&mut inner, guid);
        }
        Ok(())
    }

    async fn disconnect(&self, client_id: &str) -> Result<()> {
        let mut inner = self.lock_write();
        if let Some(mut session) = inner.sessions.remove(client_id) {
            let released = session.purge();
            for guid in released {
                release_ref(&mut inner, guid);
            }
        }
        Ok(())
    }

    async fn store_will(&self, client_id: &str, will: StoredWillMessage) -> Result<()> {
        self.lock_write().wills.insert(client_id.to_string(), will);
        Ok(())
    }

    async fn take_will(&self, client_id: &str) -> Result<Option<StoredWillMessage>> {
        Ok(self.lock_write().wills.remove(client_id))
    }

    async fn delete_will(&self, client_id: &str) -> Result<()> {
        self.lock_write().wills.remove(client_id);
        Ok(())
    }
}

impl MemoryStore {
    fn with_session_mut<F, R>(&self, client_id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut ClientSession) -> R,
    {
        let mut inner = self.lock_write();
        let session = inner
            .sessions
            .get_mut(client_id)
            .ok_or_else(|| StorageError::SessionNotFound(client_id.to_string()))?;
        Ok(f(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn msg(topic: &str, payload: &str, qos: QoS, retained: bool) -> StoredMessage {
        StoredMessage {
            guid: Guid::nil(),
            publisher_client_id: "pub".to_string(),
            topic: topic.to_string(),
            qos,
            payload: Bytes::from(payload.to_string()),
            retained,
            packet_id: None,
        }
    }

    #[tokio::test]
    async fn store_and_retrieve_roundtrip() {
        let store = MemoryStore::new();
        let guid = store
            .store_publish_for_future(msg("a/b", "hi", QoS::AtLeastOnce, false))
            .await
            .unwrap();

        let fetched = store.retrieve(guid).await.unwrap();
        assert_eq!(fetched.topic, "a/b");
        assert_eq!(fetched.payload.as_ref(), b"hi");
    }

    #[tokio::test]
    async fn retained_replaced_and_cleared() {
        let store = MemoryStore::new();
        let g1 = store
            .store_publish_for_future(msg("news", "first", QoS::AtLeastOnce, true))
            .await
            .unwrap();
        store.store_retained("news", g1).await.unwrap();

        let g2 = store
            .store_publish_for_future(msg("news", "second", QoS::AtLeastOnce, true))
            .await
            .unwrap();
        store.store_retained("news", g2).await.unwrap();

        let found = store.search_matching("news").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].payload.as_ref(), b"second");

        store.clean_retained("news").await.unwrap();
        assert!(store.search_matching("news").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_matching_respects_wildcards() {
        let store = MemoryStore::new();
        for (t, p) in [("sensors/temp/a", "1"), ("sensors/temp/b", "2"), ("sensors/humidity/a", "3")] {
            let g = store
                .store_publish_for_future(msg(t, p, QoS::AtMostOnce, true))
                .await
                .unwrap();
            store.store_retained(t, g).await.unwrap();
        }

        assert_eq!(store.search_matching("sensors/temp/+").await.unwrap().len(), 2);
        assert_eq!(store.search_matching("sensors/#").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn packet_id_allocation_skips_zero_and_taken_ids() {
        let store = MemoryStore::new();
        store.create_new_session("c1", false).await.unwrap();

        let id1 = store.next_packet_id("c1").await.unwrap();
        assert_ne!(id1, 0);

        store
            .in_flight_ack_waiting("c1", Guid::nil(), id1)
            .await
            .unwrap();
        let id2 = store.next_packet_id("c1").await.unwrap();
        assert_ne!(id2, id1);
        assert_ne!(id2, 0);
    }

    #[tokio::test]
    async fn clean_session_purges_state() {
        let store = MemoryStore::new();
        store.create_new_session("c1", false).await.unwrap();
        store.subscribe_to("c1", "x", QoS::AtMostOnce).await.unwrap();
        store.enqueue_to_deliver("c1", Guid::nil()).await.unwrap();

        store.clean_session("c1").await.unwrap();

        let session = store.session_for_client("c1").await.unwrap().unwrap();
        assert!(session.subscriptions.is_empty());
        assert!(session.enqueued_for_delivery.is_empty());
    }

    #[tokio::test]
    async fn qos2_handshake_state_transitions() {
        let store = MemoryStore::new();
        store.create_new_session("pub", false).await.unwrap();

        store.store_qos2_pending("pub", 7, Guid::nil()).await.unwrap();
        let guid = store.stored_message("pub", 7).await.unwrap();
        assert_eq!(guid, Guid::nil());

        // consumed once
        assert!(store.stored_message("pub", 7).await.is_err());
    }

    #[tokio::test]
    async fn message_survives_until_last_reference_released() {
        let store = MemoryStore::new();
        store.create_new_session("sub", false).await.unwrap();

        let guid = store
            .store_publish_for_future(msg("a/b", "hi", QoS::AtLeastOnce, true))
            .await
            .unwrap();
        store.store_retained("a/b", guid).await.unwrap();
        store.enqueue_to_deliver("sub", guid).await.unwrap();

        // Release the publish pipeline's own transient reference; the
        // message must survive because retained + enqueued still hold it.
        store.discard(guid).await.unwrap();
        assert!(store.retrieve(guid).await.is_ok());

        store.remove_enqueued("sub", guid).await.unwrap();
        assert!(store.retrieve(guid).await.is_ok(), "still retained");

        store.clean_retained("a/b").await.unwrap();
        assert!(
            store.retrieve(guid).await.is_err(),
            "last reference released, message should be gone"
        );
    }

    #[tokio::test]
    async fn will_store_roundtrip() {
        let store = MemoryStore::new();
        let will = StoredWillMessage {
            topic: "obit".to_string(),
            payload: Bytes::from("gone"),
            qos: QoS::AtMostOnce,
            retain: false,
        };
        store.store_will("c1", will).await.unwrap();
        let taken = store.take_will("c1").await.unwrap();
        assert!(taken.is_some());
        assert!(store.take_will("c1").await.unwrap().is_none());
    }
}
