//! Storage abstraction layer for the Mercurio MQTT broker.
//!
//! This crate defines the contracts the protocol processor uses for
//! everything that outlives a single packet: stored publish payloads,
//! retained messages, per-client session state, and the live connection
//! registry. Implementations may be in-memory or durable; the only
//! requirement is that mutations are visible to the calling task before
//! the method returns (see [`MessageStore`] and [`SessionStore`]).

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use mercurio_core::qos::QoS;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Opaque identifier for a [`StoredMessage`], assigned at store time.
pub type Guid = uuid::Uuid;

/// A publish payload persisted so it can be referenced by guid from
/// sessions' enqueued/in-flight/second-phase state and the retained map.
///
/// Payload bytes are immutable after storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub guid: Guid,
    pub publisher_client_id: String,
    pub topic: String,
    pub qos: QoS,
    pub payload: Bytes,
    pub retained: bool,
    pub packet_id: Option<u16>,
}

/// Will message for persistence, attached to a client-id at CONNECT time.
#[derive(Debug, Clone)]
pub struct StoredWillMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Content-addressed storage of payloads pending QoS 1/2 delivery, plus the
/// retained-message map (topic -> latest retained guid).
///
/// Corresponds to spec component 4.3 ("Message store").
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist `msg`, returning its guid. `msg.guid` is ignored and
    /// replaced with a freshly allocated one.
    async fn store_publish_for_future(&self, msg: StoredMessage) -> Result<Guid>;

    /// Fetch a previously stored message by guid.
    async fn retrieve(&self, guid: Guid) -> Result<StoredMessage>;

    /// Drop a stored message once no session references it. Safe to call
    /// on a guid that is still retained or still referenced; callers are
    /// responsible for only calling this once all references are gone.
    async fn discard(&self, guid: Guid) -> Result<()>;

    /// Clear the retained entry for a topic, if any.
    async fn clean_retained(&self, topic: &str) -> Result<()>;

    /// Point the retained map for `topic` at `guid`, replacing any prior
    /// retained guid for that topic.
    async fn store_retained(&self, topic: &str, guid: Guid) -> Result<()>;

    /// Scan retained entries and return those whose topic matches
    /// `filter` under the MQTT wildcard rules.
    async fn search_matching(&self, filter: &str) -> Result<Vec<StoredMessage>>;
}

/// A subscription recorded against a session: the requested QoS for one
/// topic filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub qos: QoS,
}

/// Per-client persistent state tracked by a [`SessionStore`].
///
/// Corresponds to the `ClientSession` data model in spec section 3.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub client_id: String,
    pub clean_session: bool,
    pub active: bool,
    pub enqueued_for_delivery: Vec<Guid>,
    pub in_flight: std::collections::HashMap<u16, Guid>,
    pub second_phase: std::collections::HashSet<u16>,
    /// QoS 2 publishes received from this client, keyed by the packet-id
    /// it arrived with, recovered on PUBREL to drive routing.
    pub qos2_pending: std::collections::HashMap<u16, Guid>,
    pub subscriptions: std::collections::HashMap<String, Subscription>,
    pub next_packet_id: u16,
}

impl ClientSession {
    fn new(client_id: String, clean_session: bool) -> Self {
        ClientSession {
            client_id,
            clean_session,
            active: false,
            enqueued_for_delivery: Vec::new(),
            in_flight: std::collections::HashMap::new(),
            second_phase: std::collections::HashSet::new(),
            qos2_pending: std::collections::HashMap::new(),
            subscriptions: std::collections::HashMap::new(),
            next_packet_id: 1,
        }
    }

    /// Clear all state, returning every guid this session was holding a
    /// reference to (enqueued, in-flight, and QoS-2-pending), so the
    /// caller can release those references in the message store.
    fn purge(&mut self) -> Vec<Guid> {
        let mut released: Vec<Guid> = self.enqueued_for_delivery.drain(..).collect();
        released.extend(self.in_flight.drain().map(|(_, guid)| guid));
        released.extend(self.qos2_pending.drain().map(|(_, guid)| guid));
        self.second_phase.clear();
        self.subscriptions.clear();
        self.next_packet_id = 1;
        released
    }
}

/// Per-client persistent session state: subscriptions, enqueued-for-offline
/// messages, in-flight (awaiting ack) messages, QoS-2 second-phase set,
/// packet-id generator, active/inactive flag, and the will message.
///
/// Corresponds to spec component 4.4 ("Session store").
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn session_for_client(&self, client_id: &str) -> Result<Option<ClientSession>>;

    /// Create (or reset, if `clean_session`) the session for `client_id`.
    async fn create_new_session(&self, client_id: &str, clean_session: bool) -> Result<()>;

    /// Allocate the next packet id for `client_id`: monotonic modulo
    /// 2^16, skipping 0 and any id currently in in-flight or second-phase.
    async fn next_packet_id(&self, client_id: &str) -> Result<u16>;

    async fn enqueue_to_deliver(&self, client_id: &str, guid: Guid) -> Result<()>;

    /// Ordered view of the offline queue, oldest first.
    async fn stored_messages(&self, client_id: &str) -> Result<Vec<Guid>>;

    async fn remove_enqueued(&self, client_id: &str, guid: Guid) -> Result<()>;

    async fn in_flight_ack_waiting(
        &self,
        client_id: &str,
        guid: Guid,
        packet_id: u16,
    ) -> Result<()>;

    /// Remove the in-flight entry for `packet_id`, returning the guid it
    /// pointed to. Called on PUBACK or PUBREC.
    async fn in_flight_acknowledged(&self, client_id: &str, packet_id: u16) -> Result<Guid>;

    /// Move `packet_id` from in-flight to second-phase. Called on PUBREC.
    async fn second_phase_ack_waiting(&self, client_id: &str, packet_id: u16) -> Result<()>;

    /// Remove `packet_id` from second-phase. Called on PUBCOMP.
    async fn second_phase_acknowledged(&self, client_id: &str, packet_id: u16) -> Result<()>;

    /// Record a QoS 2 publish received from `client_id` under its own
    /// packet-id, awaiting PUBREL.
    async fn store_qos2_pending(&self, client_id: &str, packet_id: u16, guid: Guid) -> Result<()>;

    /// Recover the guid of a QoS 2 publish by the packet-id it arrived
    /// with. Called on PUBREL; the entry is removed.
    async fn stored_message(&self, client_id: &str, packet_id: u16) -> Result<Guid>;

    async fn subscribe_to(&self, client_id: &str, filter: &str, qos: QoS) -> Result<()>;

    async fn unsubscribe_from(&self, client_id: &str, filter: &str) -> Result<()>;

    async fn activate(&self, client_id: &str) -> Result<()>;

    async fn deactivate(&self, client_id: &str) -> Result<()>;

    /// Clear all state for `client_id` (subscriptions, enqueued, in-flight,
    /// second-phase) but keep the session row itself. Used by CONNECT with
    /// `cleanSession=true`.
    async fn clean_session(&self, client_id: &str) -> Result<()>;

    /// Remove the session entirely. Used once a clean-session client
    /// disconnects or is evicted.
    async fn disconnect(&self, client_id: &str) -> Result<()>;

    async fn store_will(&self, client_id: &str, will: StoredWillMessage) -> Result<()>;

    async fn take_will(&self, client_id: &str) -> Result<Option<StoredWillMessage>>;

    async fn delete_will(&self, client_id: &str) -> Result<()>;
}

/// Combined trait for full MQTT storage functionality.
pub trait MqttStore: MessageStore + SessionStore {}

impl<T> MqttStore for T where T: MessageStore + SessionStore {}
