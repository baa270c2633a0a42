//! Protocol processor: drives each connection through the MQTT state
//! machine, routes publishes to subscribers and keeps session state in
//! sync with the configured stores.
//!
//! Corresponds to spec component 4.6. The processor is stateless beyond
//! the stores, registry, and subscription index it's built with; all
//! mutable state lives behind those. Handlers never block the calling
//! task on transport I/O — outbound packets go through a
//! `ConnectionDescriptor`'s channel, which is non-blocking from here.

use std::sync::Arc;

use tracing::{debug, info, warn};

use mercurio_core::{protocol::ProtocolVersion, qos::QoS, reason::ReasonCode, topic};
use mercurio_packets::{
    connack::{ConnAckFlags, ConnAckPacket, ConnAckReturnCode},
    connect::ConnectPacket,
    puback::PubAckPacket,
    pubcomp::PubCompPacket,
    publish::PublishPacket,
    pubrec::PubRecPacket,
    pubrel::PubRelPacket,
    suback::{SubAckPacket, SubAckPayload},
    subscribe::SubscribePacket,
    unsuback::UnsubAckPacket,
    unsubscribe::UnsubscribePacket,
    ControlPacket,
};
use mercurio_storage::{Guid, MqttStore, StoredMessage, StoredWillMessage};

use crate::{
    auth::{Authenticator, Authorizator},
    error::{Result, ServerError},
    interceptor::InterceptorRegistry,
    registry::{ConnectionDescriptor, ConnectionRegistry},
    topic_tree::TopicTree,
};

/// Outcome of a CONNECT attempt, for the transport to act on: send a
/// CONNACK (or nothing), and whether to keep the channel open.
pub enum ConnectOutcome {
    /// Close the channel without any reply (protocol violation).
    CloseNoReply,
    /// Send this CONNACK, then close the channel.
    RejectAndClose(ConnAckPacket),
    /// Send this CONNACK and keep serving the connection.
    Accepted(ConnAckPacket),
}

/// One instance fronts the whole broker; cheap to clone (all fields are
/// `Arc`/internally-shared).
#[derive(Clone)]
pub(crate) struct Broker<Store: MqttStore> {
    storage: Arc<Store>,
    topic_tree: TopicTree,
    registry: ConnectionRegistry,
    interceptors: InterceptorRegistry,
    authenticator: Arc<dyn Authenticator>,
    authorizator: Arc<dyn Authorizator>,
}

impl<Store: MqttStore> Broker<Store> {
    pub fn new(
        storage: Arc<Store>,
        authenticator: Arc<dyn Authenticator>,
        authorizator: Arc<dyn Authorizator>,
    ) -> Self {
        Broker {
            storage,
            topic_tree: TopicTree::new(),
            registry: ConnectionRegistry::new(),
            interceptors: InterceptorRegistry::new(),
            authenticator,
            authorizator,
        }
    }

    pub fn register_interceptor(&mut self, observer: Arc<dyn crate::interceptor::Interceptor>) {
        self.interceptors.register(observer);
    }

    fn connack(version: ProtocolVersion, session_present: bool, code: ConnAckReturnCode) -> ConnAckPacket {
        ConnAckPacket {
            protocol_version: version,
            flags: ConnAckFlags { session_present },
            return_code: code,
        }
    }

    /// Steps 1-9 of CONNECT. The returned descriptor (on acceptance) is
    /// what the transport must keep for subsequent `send`s and for
    /// `connection_lost`.
    pub async fn connect(
        &self,
        packet: ConnectPacket,
        sender: tokio::sync::mpsc::UnboundedSender<ControlPacket>,
    ) -> Result<(ConnectOutcome, Option<ConnectionDescriptor>)> {
        let version = packet.protocol_version;

        // Step 1: protocol version. Decoding already rejects unknown
        // protocol names/levels, so this only guards future relaxation
        // of the decoder.
        if version != ProtocolVersion::V3_1 && version != ProtocolVersion::V3_1_1 {
            return Ok((
                ConnectOutcome::RejectAndClose(Self::connack(
                    version,
                    false,
                    ConnAckReturnCode::UnacceptableProtocolVersion,
                )),
                None,
            ));
        }

        // Step 2: client-id.
        let client_id = packet.payload.client_id.clone();
        if client_id.is_empty() {
            return Ok((
                ConnectOutcome::RejectAndClose(Self::connack(
                    version,
                    false,
                    ConnAckReturnCode::IdentifierRejected,
                )),
                None,
            ));
        }

        // Step 3: authentication. An unset user-name flag means an
        // anonymous CONNECT; whether that's allowed is the
        // authenticator's call, not ours.
        let username = packet.flags.user_name.then(|| packet.payload.user_name.as_deref()).flatten();
        let password = packet.flags.user_name.then(|| packet.payload.password.as_deref()).flatten();
        let auth_code = self.authenticator.check_valid(username, password);
        if auth_code != ConnAckReturnCode::Accepted {
            return Ok((ConnectOutcome::RejectAndClose(Self::connack(version, false, auth_code)), None));
        }

        // Step 4: register descriptor, evicting any prior one.
        let clean_session = packet.flags.clean_start;
        let descriptor = ConnectionDescriptor::new(sender, packet.keepalive, clean_session);
        if let Some(previous) = self.registry.put(&client_id, descriptor.clone()) {
            self.connection_lost(&client_id, &previous, true).await?;
        }

        // Step 5 (idle-timeout install) is the transport's job; the
        // descriptor carries `keep_alive_secs` for it to read.

        // Step 6: will.
        if packet.flags.will_flag {
            let will_topic = packet.payload.will_topic.clone().unwrap_or_default();
            let will_payload = packet.payload.will_payload.clone().unwrap_or_default();
            self.storage
                .store_will(
                    &client_id,
                    StoredWillMessage {
                        topic: will_topic,
                        payload: will_payload,
                        qos: packet.flags.will_qos,
                        retain: packet.flags.will_retain,
                    },
                )
                .await?;
        }

        // Step 7: session lookup/creation.
        let existing = self.storage.session_for_client(&client_id).await?;
        let session_present = !clean_session && existing.is_some();
        if existing.is_none() {
            self.storage.create_new_session(&client_id, clean_session).await?;
        } else if clean_session {
            self.storage.clean_session(&client_id).await?;
            self.topic_tree.remove_client(&client_id);
        }

        // Step 8: activate, CONNACK, notify.
        self.storage.activate(&client_id).await?;
        let connack = Self::connack(version, session_present, ConnAckReturnCode::Accepted);
        self.interceptors.notify_connected(&client_id);

        // Step 9: replay offline queue for persistent sessions.
        if !clean_session {
            self.replay_offline(&client_id, &descriptor).await?;
        }

        Ok((ConnectOutcome::Accepted(connack), Some(descriptor)))
    }

    async fn replay_offline(&self, client_id: &str, descriptor: &ConnectionDescriptor) -> Result<()> {
        for guid in self.storage.stored_messages(client_id).await? {
            let stored = self.storage.retrieve(guid).await?;
            let packet_id = self.storage.next_packet_id(client_id).await?;
            self.storage
                .in_flight_ack_waiting(client_id, guid, packet_id)
                .await?;
            let publish = to_publish_packet(&stored, false, Some(packet_id));
            if descriptor.send(ControlPacket::Publish(publish)).is_err() {
                warn!(client_id, "offline replay: client channel already closed");
            }
            self.storage.remove_enqueued(client_id, guid).await?;
        }
        Ok(())
    }

    /// PUBLISH received from `client_id`. Returns the ack packet (if
    /// any) the caller must write back immediately.
    pub async fn publish(
        &self,
        client_id: &str,
        username: Option<&str>,
        packet: PublishPacket,
    ) -> Result<Option<ControlPacket>> {
        if topic::validate_publish_topic(&packet.topic_name).is_err() {
            return Err(ServerError::Protocol(ReasonCode::TopicNameInvalid.into()));
        }

        let authorized = self.authorizator.can_write(&packet.topic_name, username, client_id);

        let ack = match packet.qos_level {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => {
                let packet_id = packet.packet_id.ok_or(ServerError::Protocol(ReasonCode::ProtocolError.into()))?;
                Some(ControlPacket::PubAck(PubAckPacket { packet_id }))
            }
            QoS::ExactlyOnce => {
                let packet_id = packet.packet_id.ok_or(ServerError::Protocol(ReasonCode::ProtocolError.into()))?;
                Some(ControlPacket::PubRec(PubRecPacket { packet_id }))
            }
            QoS::Invalid => return Err(ServerError::Protocol(ReasonCode::MalformedPacket.into())),
        };

        if !authorized {
            // Silent drop: ack still goes out, nothing is stored or routed.
            return Ok(ack);
        }

        match packet.qos_level {
            QoS::AtMostOnce => {
                if packet.retain {
                    self.apply_retain_qos0(&packet).await?;
                }
                let msg = StoredMessage {
                    guid: uuid::Uuid::nil(),
                    publisher_client_id: client_id.to_string(),
                    topic: packet.topic_name.clone(),
                    qos: QoS::AtMostOnce,
                    payload: packet.payload.clone(),
                    retained: packet.retain,
                    packet_id: None,
                };
                self.route_to_subscribers(&msg, packet.retain).await?;
            }
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                let guid = self
                    .storage
                    .store_publish_for_future(StoredMessage {
                        guid: uuid::Uuid::nil(),
                        publisher_client_id: client_id.to_string(),
                        topic: packet.topic_name.clone(),
                        qos: packet.qos_level,
                        payload: packet.payload.clone(),
                        retained: packet.retain,
                        packet_id: packet.packet_id,
                    })
                    .await?;
                self.apply_retain(&packet.topic_name, packet.retain, &packet.payload, guid)
                    .await?;

                if packet.qos_level == QoS::AtLeastOnce {
                    let stored = self.storage.retrieve(guid).await?;
                    self.route_to_subscribers(&stored, false).await?;
                    self.storage.discard(guid).await?;
                } else {
                    // QoS 2: hold it keyed by packet-id; routing waits for PUBREL.
                    let packet_id = packet.packet_id.expect("checked above");
                    self.storage.store_qos2_pending(client_id, packet_id, guid).await?;
                }
            }
            QoS::Invalid => unreachable!("rejected above"),
        }

        self.interceptors.notify_published(client_id, &packet.topic_name, packet.qos_level);
        Ok(ack)
    }

    async fn apply_retain_qos0(&self, packet: &PublishPacket) -> Result<()> {
        if packet.payload.is_empty() {
            self.storage.clean_retained(&packet.topic_name).await?;
        }
        // Non-empty QoS 0 retained payloads have no guid to persist under
        // this store's content-addressed model; QoS 0 retain is cleared
        // only, matching "retain on QoS 0 cleans and does not store".
        Ok(())
    }

    async fn apply_retain(&self, topic_name: &str, retain: bool, payload: &bytes::Bytes, guid: Guid) -> Result<()> {
        if !retain {
            return Ok(());
        }
        if payload.is_empty() {
            self.storage.clean_retained(topic_name).await?;
        } else {
            self.storage.store_retained(topic_name, guid).await?;
        }
        Ok(())
    }

    /// Route `msg` to every subscriber the subscription index reports
    /// for its topic, per the effective-QoS rules. `msg.guid` must be
    /// valid (already stored) when `msg.qos > AtMostOnce`.
    async fn route_to_subscribers(&self, msg: &StoredMessage, _retain: bool) -> Result<()> {
        for subscriber in self.topic_tree.matches(&msg.topic) {
            let effective_qos = msg.qos.min(subscriber.qos);
            let session = match self.storage.session_for_client(&subscriber.client_id).await? {
                Some(s) => s,
                None => {
                    // Unknown-client race: index still has an entry for a
                    // client whose session just vanished. Log and skip.
                    warn!(client_id = %subscriber.client_id, "route: subscriber has no session");
                    continue;
                }
            };

            if effective_qos == QoS::AtMostOnce {
                if session.active {
                    self.deliver(&subscriber.client_id, msg, effective_qos, None).await?;
                }
                continue;
            }

            if session.active {
                let packet_id = self.storage.next_packet_id(&subscriber.client_id).await?;
                self.storage
                    .in_flight_ack_waiting(&subscriber.client_id, msg.guid, packet_id)
                    .await?;
                self.deliver(&subscriber.client_id, msg, effective_qos, Some(packet_id)).await?;
            } else if !session.clean_session {
                self.storage.enqueue_to_deliver(&subscriber.client_id, msg.guid).await?;
            }
            // else: inactive + clean_session => drop, no delivery guarantee.
        }
        Ok(())
    }

    async fn deliver(
        &self,
        client_id: &str,
        msg: &StoredMessage,
        qos: QoS,
        packet_id: Option<u16>,
    ) -> Result<()> {
        let Some(descriptor) = self.registry.get(client_id) else {
            warn!(client_id, "deliver: no live connection, dropping");
            return Ok(());
        };

        let publish = PublishPacket {
            dup: false,
            qos_level: qos,
            retain: msg.retained,
            topic_name: msg.topic.clone(),
            packet_id,
            payload: msg.payload.clone(),
        };

        if descriptor.send(ControlPacket::Publish(publish)).is_err() {
            warn!(client_id, "deliver: client channel closed mid-send");
        }
        Ok(())
    }

    pub async fn puback(&self, client_id: &str, packet_id: u16) -> Result<()> {
        let guid = self.storage.in_flight_acknowledged(client_id, packet_id).await?;
        self.storage.discard(guid).await?;
        self.interceptors.notify_puback(client_id, packet_id);
        Ok(())
    }

    /// PUBREC from a subscriber receiving a QoS 2 outbound publish.
    pub async fn pubrec(&self, client_id: &str, packet_id: u16) -> Result<ControlPacket> {
        self.storage.second_phase_ack_waiting(client_id, packet_id).await?;
        Ok(ControlPacket::PubRel(PubRelPacket { packet_id }))
    }

    /// PUBREL from the original publisher of a QoS 2 inbound publish:
    /// recover the stored publish and route it now.
    pub async fn pubrel(&self, client_id: &str, packet_id: u16) -> Result<ControlPacket> {
        let guid = self.storage.stored_message(client_id, packet_id).await?;
        let stored = self.storage.retrieve(guid).await?;
        self.apply_retain(&stored.topic, stored.retained, &stored.payload, guid).await?;
        self.route_to_subscribers(&stored, stored.retained).await?;
        self.storage.discard(guid).await?;
        Ok(ControlPacket::PubComp(PubCompPacket { packet_id }))
    }

    pub async fn pubcomp(&self, client_id: &str, packet_id: u16) -> Result<()> {
        self.storage.second_phase_acknowledged(client_id, packet_id).await?;
        Ok(())
    }

    pub async fn subscribe(
        &self,
        client_id: &str,
        username: Option<&str>,
        packet: SubscribePacket,
    ) -> Result<ControlPacket> {
        let mut payload = Vec::with_capacity(packet.payload.len());

        for item in &packet.payload {
            if topic::validate_subscribe_filter(&item.topic_filter).is_err() {
                return Err(ServerError::Protocol(ReasonCode::ProtocolError.into()));
            }

            let granted = if !self.authorizator.can_read(&item.topic_filter, username, client_id) {
                None
            } else {
                Some(item.subs_opt.qos)
            };

            if let Some(qos) = granted {
                self.topic_tree.add(client_id, &item.topic_filter, qos);
                self.storage.subscribe_to(client_id, &item.topic_filter, qos).await?;
                self.interceptors.notify_subscribed(client_id, &item.topic_filter, qos);
                self.deliver_retained(client_id, &item.topic_filter, qos).await?;
            }

            payload.push(SubAckPayload {
                reason_code: match granted {
                    Some(QoS::AtMostOnce) => ReasonCode::GrantedQoS0,
                    Some(QoS::AtLeastOnce) => ReasonCode::GrantedQoS1,
                    Some(QoS::ExactlyOnce) => ReasonCode::GrantedQoS2,
                    _ => ReasonCode::NotAuthorized,
                },
            });
        }

        Ok(ControlPacket::SubAck(SubAckPacket { packet_id: packet.packet_id, payload }))
    }

    async fn deliver_retained(&self, client_id: &str, filter: &str, qos: QoS) -> Result<()> {
        for stored in self.storage.search_matching(filter).await? {
            let effective_qos = stored.qos.min(qos);
            let packet_id = if effective_qos == QoS::AtMostOnce {
                None
            } else {
                let id = self.storage.next_packet_id(client_id).await?;
                self.storage.in_flight_ack_waiting(client_id, stored.guid, id).await?;
                Some(id)
            };
            self.deliver(client_id, &stored, effective_qos, packet_id).await?;
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, client_id: &str, packet: UnsubscribePacket) -> Result<ControlPacket> {
        for item in &packet.payload {
            if topic::validate_subscribe_filter(&item.topic_filter).is_err() {
                return Err(ServerError::Protocol(ReasonCode::ProtocolError.into()));
            }
            self.topic_tree.remove(client_id, &item.topic_filter);
            self.storage.unsubscribe_from(client_id, &item.topic_filter).await?;
            self.interceptors.notify_unsubscribed(client_id, &item.topic_filter);
        }
        Ok(ControlPacket::UnsubAck(UnsubAckPacket { packet_id: packet.packet_id }))
    }

    /// Graceful DISCONNECT: suppresses will publication.
    pub async fn disconnect(&self, client_id: &str, descriptor: &ConnectionDescriptor) -> Result<()> {
        self.registry.remove_if_matches(client_id, descriptor);
        self.storage.delete_will(client_id).await?;
        if descriptor.clean_session {
            self.storage.disconnect(client_id).await?;
            self.topic_tree.remove_client(client_id);
        } else {
            self.storage.deactivate(client_id).await?;
        }
        self.interceptors.notify_disconnected(client_id);
        info!(client_id, "disconnected");
        Ok(())
    }

    /// Abnormal connection loss (channel error, keep-alive timeout, or
    /// eviction by a newer CONNECT for the same client-id).
    ///
    /// `session_stolen=true` means a newer connection has already taken
    /// over the registry entry for this client-id: the will must not
    /// fire and the session must not be torn down underneath the new
    /// connection.
    pub async fn connection_lost(
        &self,
        client_id: &str,
        descriptor: &ConnectionDescriptor,
        session_stolen: bool,
    ) -> Result<()> {
        let evicted = self.registry.remove_if_matches(client_id, descriptor);
        if session_stolen {
            self.interceptors.notify_connection_lost(client_id);
            return Ok(());
        }
        if !evicted {
            // A newer descriptor already replaced this one; someone else
            // is handling its lifecycle now.
            return Ok(());
        }

        if let Some(will) = self.storage.take_will(client_id).await? {
            let guid = if will.qos == QoS::AtMostOnce {
                uuid::Uuid::nil()
            } else {
                self.storage
                    .store_publish_for_future(StoredMessage {
                        guid: uuid::Uuid::nil(),
                        publisher_client_id: client_id.to_string(),
                        topic: will.topic.clone(),
                        qos: will.qos,
                        payload: will.payload.clone(),
                        retained: will.retain,
                        packet_id: None,
                    })
                    .await?
            };
            let msg = StoredMessage {
                guid,
                publisher_client_id: client_id.to_string(),
                topic: will.topic.clone(),
                qos: will.qos,
                payload: will.payload.clone(),
                retained: will.retain,
                packet_id: None,
            };
            self.apply_retain(&will.topic, will.retain, &will.payload, guid).await?;
            self.route_to_subscribers(&msg, will.retain).await?;
            if will.qos != QoS::AtMostOnce {
                self.storage.discard(guid).await?;
            }
        }

        let session = self.storage.session_for_client(client_id).await?;
        if let Some(session) = session {
            if session.clean_session {
                self.storage.disconnect(client_id).await?;
                self.topic_tree.remove_client(client_id);
            } else {
                self.storage.deactivate(client_id).await?;
            }
        }

        self.interceptors.notify_connection_lost(client_id);
        debug!(client_id, "connection lost");
        Ok(())
    }
}

fn to_publish_packet(msg: &StoredMessage, dup: bool, packet_id: Option<u16>) -> PublishPacket {
    PublishPacket {
        dup,
        qos_level: msg.qos,
        retain: msg.retained,
        topic_name: msg.topic.clone(),
        packet_id,
        payload: msg.payload.clone(),
    }
}
