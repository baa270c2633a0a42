use std::sync::Arc;

use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
    time::{self, Duration, Instant},
};
use tracing::{debug, error, info, warn};

use mercurio_core::Result as CoreResult;
use mercurio_packets::{pingresp::PingRespPacket, ControlPacket};
use mercurio_storage::memory::MemoryStore;

use crate::{
    auth::{AllowAllAuthenticator, AllowAllAuthorizator, Authenticator, Authorizator},
    broker::{Broker, ConnectOutcome},
    connection::Connection,
    registry::ConnectionDescriptor,
    shutdown::Shutdown,
};

/// Authentication/authorization policy for the server. Defaults to
/// allowing every connection and every publish/subscribe.
pub struct ServerConfig {
    pub authenticator: Arc<dyn Authenticator>,
    pub authorizator: Arc<dyn Authorizator>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            authenticator: Arc::new(AllowAllAuthenticator),
            authorizator: Arc::new(AllowAllAuthorizator),
        }
    }
}

struct Listener {
    listener: TcpListener,
    broker: Broker<MemoryStore>,
    notify_shutdown: broadcast::Sender<()>,
}

struct Handler {
    broker: Broker<MemoryStore>,
    connection: Connection,
    shutdown: Shutdown,
}

/// Run the MQTT broker, accepting plain TCP connections until `shutdown`
/// resolves.
pub async fn run(listener: TcpListener, shutdown: impl std::future::Future) {
    run_with_config(listener, ServerConfig::default(), shutdown).await
}

/// Run the MQTT broker with an explicit authentication/authorization
/// policy.
pub async fn run_with_config(listener: TcpListener, config: ServerConfig, shutdown: impl std::future::Future) {
    let (notify_shutdown, _) = broadcast::channel(1);

    let storage = Arc::new(MemoryStore::new());
    let broker = Broker::new(storage, config.authenticator, config.authorizator);

    let mut server = Listener {
        listener,
        broker,
        notify_shutdown,
    };

    tokio::select! {
        result = server.run() => {
            if result.is_err() {
                error!("Failed to accept new connection");
            }
        }
        _ = shutdown => {
            info!("Shutting down!");
        }
    }
}

impl Listener {
    async fn run(&mut self) -> CoreResult<()> {
        loop {
            let socket = self.accept().await?;
            let peer_addr = socket.peer_addr().ok();

            info!("Got a connection: {:?}", peer_addr);

            let broker = self.broker.clone();
            let shutdown = Shutdown::new(self.notify_shutdown.subscribe());

            tokio::spawn(async move {
                let mut handler = Handler {
                    broker,
                    connection: Connection::new(socket),
                    shutdown,
                };
                Self::handle_connection(&mut handler).await;
            });
        }
    }

    async fn handle_connection(handler: &mut Handler) {
        // [MQTT-3.1.0-1] The first packet from a client MUST be CONNECT.
        match handler.connection.read_packet().await {
            Ok(Some(ControlPacket::Connect(p))) => {
                if let Err(err) = handler.run(p).await {
                    error!(cause = ?err, "Connection error");
                }
            }
            _ => debug!("connection closed before sending CONNECT"),
        }
    }

    async fn accept(&mut self) -> CoreResult<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(err.into());
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

impl Handler {
    async fn run(&mut self, connect_packet: mercurio_packets::connect::ConnectPacket) -> CoreResult<()> {
        let client_id = connect_packet.payload.client_id.clone();
        let username = connect_packet.payload.user_name.clone();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (outcome, descriptor) = self
            .broker
            .connect(connect_packet, tx)
            .await
            .map_err(|e| mercurio_core::error::Error::Storage(e.to_string()))?;

        let connack = match outcome {
            ConnectOutcome::CloseNoReply => return Ok(()),
            ConnectOutcome::RejectAndClose(ack) => {
                self.connection.write_packet(&ControlPacket::ConnAck(ack)).await?;
                return Ok(());
            }
            ConnectOutcome::Accepted(ack) => ack,
        };
        self.connection.write_packet(&ControlPacket::ConnAck(connack)).await?;

        let descriptor = descriptor.expect("Accepted outcome always carries a descriptor");
        self.serve(&client_id, username.as_deref(), &descriptor, &mut rx).await
    }

    async fn serve(
        &mut self,
        client_id: &str,
        username: Option<&str>,
        descriptor: &ConnectionDescriptor,
        outbound: &mut mpsc::UnboundedReceiver<ControlPacket>,
    ) -> CoreResult<()> {
        let keepalive = descriptor.keep_alive_secs;
        let timeout_duration = if keepalive == 0 {
            Duration::from_secs(u64::MAX / 2)
        } else {
            Duration::from_secs((keepalive as u64 * 3).div_ceil(2))
        };

        let deadline = time::sleep(timeout_duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                maybe_packet = self.connection.read_packet() => {
                    match maybe_packet {
                        Ok(Some(ControlPacket::Disconnect(_))) => {
                            let _ = self.broker.disconnect(client_id, descriptor).await;
                            return Ok(());
                        }
                        Ok(Some(packet)) => {
                            match self.dispatch(client_id, username, packet).await {
                                Ok(Some(reply)) => self.connection.write_packet(&reply).await?,
                                Ok(None) => {}
                                Err(err) => {
                                    warn!(client_id, cause = ?err, "protocol violation, closing");
                                    let _ = self.broker.connection_lost(client_id, descriptor, false).await;
                                    return Ok(());
                                }
                            }
                            deadline.as_mut().reset(Instant::now() + timeout_duration);
                        }
                        Ok(None) => {
                            // Channel closed without DISCONNECT: abnormal loss.
                            let _ = self.broker.connection_lost(client_id, descriptor, false).await;
                            return Ok(());
                        }
                        Err(err) => {
                            warn!(client_id, cause = ?err, "read error, treating as connection loss");
                            let _ = self.broker.connection_lost(client_id, descriptor, false).await;
                            return Ok(());
                        }
                    }
                }

                Some(packet) = outbound.recv() => {
                    self.connection.write_packet(&packet).await?;
                }

                _ = &mut deadline => {
                    warn!(client_id, timeout_secs = timeout_duration.as_secs(), "keep-alive timeout");
                    let _ = self.broker.connection_lost(client_id, descriptor, false).await;
                    return Ok(());
                }

                _ = self.shutdown.recv() => {
                    return Ok(());
                }
            }
        }
    }

    async fn dispatch(
        &mut self,
        client_id: &str,
        username: Option<&str>,
        packet: ControlPacket,
    ) -> crate::error::Result<Option<ControlPacket>> {
        match packet {
            ControlPacket::Publish(p) => self.broker.publish(client_id, username, p).await,
            ControlPacket::PubAck(p) => {
                self.broker.puback(client_id, p.packet_id).await?;
                Ok(None)
            }
            ControlPacket::PubRec(p) => Ok(Some(self.broker.pubrec(client_id, p.packet_id).await?)),
            ControlPacket::PubRel(p) => Ok(Some(self.broker.pubrel(client_id, p.packet_id).await?)),
            ControlPacket::PubComp(p) => {
                self.broker.pubcomp(client_id, p.packet_id).await?;
                Ok(None)
            }
            ControlPacket::Subscribe(p) => Ok(Some(self.broker.subscribe(client_id, username, p).await?)),
            ControlPacket::Unsubscribe(p) => Ok(Some(self.broker.unsubscribe(client_id, p).await?)),
            ControlPacket::PingReq(_) => Ok(Some(ControlPacket::PingResp(PingRespPacket::default()))),
            // A second CONNECT, or any server-to-client packet arriving
            // from a client, is a protocol violation.
            _ => Err(crate::error::ServerError::Protocol(
                mercurio_core::reason::ReasonCode::ProtocolError.into(),
            )),
        }
    }
}
