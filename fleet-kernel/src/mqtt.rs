/**
 * MQTT HUB - Pont entre le broker et le coeur de coordination
 *
 * RÔLE :
 * - Entrant : registration / disconnect / heartbeat / response des agents
 *   -> ConnectionRegistry (set / remove), NodeStore (touch), QualityTracker, CommandStore
 * - Sortant : MqttTransport pousse les commandes sur le topic de la session
 *
 * TOPICS :
 * - fleet/agents/registration@v1       agent -> kernel
 * - fleet/agents/disconnect@v1         agent (ou LWT) -> kernel
 * - fleet/agents/heartbeat@v1          agent -> kernel
 * - fleet/agents/response@v1           agent -> kernel
 * - fleet/agents/command@v1/{session}  kernel -> agent
 */

use crate::config::MqttConf;
use crate::connections::ConnectionRegistry;
use crate::error::TransportError;
use crate::health::HealthTracker;
use crate::latency::{LatencySample, QualityTracker};
use crate::models::{Command, CommandId, CommandStatus, ConnectionId, Node, NodeId, NodeStatus};
use crate::store::{CommandStore, NodeStore};
use crate::transport::{CommandEnvelope, Transport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const TOPIC_REGISTRATION: &str = "fleet/agents/registration@v1";
pub const TOPIC_DISCONNECT: &str = "fleet/agents/disconnect@v1";
pub const TOPIC_HEARTBEAT: &str = "fleet/agents/heartbeat@v1";
pub const TOPIC_RESPONSE: &str = "fleet/agents/response@v1";
pub const TOPIC_COMMAND_PREFIX: &str = "fleet/agents/command@v1";

const INBOUND_TOPICS: [&str; 4] = [TOPIC_REGISTRATION, TOPIC_DISCONNECT, TOPIC_HEARTBEAT, TOPIC_RESPONSE];

// Messages MQTT entrants (agent -> kernel)
#[derive(Debug, Deserialize)]
pub struct RegistrationMessage {
    pub node_id: NodeId,
    pub session_id: ConnectionId,
    pub hostname: String,
    pub os: Option<String>,
    pub architecture: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DisconnectMessage {
    pub session_id: ConnectionId,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatMessage {
    pub node_id: NodeId,
    #[serde(default = "default_heartbeat_status")]
    pub status: NodeStatus,
    /// Résultats de sondes réseau depuis le dernier heartbeat
    #[serde(default)]
    pub latency: Vec<LatencySample>,
}

fn default_heartbeat_status() -> NodeStatus {
    NodeStatus::Online
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    pub command_id: CommandId,
    pub status: CommandStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

pub struct MqttHub {
    registry: Arc<ConnectionRegistry>,
    nodes: Arc<dyn NodeStore>,
    commands: Arc<dyn CommandStore>,
    quality: Arc<QualityTracker>,
    health: HealthTracker,
}

impl MqttHub {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        nodes: Arc<dyn NodeStore>,
        commands: Arc<dyn CommandStore>,
        quality: Arc<QualityTracker>,
        health: HealthTracker,
    ) -> Self {
        Self {
            registry,
            nodes,
            commands,
            quality,
            health,
        }
    }

    /// Traite un message entrant ; un payload invalide est une erreur pour ce message seulement
    pub async fn handle_publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        match topic {
            TOPIC_REGISTRATION => {
                let msg: RegistrationMessage = serde_json::from_slice(payload).context("invalid registration")?;
                self.on_registration(msg).await
            }
            TOPIC_DISCONNECT => {
                let msg: DisconnectMessage = serde_json::from_slice(payload).context("invalid disconnect")?;
                self.on_disconnect(msg);
                Ok(())
            }
            TOPIC_HEARTBEAT => {
                let msg: HeartbeatMessage = serde_json::from_slice(payload).context("invalid heartbeat")?;
                self.on_heartbeat(msg).await
            }
            TOPIC_RESPONSE => {
                let msg: ResponseMessage = serde_json::from_slice(payload).context("invalid response")?;
                self.on_response(msg).await
            }
            other => {
                debug!(topic = other, "ignoring message on unexpected topic");
                Ok(())
            }
        }
    }

    async fn on_registration(&self, msg: RegistrationMessage) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        let mut node = Node::new(msg.node_id.clone(), msg.hostname, now);
        node.os = msg.os;
        node.architecture = msg.architecture;
        node.version = msg.version;

        self.nodes
            .upsert_registration(node)
            .await
            .context("failed to store registration")?;
        self.registry.set(msg.node_id.clone(), msg.session_id.clone());
        info!(node_id = %msg.node_id, connection_id = %msg.session_id, "agent connected");
        Ok(())
    }

    fn on_disconnect(&self, msg: DisconnectMessage) {
        match self.registry.try_remove_by_connection_id(&msg.session_id) {
            Some(node_id) => {
                // Fenêtre de latence libérée seulement sans session plus récente.
                if self.registry.try_get(&node_id).is_none() {
                    self.quality.forget(&node_id);
                }
                info!(node_id = %node_id, connection_id = %msg.session_id, "agent disconnected");
            }
            None => debug!(connection_id = %msg.session_id, "disconnect for unknown session"),
        }
    }

    async fn on_heartbeat(&self, msg: HeartbeatMessage) -> Result<()> {
        // Seul le monitor de santé fait passer un node Offline.
        let status = match msg.status {
            NodeStatus::Offline => {
                debug!(node_id = %msg.node_id, "heartbeat reports offline, recorded as online");
                NodeStatus::Online
            }
            other => other,
        };
        let known = self
            .nodes
            .touch(&msg.node_id, status, OffsetDateTime::now_utc())
            .await
            .context("failed to record heartbeat")?;
        if !known {
            warn!(node_id = %msg.node_id, "heartbeat from unregistered node");
            return Ok(());
        }
        for sample in msg.latency {
            self.quality.record(&msg.node_id, sample)?;
        }
        Ok(())
    }

    async fn on_response(&self, msg: ResponseMessage) -> Result<()> {
        let command = self
            .commands
            .update_status(msg.command_id, msg.status, msg.result, msg.error)
            .await
            .with_context(|| format!("failed to apply response for command {}", msg.command_id))?;
        debug!(command_id = %command.id, node_id = %command.node_id, status = %command.status, "command status reported");
        Ok(())
    }

    /// Boucle d'événements MQTT ; se réabonne à chaque ConnAck
    pub fn spawn(self: Arc<Self>, client: AsyncClient, mut eventloop: EventLoop, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = eventloop.poll() => event,
                };
                match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        self.health.mark_mqtt_connected();
                        for topic in INBOUND_TOPICS {
                            if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                                error!(topic, error = %e, "MQTT subscribe failed");
                            }
                        }
                        info!("MQTT connected, subscribed to agent topics");
                    }
                    Ok(Event::Incoming(Incoming::Publish(p))) => {
                        if let Err(e) = self.handle_publish(&p.topic, &p.payload).await {
                            warn!(topic = %p.topic, error = ?e, "failed to handle message");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "MQTT connection error");
                        self.health.increment_reconnects();
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
            info!("MQTT hub stopped");
        })
    }
}

pub fn create_mqtt_client(conf: &MqttConf) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&conf.client_id, &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(conf.keep_alive_secs));
    opts.set_clean_session(true);
    AsyncClient::new(opts, 64)
}

/// Transport par défaut : une session = un topic de commande
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

pub fn command_topic(connection_id: &ConnectionId) -> String {
    format!("{TOPIC_COMMAND_PREFIX}/{connection_id}")
}

#[async_trait]
impl Transport for MqttTransport {
    async fn send(&self, connection_id: &ConnectionId, command: &Command) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(&CommandEnvelope::from(command))?;
        self.client
            .publish(command_topic(connection_id), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}
