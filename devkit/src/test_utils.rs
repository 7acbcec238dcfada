/*!
Test Harness pour le kernel fleet

Câble un kernel complet en mémoire : registre de connexions, stores, tracker
de qualité, hub MQTT (alimenté directement, sans broker), dispatcher branché
sur un `MockTransport` et monitor de santé.
*/

use crate::agent_messages::AgentMessageBuilder;
use crate::transport_stub::MockTransport;
use anyhow::{Context, Result};
use fleet_kernel::config::{DispatchConf, HealthConf, KernelConfig};
use fleet_kernel::latency::LatencySample;
use fleet_kernel::logging::init_logging;
use fleet_kernel::models::{Command, CommandId, CommandKind, CommandStatus, Node, NodeId, NodeStatus};
use fleet_kernel::mqtt::{MqttHub, TOPIC_DISCONNECT, TOPIC_HEARTBEAT, TOPIC_REGISTRATION, TOPIC_RESPONSE};
use fleet_kernel::store::{CommandStore, InMemoryCommandStore, InMemoryNodeStore, NodeStore, QueuePolicy};
use fleet_kernel::{
    CommandDispatcher, ConnectionRegistry, DispatchReport, HealthMonitor, HealthTracker, OfflineTransition,
    QualityTracker,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::info;

pub struct TestHarness {
    pub registry: Arc<ConnectionRegistry>,
    pub nodes: Arc<InMemoryNodeStore>,
    pub commands: Arc<InMemoryCommandStore>,
    pub quality: Arc<QualityTracker>,
    pub health: HealthTracker,
    pub transport: MockTransport,
    pub hub: Arc<MqttHub>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub monitor: Arc<HealthMonitor>,
}

impl TestHarness {
    /// Harness avec la configuration par défaut et une file sans limite
    pub fn new() -> Result<Self> {
        Self::with_config(&KernelConfig::default(), QueuePolicy::unbounded())
    }

    pub fn with_config(config: &KernelConfig, policy: QueuePolicy) -> Result<Self> {
        config.validate()?;
        init_logging("debug");

        let registry = Arc::new(ConnectionRegistry::new());
        let nodes = Arc::new(InMemoryNodeStore::new());
        let commands = Arc::new(InMemoryCommandStore::new(policy));
        let quality = Arc::new(QualityTracker::new(config.windows.latency_capacity)?);
        let health = HealthTracker::new();
        let transport = MockTransport::new();

        let node_store: Arc<dyn NodeStore> = nodes.clone();
        let command_store: Arc<dyn CommandStore> = commands.clone();
        let hub = Arc::new(MqttHub::new(
            Arc::clone(&registry),
            Arc::clone(&node_store),
            Arc::clone(&command_store),
            Arc::clone(&quality),
            health.clone(),
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&registry),
            command_store,
            Arc::new(transport.clone()),
            &config.dispatch,
        ));
        let monitor = Arc::new(HealthMonitor::new(node_store, Arc::clone(&registry), &config.health));

        Ok(Self {
            registry,
            nodes,
            commands,
            quality,
            health,
            transport,
            hub,
            dispatcher,
            monitor,
        })
    }

    /// Config resserrée pour les tests de boucles : intervalles courts
    pub fn fast_config(dispatch_interval_ms: u64, offline_threshold_secs: u64) -> KernelConfig {
        KernelConfig {
            dispatch: DispatchConf {
                interval_ms: dispatch_interval_ms,
                batch_size: 50,
                send_timeout_ms: 200,
            },
            health: HealthConf {
                scan_interval_secs: 1,
                offline_threshold_secs,
            },
            ..KernelConfig::default()
        }
    }

    async fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        self.hub
            .handle_publish(topic, &AgentMessageBuilder::to_bytes(payload))
            .await
            .with_context(|| format!("hub rejected message on {topic}"))
    }

    /// Simule l'arrivée d'un agent (registration sur le hub)
    pub async fn connect_agent(&self, node_id: &str, session_id: &str) -> Result<()> {
        let msg = AgentMessageBuilder::registration(node_id, session_id, &format!("host-{node_id}"));
        self.publish(TOPIC_REGISTRATION, &msg).await?;
        info!(node_id, session_id, "[HARNESS] agent connected");
        Ok(())
    }

    pub async fn disconnect_agent(&self, session_id: &str) -> Result<()> {
        self.publish(TOPIC_DISCONNECT, &AgentMessageBuilder::disconnect(session_id))
            .await
    }

    pub async fn heartbeat(&self, node_id: &str, latency: &[LatencySample]) -> Result<()> {
        let msg = AgentMessageBuilder::heartbeat(node_id, NodeStatus::Online, latency);
        self.publish(TOPIC_HEARTBEAT, &msg).await
    }

    /// Heartbeat sans échantillon portant le statut déclaré par l'agent
    pub async fn report_status(&self, node_id: &str, status: NodeStatus) -> Result<()> {
        let msg = AgentMessageBuilder::heartbeat(node_id, status, &[]);
        self.publish(TOPIC_HEARTBEAT, &msg).await
    }

    pub async fn respond(&self, command_id: CommandId, status: CommandStatus, result: Option<Value>) -> Result<()> {
        let msg = AgentMessageBuilder::response(command_id, status, result, None);
        self.publish(TOPIC_RESPONSE, &msg).await
    }

    /// Inscrit un node directement dans le store, vu pour la dernière fois à `last_seen_at`
    pub async fn seed_node(&self, node_id: &str, last_seen_at: OffsetDateTime) -> Result<()> {
        let node = Node::new(node_id, format!("host-{node_id}"), last_seen_at);
        self.nodes.upsert_registration(node).await?;
        Ok(())
    }

    pub async fn enqueue(&self, node_id: &str, kind: CommandKind) -> Result<CommandId> {
        Ok(self.commands.enqueue(Command::new(node_id, kind, None)).await?)
    }

    pub async fn command(&self, id: CommandId) -> Result<Command> {
        self.commands
            .get(id)
            .await?
            .with_context(|| format!("command {id} not found"))
    }

    pub async fn node(&self, node_id: &str) -> Result<Node> {
        self.nodes
            .get(&NodeId::from(node_id))
            .await?
            .with_context(|| format!("node {node_id} not found"))
    }

    pub async fn dispatch(&self) -> Result<DispatchReport> {
        Ok(self.dispatcher.tick().await?)
    }

    pub async fn scan_at(&self, now: OffsetDateTime) -> Result<Vec<OfflineTransition>> {
        Ok(self.monitor.tick_at(now).await?)
    }

    /// Attend qu'une commande atteigne `status` (boucles démarrées)
    pub async fn wait_for_status(&self, id: CommandId, status: CommandStatus, timeout: Duration) -> Result<Command> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let command = self.command(id).await?;
            if command.status == status {
                return Ok(command);
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("command {id} still {} after {:?}, expected {status}", command.status, timeout);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
