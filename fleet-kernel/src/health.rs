/**
 * HEALTH - Surveillance de la liveness des nodes + santé du kernel
 *
 * RÔLE :
 * - HealthMonitor : boucle périodique qui passe Offline les nodes silencieux
 *   (now - last_seen > seuil). Ne fait jamais la transition inverse : c'est la
 *   réception d'un heartbeat (hub MQTT) qui remet un node Online.
 * - HealthTracker : uptime, état du lien MQTT, exposés sur /system/health.
 */

use crate::config::HealthConf;
use crate::connections::ConnectionRegistry;
use crate::error::StoreError;
use crate::models::NodeId;
use crate::store::NodeStore;
use crate::tasks::PeriodicTask;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Trace structurée d'un passage Offline
#[derive(Debug, Clone, Serialize)]
pub struct OfflineTransition {
    pub node_id: NodeId,
    pub hostname: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    pub silent_for_secs: i64,
    /// Le transport avait encore une connexion enregistrée pour ce node
    pub had_connection: bool,
}

pub struct HealthMonitor {
    nodes: Arc<dyn NodeStore>,
    registry: Arc<ConnectionRegistry>,
    scan_interval: Duration,
    offline_threshold: time::Duration,
}

impl HealthMonitor {
    pub fn new(nodes: Arc<dyn NodeStore>, registry: Arc<ConnectionRegistry>, conf: &HealthConf) -> Self {
        Self {
            nodes,
            registry,
            scan_interval: Duration::from_secs(conf.scan_interval_secs),
            offline_threshold: time::Duration::seconds(i64::try_from(conf.offline_threshold_secs).unwrap_or(i64::MAX)),
        }
    }

    pub async fn tick(&self) -> Result<Vec<OfflineTransition>, StoreError> {
        self.tick_at(OffsetDateTime::now_utc()).await
    }

    /// Un scan complet avec `now` comme horloge de référence.
    pub async fn tick_at(&self, now: OffsetDateTime) -> Result<Vec<OfflineTransition>, StoreError> {
        // Seuil hors de la plage représentable : aucun node ne peut être assez ancien.
        let Some(cutoff) = now.checked_sub(self.offline_threshold) else {
            return Ok(Vec::new());
        };
        let silent: Vec<_> = self
            .nodes
            .active_nodes()
            .await?
            .into_iter()
            .filter(|n| n.last_seen_at < cutoff)
            .collect();

        let mut transitions = Vec::with_capacity(silent.len());
        for node in silent {
            match self.nodes.mark_offline(&node.id, cutoff).await {
                Ok(true) => {
                    let transition = OfflineTransition {
                        had_connection: self.registry.try_get(&node.id).is_some(),
                        silent_for_secs: (now - node.last_seen_at).whole_seconds(),
                        last_seen_at: node.last_seen_at,
                        hostname: node.hostname,
                        node_id: node.id,
                    };
                    warn!(
                        node_id = %transition.node_id,
                        hostname = %transition.hostname,
                        last_seen_at = %transition.last_seen_at,
                        silent_for_secs = transition.silent_for_secs,
                        had_connection = transition.had_connection,
                        "node marked offline"
                    );
                    transitions.push(transition);
                }
                // Revu depuis le scan, ou déjà passé Offline ailleurs.
                Ok(false) => {}
                Err(e) => warn!(node_id = %node.id, error = %e, "failed to mark node offline"),
            }
        }
        Ok(transitions)
    }

    pub fn spawn(self: Arc<Self>, shutdown: &CancellationToken) -> PeriodicTask {
        let interval = self.scan_interval;
        PeriodicTask::spawn("health-monitor", interval, shutdown, move || {
            let monitor = Arc::clone(&self);
            async move {
                if let Err(e) = monitor.tick().await {
                    error!(error = %e, "health scan failed");
                }
            }
        })
    }
}

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub connected_nodes: usize,
    pub queued_commands: usize,
    pub tracked_quality_windows: usize,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<&'static str>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting")),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected";
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting";
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn mqtt_status(&self) -> &'static str {
        *self.mqtt_status.lock()
    }

    pub fn mqtt_reconnects(&self) -> u32 {
        self.mqtt_reconnects.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Node, NodeStatus};
    use crate::store::InMemoryNodeStore;

    fn conf(threshold: u64) -> HealthConf {
        HealthConf {
            scan_interval_secs: 30,
            offline_threshold_secs: threshold,
        }
    }

    async fn store_with(nodes: &[(&str, i64)], now: OffsetDateTime) -> Arc<InMemoryNodeStore> {
        let store = Arc::new(InMemoryNodeStore::new());
        for (id, secs_ago) in nodes {
            let node = Node::new(*id, format!("host-{id}"), now - time::Duration::seconds(*secs_ago));
            store.upsert_registration(node).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_silent_node_goes_offline_once() {
        let now = OffsetDateTime::now_utc();
        let store = store_with(&[("silent", 300), ("fresh", 10)], now).await;
        let registry = Arc::new(ConnectionRegistry::new());
        let monitor = HealthMonitor::new(store.clone(), registry, &conf(120));

        let first = monitor.tick_at(now).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].node_id, NodeId::from("silent"));
        assert_eq!(first[0].hostname, "host-silent");
        assert_eq!(first[0].silent_for_secs, 300);

        let second = monitor.tick_at(now + time::Duration::seconds(30)).await.unwrap();
        assert!(second.is_empty());

        let fresh = store.get(&NodeId::from("fresh")).await.unwrap().unwrap();
        assert_eq!(fresh.status, NodeStatus::Online);
    }

    #[tokio::test]
    async fn test_out_of_range_threshold_does_not_panic() {
        let now = OffsetDateTime::now_utc();
        let store = store_with(&[("old", 86_400)], now).await;
        let registry = Arc::new(ConnectionRegistry::new());

        for threshold in [1_000_000_000_000, u64::MAX] {
            let monitor = HealthMonitor::new(store.clone(), Arc::clone(&registry), &conf(threshold));
            assert!(monitor.tick_at(now).await.unwrap().is_empty());
            assert!(monitor.tick().await.unwrap().is_empty());
        }
        let old = store.get(&NodeId::from("old")).await.unwrap().unwrap();
        assert_eq!(old.status, NodeStatus::Online);
    }

    #[tokio::test]
    async fn test_threshold_is_strict() {
        let now = OffsetDateTime::now_utc();
        let store = store_with(&[("edge", 120)], now).await;
        let monitor = HealthMonitor::new(store, Arc::new(ConnectionRegistry::new()), &conf(120));

        assert!(monitor.tick_at(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_silence_episode_after_heartbeat() {
        let now = OffsetDateTime::now_utc();
        let store = store_with(&[("n1", 300)], now).await;
        let monitor = HealthMonitor::new(store.clone(), Arc::new(ConnectionRegistry::new()), &conf(120));
        assert_eq!(monitor.tick_at(now).await.unwrap().len(), 1);

        // Heartbeat brings it back, then it goes quiet again.
        store.touch(&NodeId::from("n1"), NodeStatus::Online, now).await.unwrap();
        assert!(monitor.tick_at(now + time::Duration::seconds(60)).await.unwrap().is_empty());
        let later = monitor.tick_at(now + time::Duration::seconds(200)).await.unwrap();
        assert_eq!(later.len(), 1);
    }

    #[tokio::test]
    async fn test_maintenance_and_error_nodes_are_demoted() {
        let now = OffsetDateTime::now_utc();
        let store = store_with(&[("m", 500), ("e", 500)], now).await;
        store.touch(&NodeId::from("m"), NodeStatus::Maintenance, now - time::Duration::seconds(500)).await.unwrap();
        store.touch(&NodeId::from("e"), NodeStatus::Error, now - time::Duration::seconds(500)).await.unwrap();
        let monitor = HealthMonitor::new(store.clone(), Arc::new(ConnectionRegistry::new()), &conf(120));

        assert_eq!(monitor.tick_at(now).await.unwrap().len(), 2);
        assert!(store.active_nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_reports_lingering_connection() {
        let now = OffsetDateTime::now_utc();
        let store = store_with(&[("n1", 300)], now).await;
        let registry = Arc::new(ConnectionRegistry::new());
        registry.set(NodeId::from("n1"), "c1".into());
        let monitor = HealthMonitor::new(store, Arc::clone(&registry), &conf(120));

        let transitions = monitor.tick_at(now).await.unwrap();
        assert!(transitions[0].had_connection);
        // Connection lifetime belongs to the transport.
        assert!(registry.try_get(&NodeId::from("n1")).is_some());
    }

    #[test]
    fn test_tracker_mqtt_status() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.mqtt_status(), "connecting");
        tracker.increment_reconnects();
        assert_eq!(tracker.mqtt_status(), "reconnecting");
        tracker.mark_mqtt_connected();
        assert_eq!(tracker.mqtt_status(), "connected");
        assert_eq!(tracker.mqtt_reconnects(), 1);
    }
}
