/**
 * STORE DES NODES - En mémoire, persistance JSON optionnelle
 *
 * PERSISTANCE : à l'inscription et à chaque passage Offline.
 * Les heartbeats ne touchent que la mémoire.
 */

use super::NodeStore;
use crate::error::StoreError;
use crate::models::{Node, NodeId, NodeStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub type NodesMap = HashMap<NodeId, Node>;

pub struct InMemoryNodeStore {
    nodes: RwLock<NodesMap>,
    data_file: Option<PathBuf>,
}

impl Default for InMemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            data_file: None,
        }
    }

    pub fn with_data_file(mut self, path: impl AsRef<Path>) -> Self {
        self.data_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Charge les nodes depuis le fichier JSON de persistance
    pub async fn load(&self) -> Result<usize, StoreError> {
        let Some(path) = &self.data_file else {
            return Ok(0);
        };
        if !path.exists() {
            info!(path = %path.display(), "no existing nodes file, starting fresh");
            return Ok(0);
        }

        let content = tokio::fs::read_to_string(path).await?;
        let loaded: Vec<Node> = serde_json::from_str(&content)?;
        let mut nodes = self.nodes.write().await;
        *nodes = loaded.into_iter().map(|n| (n.id.clone(), n)).collect();
        info!(count = nodes.len(), path = %path.display(), "loaded nodes");
        Ok(nodes.len())
    }

    /// Sauvegarde les nodes dans le fichier JSON
    pub async fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        let content = {
            let nodes = self.nodes.read().await;
            let mut list: Vec<&Node> = nodes.values().collect();
            list.sort_by(|a, b| a.id.cmp(&b.id));
            serde_json::to_string_pretty(&list)?
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    async fn save_logged(&self, reason: &str) {
        if let Err(e) = self.save().await {
            warn!(error = %e, reason, "failed to persist nodes");
        }
    }
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn active_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let nodes = self.nodes.read().await;
        Ok(nodes
            .values()
            .filter(|n| n.status != NodeStatus::Offline)
            .cloned()
            .collect())
    }

    async fn mark_offline(&self, id: &NodeId, silent_since: OffsetDateTime) -> Result<bool, StoreError> {
        let transitioned = {
            let mut nodes = self.nodes.write().await;
            let node = nodes
                .get_mut(id)
                .ok_or_else(|| StoreError::NodeNotFound(id.clone()))?;
            // Un heartbeat a pu arriver entre le scan et cet appel.
            if node.status == NodeStatus::Offline || node.last_seen_at > silent_since {
                false
            } else {
                node.status = NodeStatus::Offline;
                true
            }
        };
        if transitioned {
            self.save_logged("offline transition").await;
        }
        Ok(transitioned)
    }

    async fn upsert_registration(&self, mut node: Node) -> Result<(), StoreError> {
        {
            let mut nodes = self.nodes.write().await;
            if let Some(existing) = nodes.get(&node.id) {
                node.registered_at = existing.registered_at;
            }
            node.status = NodeStatus::Online;
            debug!(node_id = %node.id, hostname = %node.hostname, "node registered");
            nodes.insert(node.id.clone(), node);
        }
        self.save_logged("registration").await;
        Ok(())
    }

    async fn touch(&self, id: &NodeId, status: NodeStatus, seen_at: OffsetDateTime) -> Result<bool, StoreError> {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(id) {
            Some(node) => {
                node.status = status;
                if seen_at > node.last_seen_at {
                    node.last_seen_at = seen_at;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, id: &NodeId) -> Result<Option<Node>, StoreError> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Node>, StoreError> {
        let nodes = self.nodes.read().await;
        let mut list: Vec<Node> = nodes.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }
}
