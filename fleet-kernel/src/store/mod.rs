/**
 * STORES - Interfaces vers le stockage des nodes et des commandes
 *
 * RÔLE :
 * Le coeur (dispatch, health monitor, hub) ne connaît les nodes et les commandes
 * qu'à travers ces deux traits. Le stockage réel est un collaborateur externe.
 *
 * FONCTIONNEMENT :
 * - CommandStore = file des commandes + transitions de statut
 * - NodeStore = état des nodes (statut, last_seen) + inscription
 * - Implémentations par défaut en mémoire (commands.rs, nodes.rs),
 *   persistance JSON optionnelle pour les nodes
 *
 * POLITIQUE DE RETRY :
 * Le dispatcher ne décide jamais d'abandonner une commande. C'est le store
 * (propriétaire de la file) qui applique max_attempts / max_queued_age.
 */

pub mod commands;
pub mod nodes;

pub use commands::{InMemoryCommandStore, QueuePolicy};
pub use nodes::InMemoryNodeStore;

use crate::error::StoreError;
use crate::models::{Command, CommandId, CommandStatus, Node, NodeId, NodeStatus};
use async_trait::async_trait;
use time::OffsetDateTime;

#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Ajoute une commande en statut Queued
    async fn enqueue(&self, command: Command) -> Result<CommandId, StoreError>;

    async fn get(&self, id: CommandId) -> Result<Option<Command>, StoreError>;

    /// Jusqu'à `limit` commandes Queued, les plus anciennes d'abord
    async fn fetch_queued(&self, limit: usize) -> Result<Vec<Command>, StoreError>;

    /// Applique la politique de la file sans lire de batch.
    /// Renvoie le nombre de commandes passées Failed.
    async fn expire_queued(&self) -> Result<usize, StoreError>;

    /// Queued -> Sent
    async fn mark_sent(&self, id: CommandId) -> Result<(), StoreError>;

    /// Livraison échouée : la commande reste Queued (sauf politique de la file)
    async fn record_delivery_failure(&self, id: CommandId, reason: &str) -> Result<(), StoreError>;

    /// Rapport asynchrone de l'agent (InProgress / Success / Failed)
    async fn update_status(
        &self,
        id: CommandId,
        status: CommandStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<Command, StoreError>;

    async fn cancel(&self, id: CommandId) -> Result<Command, StoreError>;

    async fn count_by_status(&self, status: CommandStatus) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Tous les nodes dont le statut n'est pas Offline
    async fn active_nodes(&self) -> Result<Vec<Node>, StoreError>;

    /// Passe le node Offline s'il ne l'est pas déjà et n'a pas été vu après `silent_since`.
    /// Renvoie `true` seulement si cet appel a effectué la transition.
    async fn mark_offline(&self, id: &NodeId, silent_since: OffsetDateTime) -> Result<bool, StoreError>;

    /// Inscription (ou ré-inscription) d'un agent
    async fn upsert_registration(&self, node: Node) -> Result<(), StoreError>;

    /// Réception d'un heartbeat : met à jour last_seen et le statut.
    /// Renvoie `false` si le node est inconnu.
    async fn touch(&self, id: &NodeId, status: NodeStatus, seen_at: OffsetDateTime) -> Result<bool, StoreError>;

    async fn get(&self, id: &NodeId) -> Result<Option<Node>, StoreError>;

    async fn list(&self) -> Result<Vec<Node>, StoreError>;
}
