/**
 * ERREURS DU KERNEL
 *
 * RÔLE : Une enum par préoccupation (capacité, stores, transport, config).
 * Les boucles ne les remontent jamais : elles les loggent et continuent.
 */

use crate::models::{CommandId, CommandStatus, ConnectionId, NodeId};

/// Capacité invalide pour un conteneur borné
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("capacity must be at least 1 (got {0})")]
pub struct CapacityError(pub usize);

/// Erreurs possibles lors des opérations sur les stores (nodes, commandes)
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),
    #[error("Command not found: {0}")]
    CommandNotFound(CommandId),
    #[error("Invalid status transition for command {id}: {from} -> {to}")]
    InvalidTransition {
        id: CommandId,
        from: CommandStatus,
        to: CommandStatus,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Envoi vers un agent non abouti
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection not open: {0}")]
    NotConnected(ConnectionId),
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Send timed out after {0}ms")]
    Timeout(u64),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
