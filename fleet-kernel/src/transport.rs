/**
 * TRANSPORT - Envoi des commandes vers les agents connectés
 *
 * RÔLE : Le dispatcher n'a besoin que de "pousser cette commande sur la connexion X".
 * Un envoi en échec signifie "non livré" et n'interrompt jamais un tick.
 */

use crate::error::TransportError;
use crate::models::{Command, CommandId, CommandKind, ConnectionId, NodeId};
use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, connection_id: &ConnectionId, command: &Command) -> Result<(), TransportError>;
}

/// Message poussé vers l'agent (contrat agents.command@v1)
#[derive(Debug, Serialize)]
pub struct CommandEnvelope<'a> {
    pub command_id: CommandId,
    pub node_id: &'a NodeId,
    pub command_type: CommandKind,
    pub parameters: Option<&'a serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl<'a> From<&'a Command> for CommandEnvelope<'a> {
    fn from(command: &'a Command) -> Self {
        Self {
            command_id: command.id,
            node_id: &command.node_id,
            command_type: command.kind,
            parameters: command.payload.as_ref(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}
