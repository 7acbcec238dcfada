/*!
Transport simulé pour tester le dispatch sans broker

Enregistre chaque commande poussée (connexion + enveloppe JSON telle qu'un
agent la recevrait). Une connexion peut être marquée en panne ou lente.
*/

use async_trait::async_trait;
use fleet_kernel::error::TransportError;
use fleet_kernel::models::{Command, CommandId, ConnectionId};
use fleet_kernel::transport::{CommandEnvelope, Transport};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SentCommand {
    pub connection_id: ConnectionId,
    pub command_id: CommandId,
    pub envelope: Value,
}

#[derive(Default)]
struct StubState {
    sent: Vec<SentCommand>,
    failing: HashSet<ConnectionId>,
    delays: HashMap<ConnectionId, Duration>,
}

/// Clonable : les clones partagent le même journal d'envois
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<StubState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Les envois vers cette connexion échouent jusqu'à `heal`
    pub fn fail_connection(&self, connection_id: impl Into<ConnectionId>) {
        self.state.lock().failing.insert(connection_id.into());
    }

    pub fn heal(&self, connection_id: &ConnectionId) {
        self.state.lock().failing.remove(connection_id);
    }

    /// Chaque envoi vers cette connexion attend `delay` avant de répondre
    pub fn delay_connection(&self, connection_id: impl Into<ConnectionId>, delay: Duration) {
        self.state.lock().delays.insert(connection_id.into(), delay);
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.state.lock().sent.clone()
    }

    pub fn sent_to(&self, connection_id: &ConnectionId) -> Vec<SentCommand> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|s| &s.connection_id == connection_id)
            .cloned()
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, connection_id: &ConnectionId, command: &Command) -> Result<(), TransportError> {
        let delay = self.state.lock().delays.get(connection_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.failing.contains(connection_id) {
            return Err(TransportError::NotConnected(connection_id.clone()));
        }
        let envelope = serde_json::to_value(CommandEnvelope::from(command))?;
        state.sent.push(SentCommand {
            connection_id: connection_id.clone(),
            command_id: command.id,
            envelope,
        });
        debug!(connection_id = %connection_id, command_id = %command.id, "[MOCK] command pushed");
        Ok(())
    }
}
