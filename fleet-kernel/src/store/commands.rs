/**
 * FILE DE COMMANDES EN MÉMOIRE
 *
 * RÔLE : Commandes Queued conservées en ordre FIFO, transitions de statut validées.
 *
 * POLITIQUE : QueuePolicy est appliquée paresseusement. Avant chaque lecture de
 * batch (ou via expire_queued quand aucun node n'est connecté), les commandes
 * ayant épuisé leurs tentatives ou restées trop longtemps en file passent Failed.
 */

use super::CommandStore;
use crate::error::StoreError;
use crate::models::{Command, CommandId, CommandStatus};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Quand une commande en file cesse d'être retentée.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueuePolicy {
    /// Livraisons échouées avant passage en Failed.
    pub max_attempts: Option<u32>,
    /// Durée maximale en Queued avant passage en Failed.
    pub max_queued_age: Option<time::Duration>,
}

impl QueuePolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    fn give_up_reason(&self, command: &Command, now: OffsetDateTime) -> Option<String> {
        if let Some(max) = self.max_attempts {
            if command.attempts >= max {
                return Some(format!("delivery attempts exhausted ({max})"));
            }
        }
        if let Some(max_age) = self.max_queued_age {
            if now - command.created_at > max_age {
                return Some(format!(
                    "queued for longer than {}s",
                    max_age.whole_seconds()
                ));
            }
        }
        None
    }
}

#[derive(Default)]
struct Inner {
    commands: HashMap<CommandId, Command>,
    /// Ids encore Queued, les plus anciens d'abord.
    queue: VecDeque<CommandId>,
}

impl Inner {
    fn get_mut(&mut self, id: CommandId) -> Result<&mut Command, StoreError> {
        self.commands
            .get_mut(&id)
            .ok_or(StoreError::CommandNotFound(id))
    }

    fn transition(&mut self, id: CommandId, next: CommandStatus) -> Result<&mut Command, StoreError> {
        let command = self.get_mut(id)?;
        if !command.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id,
                from: command.status,
                to: next,
            });
        }
        command.status = next;
        if next.is_terminal() {
            command.completed_at = Some(OffsetDateTime::now_utc());
        }
        if next != CommandStatus::Queued {
            self.queue.retain(|queued| *queued != id);
        }
        // Nouvel emprunt après modification de la file.
        self.get_mut(id)
    }
}

pub struct InMemoryCommandStore {
    inner: RwLock<Inner>,
    policy: QueuePolicy,
}

impl Default for InMemoryCommandStore {
    fn default() -> Self {
        Self::new(QueuePolicy::unbounded())
    }
}

impl InMemoryCommandStore {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            policy,
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Toutes les commandes connues (debug / API)
    pub async fn list(&self) -> Vec<Command> {
        let inner = self.inner.read().await;
        let mut all: Vec<Command> = inner.commands.values().cloned().collect();
        all.sort_by_key(|c| c.created_at);
        all
    }

    fn expire(inner: &mut Inner, policy: &QueuePolicy, now: OffsetDateTime) -> usize {
        let expired: Vec<(CommandId, String)> = inner
            .queue
            .iter()
            .filter_map(|id| inner.commands.get(id))
            .filter_map(|c| policy.give_up_reason(c, now).map(|reason| (c.id, reason)))
            .collect();

        let mut count = 0;
        for (id, reason) in expired {
            if let Ok(command) = inner.transition(id, CommandStatus::Failed) {
                warn!(command_id = %id, node_id = %command.node_id, %reason, "giving up on queued command");
                command.error = Some(reason);
                count += 1;
            }
        }
        count
    }
}

#[async_trait]
impl CommandStore for InMemoryCommandStore {
    async fn enqueue(&self, mut command: Command) -> Result<CommandId, StoreError> {
        command.status = CommandStatus::Queued;
        let id = command.id;
        let mut inner = self.inner.write().await;
        inner.commands.insert(id, command);
        inner.queue.push_back(id);
        debug!(command_id = %id, "command queued");
        Ok(id)
    }

    async fn get(&self, id: CommandId) -> Result<Option<Command>, StoreError> {
        Ok(self.inner.read().await.commands.get(&id).cloned())
    }

    async fn fetch_queued(&self, limit: usize) -> Result<Vec<Command>, StoreError> {
        let mut inner = self.inner.write().await;
        Self::expire(&mut inner, &self.policy, OffsetDateTime::now_utc());

        let batch = inner
            .queue
            .iter()
            .filter_map(|id| inner.commands.get(id))
            .filter(|c| c.status == CommandStatus::Queued)
            .take(limit)
            .cloned()
            .collect();
        Ok(batch)
    }

    async fn expire_queued(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(Self::expire(&mut inner, &self.policy, OffsetDateTime::now_utc()))
    }

    async fn mark_sent(&self, id: CommandId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let command = inner.transition(id, CommandStatus::Sent)?;
        command.sent_at = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    async fn record_delivery_failure(&self, id: CommandId, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let command = inner.get_mut(id)?;
        if command.status != CommandStatus::Queued {
            return Err(StoreError::InvalidTransition {
                id,
                from: command.status,
                to: CommandStatus::Queued,
            });
        }
        command.attempts += 1;
        command.error = Some(reason.to_string());

        if let Some(max) = self.policy.max_attempts {
            if command.attempts >= max {
                Self::expire(&mut inner, &self.policy, OffsetDateTime::now_utc());
            }
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: CommandId,
        status: CommandStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<Command, StoreError> {
        let mut inner = self.inner.write().await;
        let command = inner.transition(id, status)?;
        if result.is_some() {
            command.result = result;
        }
        if error.is_some() {
            command.error = error;
        }
        Ok(command.clone())
    }

    async fn cancel(&self, id: CommandId) -> Result<Command, StoreError> {
        let mut inner = self.inner.write().await;
        let command = inner.get_mut(id)?;
        if !command.kind.is_cancellable() {
            return Err(StoreError::InvalidTransition {
                id,
                from: command.status,
                to: CommandStatus::Cancelled,
            });
        }
        let command = inner.transition(id, CommandStatus::Cancelled)?;
        Ok(command.clone())
    }

    async fn count_by_status(&self, status: CommandStatus) -> Result<usize, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.commands.values().filter(|c| c.status == status).count())
    }
}
