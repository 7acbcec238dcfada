/**
 * COMMAND DISPATCHER - Boucle périodique d'envoi des commandes en file
 *
 * RÔLE : À chaque tick, prend jusqu'à `batch_size` commandes Queued, résout la connexion
 * du node cible via le ConnectionRegistry et pousse la commande sur le transport.
 *
 * RÈGLES :
 * - node non connecté -> la commande reste Queued, retentée au tick suivant
 * - aucune connexion -> pas de lecture de batch, seule la politique de file s'applique
 * - échec transport / timeout -> reste Queued, tentative comptée par le store
 * - erreur store -> loggée, la boucle continue au prochain intervalle
 * - une commande n'est envoyée qu'une fois par tick
 */

use crate::config::DispatchConf;
use crate::connections::ConnectionRegistry;
use crate::error::{StoreError, TransportError};
use crate::models::Command;
use crate::store::CommandStore;
use crate::tasks::PeriodicTask;
use crate::transport::Transport;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Résultat d'un tick de dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Commandes lues dans la file
    pub fetched: usize,
    /// Poussées et passées en Sent
    pub sent: usize,
    /// Node cible non connecté
    pub undeliverable: usize,
    /// Échec transport, timeout ou erreur store sur l'item
    pub failed: usize,
    /// Abandonnées par la politique de file sans connexion active
    pub expired: usize,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.fetched == 0 && self.expired == 0
    }
}

enum Outcome {
    Sent,
    Undeliverable,
    Failed,
}

pub struct CommandDispatcher {
    registry: Arc<ConnectionRegistry>,
    commands: Arc<dyn CommandStore>,
    transport: Arc<dyn Transport>,
    interval: Duration,
    batch_size: usize,
    send_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        commands: Arc<dyn CommandStore>,
        transport: Arc<dyn Transport>,
        conf: &DispatchConf,
    ) -> Self {
        Self {
            registry,
            commands,
            transport,
            interval: Duration::from_millis(conf.interval_ms),
            batch_size: conf.batch_size,
            send_timeout: Duration::from_millis(conf.send_timeout_ms),
        }
    }

    /// Un passage complet sur le batch courant.
    ///
    /// Seule la lecture de la file peut échouer ; les erreurs par commande
    /// sont absorbées et comptées dans le rapport.
    pub async fn tick(&self) -> Result<DispatchReport, StoreError> {
        let mut report = DispatchReport::default();
        if !self.registry.has_connections() {
            report.expired = self.commands.expire_queued().await?;
            return Ok(report);
        }

        let batch = self.commands.fetch_queued(self.batch_size).await?;
        report.fetched = batch.len();

        for command in &batch {
            match self.dispatch_one(command).await {
                Outcome::Sent => report.sent += 1,
                Outcome::Undeliverable => report.undeliverable += 1,
                Outcome::Failed => report.failed += 1,
            }
        }
        Ok(report)
    }

    async fn dispatch_one(&self, command: &Command) -> Outcome {
        let Some(connection_id) = self.registry.try_get(&command.node_id) else {
            return Outcome::Undeliverable;
        };

        let send = self.transport.send(&connection_id, command);
        let reason = match tokio::time::timeout(self.send_timeout, send).await {
            Ok(Ok(())) => {
                return match self.commands.mark_sent(command.id).await {
                    Ok(()) => {
                        debug!(command_id = %command.id, node_id = %command.node_id, connection_id = %connection_id, "command sent");
                        Outcome::Sent
                    }
                    Err(e) => {
                        warn!(command_id = %command.id, error = %e, "command pushed but status update failed");
                        Outcome::Failed
                    }
                };
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => TransportError::Timeout(self.send_timeout.as_millis() as u64).to_string(),
        };

        warn!(command_id = %command.id, node_id = %command.node_id, connection_id = %connection_id, %reason, "command not delivered, will retry");
        if let Err(e) = self.commands.record_delivery_failure(command.id, &reason).await {
            warn!(command_id = %command.id, error = %e, "failed to record delivery failure");
        }
        Outcome::Failed
    }

    /// Démarre la boucle ; elle tourne jusqu'à l'annulation de `shutdown`.
    pub fn spawn(self: Arc<Self>, shutdown: &CancellationToken) -> PeriodicTask {
        let interval = self.interval;
        PeriodicTask::spawn("command-dispatch", interval, shutdown, move || {
            let dispatcher = Arc::clone(&self);
            async move {
                match dispatcher.tick().await {
                    Ok(report) if !report.is_empty() => {
                        debug!(
                            fetched = report.fetched,
                            sent = report.sent,
                            undeliverable = report.undeliverable,
                            failed = report.failed,
                            expired = report.expired,
                            "dispatch tick"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "dispatch tick failed"),
                }
            }
        })
    }
}
