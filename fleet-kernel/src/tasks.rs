/**
 * TÂCHES PÉRIODIQUES - Boucles de fond annulables
 *
 * RÔLE : Support commun du dispatch et du monitor de santé.
 *
 * RÈGLES :
 * - une tâche tokio par boucle, les ticks ne se chevauchent jamais
 * - l'arrêt n'est observé qu'entre deux ticks : un tick en cours va au bout
 */

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Lance `tick` toutes les `period` jusqu'à `shutdown` ou [`stop`](Self::stop).
    ///
    /// Chaque tick tourne dans sa propre tâche : un panic est loggé et la
    /// boucle reprend à l'intervalle suivant.
    pub fn spawn<F, Fut>(
        name: &'static str,
        period: Duration,
        shutdown: &CancellationToken,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = shutdown.child_token();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            info!(task = name, period_ms = period.as_millis() as u64, "periodic task started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if let Err(e) = tokio::spawn(tick()).await {
                    if e.is_panic() {
                        error!(task = name, "tick panicked, continuing on next interval");
                    }
                }
            }

            info!(task = name, "periodic task stopped");
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Demande l'arrêt et attend la fin du tick en cours
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!(task = self.name, error = %e, "periodic task ended abnormally");
        }
    }
}
