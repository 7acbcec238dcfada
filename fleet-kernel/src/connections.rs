/**
 * CONNECTION REGISTRY - Annuaire concurrent node <-> connexion transport
 *
 * RÔLE : Source de vérité unique pour "quelle session transport représente le node X".
 * Utilisé en parallèle par le hub (connect/disconnect) et par les boucles dispatch/health.
 *
 * ARCHITECTURE : deux maps concurrentes (sens direct + inverse), un compteur de version
 * atomique, et un snapshot en cache validé par version + TTL (concurrence optimiste).
 * Le pointeur du cache est un ArcSwapOption : la lecture ne prend aucun verrou.
 */

use crate::models::{ConnectionId, NodeId};
use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Durée de vie maximale d'un snapshot en cache.
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct CachedSnapshot {
    nodes: Arc<[NodeId]>,
    version: u64,
    captured_at: Instant,
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    by_node: DashMap<NodeId, ConnectionId>,
    by_connection: DashMap<ConnectionId, NodeId>,
    /// Incrémentée après chaque mutation, ne décroît jamais.
    version: AtomicU64,
    snapshot: ArcSwapOption<CachedSnapshot>,
    snapshot_ttl: Duration,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_snapshot_ttl(SNAPSHOT_TTL)
    }

    pub fn with_snapshot_ttl(snapshot_ttl: Duration) -> Self {
        Self {
            by_node: DashMap::new(),
            by_connection: DashMap::new(),
            version: AtomicU64::new(0),
            snapshot: ArcSwapOption::empty(),
            snapshot_ttl,
        }
    }

    /// Associe `connection_id` au node (last-writer-wins).
    ///
    /// Une éventuelle connexion précédente du node garde son entrée inverse
    /// jusqu'à `try_remove_by_connection_id` par le transport.
    ///
    /// Sens direct d'abord : un retrait concurrent de la même connexion
    /// voit soit les deux entrées, soit aucune, et ne laisse jamais
    /// d'entrée directe sans son inverse.
    pub fn set(&self, node_id: NodeId, connection_id: ConnectionId) {
        self.by_node.insert(node_id.clone(), connection_id.clone());
        self.by_connection.insert(connection_id, node_id);
        self.bump();
    }

    pub fn try_get(&self, node_id: &NodeId) -> Option<ConnectionId> {
        self.by_node.get(node_id).map(|e| e.value().clone())
    }

    pub fn node_for_connection(&self, connection_id: &ConnectionId) -> Option<NodeId> {
        self.by_connection.get(connection_id).map(|e| e.value().clone())
    }

    pub fn has_connections(&self) -> bool {
        !self.by_node.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_connections()
    }

    /// Retire la connexion dans les deux sens, renvoie le node qu'elle représentait.
    ///
    /// L'entrée directe n'est supprimée que si elle pointe encore sur cette
    /// connexion : une reconnexion plus récente du même node reste en place.
    pub fn try_remove_by_connection_id(&self, connection_id: &ConnectionId) -> Option<NodeId> {
        let (_, node_id) = self.by_connection.remove(connection_id)?;
        self.by_node
            .remove_if(&node_id, |_, current| current == connection_id);
        self.bump();
        Some(node_id)
    }

    pub fn clear(&self) {
        self.by_node.clear();
        self.by_connection.clear();
        self.bump();
        self.snapshot.store(None);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Vue cohérente des nodes connectés, servie depuis le cache tant que
    /// la version n'a pas bougé et que le TTL n'est pas écoulé.
    pub fn connected_node_ids_snapshot(&self) -> Arc<[NodeId]> {
        self.snapshot_with(|| {})
    }

    /// `during_enumeration` s'exécute entre l'énumération et la seconde
    /// lecture de version.
    fn snapshot_with(&self, during_enumeration: impl FnOnce()) -> Arc<[NodeId]> {
        let current = self.version();
        if let Some(cached) = self.snapshot.load_full() {
            if cached.version == current && cached.captured_at.elapsed() < self.snapshot_ttl {
                return Arc::clone(&cached.nodes);
            }
        }

        let before = self.version();
        let nodes: Arc<[NodeId]> = self.by_node.iter().map(|e| e.key().clone()).collect();
        during_enumeration();
        let after = self.version();

        // Mutation concurrente pendant l'énumération : résultat rendu, jamais mis en cache.
        if before == after {
            let fresh = Arc::new(CachedSnapshot {
                nodes: Arc::clone(&nodes),
                version: before,
                captured_at: Instant::now(),
            });
            // Un snapshot plus récent déjà en place n'est jamais écrasé.
            self.snapshot.rcu(|slot| match slot {
                Some(cached) if cached.version > before => Some(Arc::clone(cached)),
                _ => Some(Arc::clone(&fresh)),
            });
        }
        nodes
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}
