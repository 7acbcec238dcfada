/**
 * QUALITÉ RÉSEAU - Statistiques de latence glissantes par node
 *
 * RÔLE : Une LatencyWindow garde les derniers résultats de sonde d'un lien
 * (ring buffer, éviction du plus ancien). Le QualityTracker en tient une par node.
 *
 * CALCUL : statistiques recalculées à chaque appel sur les échantillons présents.
 * Fenêtres petites, lues bien moins souvent qu'alimentées.
 */

use crate::error::CapacityError;
use crate::models::NodeId;
use crate::ring_buffer::RingBuffer;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Résultat d'une sonde. Un échec (perte, timeout) n'a pas de RTT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LatencySample {
    Success { rtt_ms: u32 },
    Failure,
}

impl LatencySample {
    pub fn rtt_ms(&self) -> Option<u32> {
        match self {
            LatencySample::Success { rtt_ms } => Some(*rtt_ms),
            LatencySample::Failure => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LatencySample::Success { .. })
    }
}

/// Statistiques sur les échantillons présents dans la fenêtre
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub success_rate_percent: f64,
    pub packet_loss_percent: f64,
    pub average_rtt_ms: Option<f64>,
    pub min_rtt_ms: Option<u32>,
    pub max_rtt_ms: Option<u32>,
    pub dropped_count: u64,
}

#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: RingBuffer<LatencySample>,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Result<Self, CapacityError> {
        Ok(Self {
            samples: RingBuffer::new(capacity)?,
        })
    }

    /// Ajoute un échantillon ; `true` si le plus ancien a été évincé.
    pub fn add_sample(&mut self, sample: LatencySample) -> bool {
        self.samples.add(sample)
    }

    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    pub fn count(&self) -> usize {
        self.samples.count()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn reset(&mut self) {
        self.samples.reset();
    }

    pub fn stats(&self) -> LatencyStats {
        let total = self.samples.count();
        let mut success_count = 0usize;
        let mut rtt_sum = 0u64;
        let mut min_rtt: Option<u32> = None;
        let mut max_rtt: Option<u32> = None;

        for rtt in self.samples.iter().filter_map(LatencySample::rtt_ms) {
            success_count += 1;
            rtt_sum += u64::from(rtt);
            min_rtt = Some(min_rtt.map_or(rtt, |m| m.min(rtt)));
            max_rtt = Some(max_rtt.map_or(rtt, |m| m.max(rtt)));
        }

        let success_rate_percent = if total == 0 {
            0.0
        } else {
            success_count as f64 / total as f64 * 100.0
        };
        let average_rtt_ms = (success_count > 0).then(|| rtt_sum as f64 / success_count as f64);

        LatencyStats {
            total,
            success_count,
            failure_count: total - success_count,
            success_rate_percent,
            packet_loss_percent: 100.0 - success_rate_percent,
            average_rtt_ms,
            min_rtt_ms: min_rtt,
            max_rtt_ms: max_rtt,
            dropped_count: self.samples.dropped_count(),
        }
    }
}

/// Une fenêtre par node, créée au premier échantillon.
///
/// Chaque fenêtre a son propre mutex : deux nodes ne se bloquent jamais
/// et une fenêtre n'a qu'un écrivain à la fois.
pub struct QualityTracker {
    windows: DashMap<NodeId, Arc<Mutex<LatencyWindow>>>,
    capacity: usize,
}

impl QualityTracker {
    pub fn new(capacity: usize) -> Result<Self, CapacityError> {
        if capacity == 0 {
            return Err(CapacityError(capacity));
        }
        Ok(Self {
            windows: DashMap::new(),
            capacity,
        })
    }

    pub fn record(&self, node_id: &NodeId, sample: LatencySample) -> Result<bool, CapacityError> {
        let window = match self.windows.get(node_id) {
            Some(entry) => entry.value().clone(),
            None => {
                let fresh = Arc::new(Mutex::new(LatencyWindow::new(self.capacity)?));
                self.windows
                    .entry(node_id.clone())
                    .or_insert(fresh)
                    .value()
                    .clone()
            }
        };
        // Garde de shard relâchée, seul le verrou de la fenêtre est tenu.
        let evicted = window.lock().add_sample(sample);
        Ok(evicted)
    }

    pub fn stats(&self, node_id: &NodeId) -> Option<LatencyStats> {
        let window = self.windows.get(node_id)?.value().clone();
        let stats = window.lock().stats();
        Some(stats)
    }

    pub fn all_stats(&self) -> Vec<(NodeId, LatencyStats)> {
        let windows: Vec<(NodeId, Arc<Mutex<LatencyWindow>>)> = self
            .windows
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut out: Vec<_> = windows
            .into_iter()
            .map(|(id, w)| {
                let stats = w.lock().stats();
                (id, stats)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn forget(&self, node_id: &NodeId) -> bool {
        self.windows.remove(node_id).is_some()
    }

    pub fn tracked_nodes(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(rtt_ms: u32) -> LatencySample {
        LatencySample::Success { rtt_ms }
    }

    #[test]
    fn test_empty_window_stats() {
        let window = LatencyWindow::new(16).unwrap();
        let stats = window.stats();

        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate_percent, 0.0);
        assert_eq!(stats.packet_loss_percent, 100.0);
        assert_eq!(stats.average_rtt_ms, None);
        assert_eq!(stats.min_rtt_ms, None);
    }

    #[test]
    fn test_single_success() {
        let mut window = LatencyWindow::new(16).unwrap();
        window.add_sample(ok(10));
        let stats = window.stats();

        assert_eq!(stats.success_rate_percent, 100.0);
        assert_eq!(stats.packet_loss_percent, 0.0);
        assert_eq!(stats.average_rtt_ms, Some(10.0));
    }

    #[test]
    fn test_failures_excluded_from_average() {
        let mut window = LatencyWindow::new(16).unwrap();
        window.add_sample(ok(10));
        window.add_sample(LatencySample::Failure);
        window.add_sample(ok(30));
        window.add_sample(LatencySample::Failure);
        let stats = window.stats();

        assert_eq!(stats.total, 4);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 2);
        assert_eq!(stats.success_rate_percent, 50.0);
        assert_eq!(stats.packet_loss_percent, 50.0);
        assert_eq!(stats.average_rtt_ms, Some(20.0));
        assert_eq!(stats.min_rtt_ms, Some(10));
        assert_eq!(stats.max_rtt_ms, Some(30));
    }

    #[test]
    fn test_all_failures_have_no_average() {
        let mut window = LatencyWindow::new(4).unwrap();
        for _ in 0..3 {
            window.add_sample(LatencySample::Failure);
        }
        let stats = window.stats();

        assert_eq!(stats.success_rate_percent, 0.0);
        assert_eq!(stats.packet_loss_percent, 100.0);
        assert_eq!(stats.average_rtt_ms, None);
    }

    #[test]
    fn test_stats_only_cover_held_samples() {
        let mut window = LatencyWindow::new(2).unwrap();
        window.add_sample(LatencySample::Failure);
        window.add_sample(LatencySample::Failure);
        assert!(window.add_sample(ok(5)));
        assert!(window.add_sample(ok(7)));
        let stats = window.stats();

        assert_eq!(stats.total, 2);
        assert_eq!(stats.success_rate_percent, 100.0);
        assert_eq!(stats.average_rtt_ms, Some(6.0));
        assert_eq!(stats.dropped_count, 2);
    }

    #[test]
    fn test_clear_keeps_dropped_count_reset_zeroes_it() {
        let mut window = LatencyWindow::new(2).unwrap();
        for rtt in [1, 2, 3] {
            window.add_sample(ok(rtt));
        }

        window.clear();
        let stats = window.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.average_rtt_ms, None);
        assert_eq!(stats.dropped_count, 1);

        window.add_sample(ok(9));
        assert_eq!(window.stats().average_rtt_ms, Some(9.0));

        window.reset();
        let stats = window.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.dropped_count, 0);
        assert_eq!(window.capacity(), 2);
    }

    #[test]
    fn test_representative_window_sizes() {
        for &size in &[16usize, 120, 1000] {
            let mut window = LatencyWindow::new(size).unwrap();
            // Every 4th probe is lost: 75% success at steady state.
            for i in 0..size * 2 {
                if i % 4 == 3 {
                    window.add_sample(LatencySample::Failure);
                } else {
                    window.add_sample(ok(20));
                }
            }

            let started = std::time::Instant::now();
            let stats = window.stats();
            let elapsed = started.elapsed();

            assert_eq!(stats.total, size);
            assert_eq!(stats.success_rate_percent, 75.0);
            assert_eq!(stats.average_rtt_ms, Some(20.0));
            assert!(elapsed < std::time::Duration::from_millis(50), "size {size}: {elapsed:?}");
        }
    }

    #[test]
    fn test_sample_serialization() {
        let json = serde_json::to_string(&ok(12)).unwrap();
        assert_eq!(json, r#"{"outcome":"success","rtt_ms":12}"#);
        let failure: LatencySample = serde_json::from_str(r#"{"outcome":"failure"}"#).unwrap();
        assert_eq!(failure, LatencySample::Failure);
    }

    #[test]
    fn test_quality_tracker_per_node() {
        let tracker = QualityTracker::new(8).unwrap();
        let a = NodeId::from("node-a");
        let b = NodeId::from("node-b");

        tracker.record(&a, ok(10)).unwrap();
        tracker.record(&a, LatencySample::Failure).unwrap();
        tracker.record(&b, ok(40)).unwrap();

        assert_eq!(tracker.tracked_nodes(), 2);
        assert_eq!(tracker.stats(&a).unwrap().success_rate_percent, 50.0);
        assert_eq!(tracker.stats(&b).unwrap().average_rtt_ms, Some(40.0));
        assert!(tracker.stats(&NodeId::from("ghost")).is_none());

        let all = tracker.all_stats();
        assert_eq!(all[0].0, a);
        assert_eq!(all[1].0, b);

        assert!(tracker.forget(&a));
        assert!(tracker.stats(&a).is_none());
    }

    #[test]
    fn test_quality_tracker_rejects_zero_capacity() {
        assert!(QualityTracker::new(0).is_err());
    }
}
