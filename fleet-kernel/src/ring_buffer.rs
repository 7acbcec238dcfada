/**
 * RING BUFFER - Tampon circulaire de capacité fixe, éviction du plus ancien
 *
 * RÔLE : Stockage borné des derniers échantillons (fenêtres de latence).
 *
 * FONCTIONNEMENT :
 * - slots alloués une seule fois dans `new`, curseur d'écriture modulo
 * - éviction en O(1), aucune réallocation après construction
 * - un seul propriétaire : le partage entre tâches se sérialise à l'extérieur
 *   (voir QualityTracker)
 */

use crate::error::CapacityError;

/// Garde les `capacity` éléments les plus récents.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    /// Prochain slot écrit.
    head: usize,
    count: usize,
    /// Éléments écrasés depuis la construction ou le dernier reset.
    dropped: u64,
}

impl<T> RingBuffer<T> {
    /// Capacité nulle refusée (pas de clamp).
    pub fn new(capacity: usize) -> Result<Self, CapacityError> {
        if capacity == 0 {
            return Err(CapacityError(capacity));
        }
        let slots = std::iter::repeat_with(|| None).take(capacity).collect();
        Ok(Self {
            slots,
            head: 0,
            count: 0,
            dropped: 0,
        })
    }

    /// Ajoute un élément, écrase le plus ancien si plein.
    /// Renvoie `true` si cet appel a évincé un élément.
    pub fn add(&mut self, item: T) -> bool {
        let evicted = self.count == self.capacity();
        self.slots[self.head] = Some(item);
        self.head = (self.head + 1) % self.capacity();
        if evicted {
            self.dropped += 1;
        } else {
            self.count += 1;
        }
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Total des évictions. Survit à [`clear`](Self::clear).
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Dernier élément ajouté
    pub fn latest(&self) -> Option<&T> {
        if self.count == 0 {
            return None;
        }
        let idx = (self.head + self.capacity() - 1) % self.capacity();
        self.slots[idx].as_ref()
    }

    /// Du plus ancien au plus récent
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.window(self.count)
    }

    /// Vide le tampon, le compteur d'évictions est conservé.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.count = 0;
    }

    /// Vide le tampon et remet le compteur d'évictions à zéro.
    pub fn reset(&mut self) {
        self.clear();
        self.dropped = 0;
    }

    /// Remet seulement le compteur d'évictions à zéro.
    pub fn reset_dropped_count(&mut self) {
        self.dropped = 0;
    }

    /// Les `k` plus récents en ordre chronologique, `k <= count`.
    fn window(&self, k: usize) -> impl Iterator<Item = &T> + '_ {
        let cap = self.capacity();
        let start = (self.head + cap - k) % cap;
        (0..k).filter_map(move |i| self.slots[(start + i) % cap].as_ref())
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Les `min(n, count)` plus récents, du plus ancien au plus récent.
    pub fn get_recent(&self, n: usize) -> Vec<T> {
        let k = n.min(self.count);
        let mut out = Vec::with_capacity(k);
        out.extend(self.window(k).cloned());
        out
    }
}
