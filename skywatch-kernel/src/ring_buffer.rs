/**
 * RING BUFFER - Séquence bornée append-only avec éviction FIFO
 *
 * RÔLE :
 * Brique de rétention de la télémétrie : un buffer par scope (global, device,
 * localisation). Capacité fixe, l'élément le plus ancien sort en premier.
 *
 * FONCTIONNEMENT :
 * - append : O(1) amorti, éviction du plus ancien si plein
 * - snapshot : copie immuable (pointeurs partagés) lisible pendant que les écritures continuent
 * - filter_by : vue paresseuse, finie et rejouable sur UN snapshot (isolation)
 *
 * Le buffer lui-même n'est pas synchronisé : le TelemetryStore l'enveloppe dans un verrou.
 */

use std::collections::VecDeque;
use std::sync::Arc;

/// Éléments porteurs d'un horodatage unix, pour la rétention par âge
pub trait Timestamped {
    fn unix_timestamp(&self) -> f64;
}

#[derive(Debug)]
pub struct RingBuffer<T> {
    items: VecDeque<Arc<T>>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Une capacité nulle est ramenée à 1
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Ajoute un élément, retourne l'élément évincé le cas échéant
    pub fn append(&mut self, item: impl Into<Arc<T>>) -> Option<Arc<T>> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item.into());
        evicted
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        Snapshot {
            items: self.items.iter().cloned().collect(),
        }
    }

    pub fn filter_by<P>(&self, predicate: P) -> Filtered<T, P>
    where
        P: Fn(&T) -> bool,
    {
        Filtered {
            snapshot: self.snapshot(),
            predicate,
        }
    }

    pub fn latest(&self) -> Option<Arc<T>> {
        self.items.back().cloned()
    }

    /// Parcourt le contenu courant sans copie (à utiliser sous le verrou du propriétaire)
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.items.iter().map(|item| item.as_ref())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Timestamped> RingBuffer<T> {
    /// Évince par l'avant tout ce qui est plus ancien que `cutoff`.
    /// L'éviction reste strictement FIFO : on s'arrête au premier élément récent.
    pub fn evict_older_than(&mut self, cutoff: f64) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.items.front() {
            if front.unix_timestamp() >= cutoff {
                break;
            }
            self.items.pop_front();
            evicted += 1;
        }
        evicted
    }
}

/// Copie ordonnée et immuable du contenu d'un buffer à un instant donné
#[derive(Debug)]
pub struct Snapshot<T> {
    items: Arc<[Arc<T>]>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Snapshot<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new().into(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.items.iter().map(|item| item.as_ref())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last(&self) -> Option<Arc<T>> {
        self.items.last().cloned()
    }

    /// Les `n` éléments les plus récents, dans l'ordre d'insertion
    pub fn tail(&self, n: usize) -> Vec<Arc<T>> {
        let start = self.items.len().saturating_sub(n);
        self.items[start..].to_vec()
    }

    pub fn to_vec(&self) -> Vec<Arc<T>> {
        self.items.to_vec()
    }
}

impl<'a, T> IntoIterator for &'a Snapshot<T> {
    type Item = &'a Arc<T>;
    type IntoIter = std::slice::Iter<'a, Arc<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Lecture filtrée rejouable : chaque appel à `iter` repart du même snapshot
pub struct Filtered<T, P> {
    snapshot: Snapshot<T>,
    predicate: P,
}

impl<T, P> Filtered<T, P>
where
    P: Fn(&T) -> bool,
{
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.snapshot.iter().filter(move |item| (self.predicate)(item))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }
}
