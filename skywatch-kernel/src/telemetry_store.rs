/**
 * TELEMETRY STORE - Ring buffers par scope (global, device, localisation)
 *
 * RÔLE :
 * Propriétaire unique de l'historique de télémétrie en mémoire. Le dispatcher
 * est le seul écrivain, les vues ne lisent que des snapshots.
 *
 * FONCTIONNEMENT :
 * - Buffers device/localisation créés paresseusement au premier événement
 * - Verrous parking_lot tenus uniquement le temps de l'append O(1)
 * - Dédoublonnage des redeliveries : événement identique déjà dans le buffer du device
 * - Rétention par âge optionnelle (balayage périodique) ; les scopes vidés
 *   par le balayage sont retirés des maps
 */

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{ScopeKey, TelemetryEvent};
use crate::ring_buffer::{RingBuffer, Snapshot};

pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    pub global_capacity: usize,
    pub per_device_capacity: usize,
    pub per_location_capacity: usize,
    pub max_age: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            global_capacity: DEFAULT_BUFFER_CAPACITY,
            per_device_capacity: DEFAULT_BUFFER_CAPACITY,
            per_location_capacity: DEFAULT_BUFFER_CAPACITY,
            max_age: None,
        }
    }
}

type SharedBuffer = Arc<Mutex<RingBuffer<TelemetryEvent>>>;

#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Appended(Arc<TelemetryEvent>),
    /// Redelivery d'un événement déjà présent dans le buffer du device
    Duplicate,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub global_events: usize,
    pub global_capacity: usize,
    pub device_buffers: usize,
    pub location_buffers: usize,
}

pub struct TelemetryStore {
    policy: RetentionPolicy,
    global: Mutex<RingBuffer<TelemetryEvent>>,
    by_device: RwLock<HashMap<String, SharedBuffer>>,
    by_location: RwLock<HashMap<String, SharedBuffer>>,
}

impl TelemetryStore {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            global: Mutex::new(RingBuffer::with_capacity(policy.global_capacity)),
            by_device: RwLock::new(HashMap::new()),
            by_location: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Ajoute l'événement aux trois scopes. Le même `Arc` est partagé entre buffers.
    pub fn append(&self, event: TelemetryEvent) -> AppendOutcome {
        let device_buffer = buffer_for(&self.by_device, &event.device_id, self.policy.per_device_capacity);
        let event = Arc::new(event);

        {
            let mut buffer = device_buffer.lock();
            if buffer.iter().any(|e| *e == *event) {
                return AppendOutcome::Duplicate;
            }
            buffer.append(Arc::clone(&event));
        }

        self.global.lock().append(Arc::clone(&event));

        let location_buffer = buffer_for(&self.by_location, &event.location, self.policy.per_location_capacity);
        location_buffer.lock().append(Arc::clone(&event));

        AppendOutcome::Appended(event)
    }

    pub fn snapshot(&self, scope: &ScopeKey) -> Snapshot<TelemetryEvent> {
        match scope {
            ScopeKey::Global => self.global.lock().snapshot(),
            ScopeKey::Device(id) => snapshot_of(&self.by_device, id),
            ScopeKey::Location(loc) => snapshot_of(&self.by_location, loc),
        }
    }

    pub fn device_history(&self, device_id: &str) -> Snapshot<TelemetryEvent> {
        snapshot_of(&self.by_device, device_id)
    }

    pub fn location_history(&self, location: &str) -> Snapshot<TelemetryEvent> {
        snapshot_of(&self.by_location, location)
    }

    pub fn global_history(&self) -> Snapshot<TelemetryEvent> {
        self.global.lock().snapshot()
    }

    pub fn latest_for_device(&self, device_id: &str) -> Option<Arc<TelemetryEvent>> {
        let buffer = self.by_device.read().get(device_id).cloned()?;
        let latest = buffer.lock().latest();
        latest
    }

    /// Évince les événements plus vieux que `max_age` (si configuré) puis retire
    /// les buffers device/localisation devenus vides.
    /// Retourne le nombre total d'entrées retirées, tous scopes confondus.
    pub fn prune_expired(&self, now_unix: f64) -> usize {
        let Some(max_age) = self.policy.max_age else {
            return 0;
        };
        let cutoff = now_unix - max_age.as_secs_f64();

        let mut evicted = self.global.lock().evict_older_than(cutoff);
        for map in [&self.by_device, &self.by_location] {
            let buffers: Vec<SharedBuffer> = map.read().values().cloned().collect();
            for buffer in buffers {
                evicted += buffer.lock().evict_older_than(cutoff);
            }
            // un buffer encore référencé ailleurs peut recevoir un append : on le garde
            map.write()
                .retain(|_, buffer| Arc::strong_count(buffer) > 1 || !buffer.lock().is_empty());
        }
        evicted
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            global_events: self.global.lock().len(),
            global_capacity: self.policy.global_capacity,
            device_buffers: self.by_device.read().len(),
            location_buffers: self.by_location.read().len(),
        }
    }
}

fn buffer_for(map: &RwLock<HashMap<String, SharedBuffer>>, key: &str, capacity: usize) -> SharedBuffer {
    if let Some(buffer) = map.read().get(key) {
        return Arc::clone(buffer);
    }
    let mut map = map.write();
    Arc::clone(
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RingBuffer::with_capacity(capacity)))),
    )
}

fn snapshot_of(map: &RwLock<HashMap<String, SharedBuffer>>, key: &str) -> Snapshot<TelemetryEvent> {
    let Some(buffer) = map.read().get(key).cloned() else {
        return Snapshot::empty();
    };
    let snapshot = buffer.lock().snapshot();
    snapshot
}
