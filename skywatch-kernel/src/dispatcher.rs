/**
 * EVENT DISPATCHER - Point d'entrée unique de tous les événements entrants
 *
 * RÔLE :
 * Classe chaque événement (télémétrie ou changement d'annuaire), l'applique au
 * store ou à l'annuaire, puis notifie le bus. Seul écrivain du kernel.
 *
 * FONCTIONNEMENT :
 * - File mpsc bornée alimentée par MQTT et par la route HTTP /ingest
 * - Télémétrie : validation, append dans les 3 scopes, 3 notifications, aucune I/O
 * - created/updated : relecture complète du registre puis swap du snapshot
 * - deleted : retrait de l'annuaire (l'historique de télémétrie reste)
 * - Écritures d'annuaire sérialisées par un mutex async (boucle, maintenance)
 * - Un événement invalide est compté et loggé, la boucle continue
 */

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::bus::{ChangeNotification, EventBus};
use crate::directory::DeviceDirectory;
use crate::models::{AttributeValue, ScopeKey, TelemetryEvent, UNKNOWN_LOCATION};
use crate::registry::{DeviceRegistry, RegistryError};
use crate::telemetry_store::{AppendOutcome, TelemetryStore};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Champs de l'enveloppe qui ne sont pas des attributs de mesure
const RESERVED_FIELDS: [&str; 4] = ["device_id", "timestamp", "location", "city"];

#[derive(Debug, Error, PartialEq)]
pub enum IngestError {
    #[error("malformed event: {0}")]
    Malformed(String),
}

/// Événement brut tel que reçu du transport
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl RawEvent {
    pub fn new(routing_key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload: payload.into(),
        }
    }

    /// "device/telemetry" -> "device.telemetry"
    pub fn from_topic(topic: &str, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(topic.replace('/', "."), payload)
    }
}

pub type IngestSender = mpsc::Sender<RawEvent>;

pub fn ingest_channel(capacity: usize) -> (IngestSender, mpsc::Receiver<RawEvent>) {
    mpsc::channel(capacity.max(1))
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngressEvent {
    Telemetry(Map<String, Value>),
    DeviceCreated,
    DeviceUpdated,
    DeviceDeleted { device_id: String },
}

impl IngressEvent {
    pub fn from_routing_key(routing_key: &str, payload: &[u8]) -> Result<Self, IngestError> {
        match routing_key {
            "device.created" => Ok(IngressEvent::DeviceCreated),
            "device.updated" => Ok(IngressEvent::DeviceUpdated),
            "device.deleted" => {
                let body = parse_object(payload)?;
                let device_id = non_empty_str(&body, "device_id")
                    .ok_or_else(|| IngestError::Malformed("delete without device_id".into()))?;
                Ok(IngressEvent::DeviceDeleted {
                    device_id: device_id.to_string(),
                })
            }
            key if is_telemetry_key(key) => Ok(IngressEvent::Telemetry(parse_object(payload)?)),
            other => Err(IngestError::Malformed(format!("unknown routing key {other}"))),
        }
    }
}

fn is_telemetry_key(key: &str) -> bool {
    key == "sensors.data" || key.split('.').any(|segment| segment == "telemetry")
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, IngestError> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(IngestError::Malformed(format!("expected a JSON object, got {other}"))),
        Err(e) => Err(IngestError::Malformed(format!("invalid JSON: {e}"))),
    }
}

fn non_empty_str<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Construit un TelemetryEvent ; la localisation absente est complétée par l'annuaire
pub fn build_telemetry(fields: &Map<String, Value>, directory: &DeviceDirectory) -> Result<TelemetryEvent, IngestError> {
    let device_id = non_empty_str(fields, "device_id")
        .ok_or_else(|| IngestError::Malformed("missing or empty device_id".into()))?;
    let timestamp = fields
        .get("timestamp")
        .and_then(Value::as_f64)
        .ok_or_else(|| IngestError::Malformed(format!("missing or non-numeric timestamp for {device_id}")))?;

    let location = non_empty_str(fields, "location")
        .or_else(|| non_empty_str(fields, "city"))
        .map(str::to_string)
        .or_else(|| directory.location_of(device_id))
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());

    let mut event = TelemetryEvent::new(device_id, location, timestamp);
    for (key, value) in fields {
        if RESERVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        let attribute = match value {
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => match n.as_f64() {
                Some(n) => AttributeValue::Number(n),
                None => continue,
            },
            _ => continue,
        };
        event.attributes.insert(key.clone(), attribute);
    }
    Ok(event)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Appended {
        device_id: String,
        location: String,
        /// Informatif : la télémétrie d'un device hors annuaire est conservée
        unknown_device: bool,
    },
    Duplicate {
        device_id: String,
        timestamp: f64,
    },
    DirectoryRefreshed {
        devices: usize,
    },
    DirectoryRefreshFailed {
        reason: String,
    },
    DeviceRemoved {
        device_id: String,
        was_known: bool,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchStats {
    pub received: u64,
    pub appended: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub unknown_devices: u64,
    pub directory_refreshes: u64,
    pub refresh_failures: u64,
    pub directory_rebuilds: u64,
    pub removals: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    appended: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    unknown_devices: AtomicU64,
    directory_refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    directory_rebuilds: AtomicU64,
    removals: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct Dispatcher {
    store: Arc<TelemetryStore>,
    directory: Arc<DeviceDirectory>,
    registry: Arc<dyn DeviceRegistry>,
    bus: EventBus,
    counters: Counters,
    /// Tenu pendant toute la relecture du registre : un delete ne peut pas
    /// être écrasé par une liste obtenue avant lui
    directory_writes: AsyncMutex<()>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<TelemetryStore>,
        directory: Arc<DeviceDirectory>,
        registry: Arc<dyn DeviceRegistry>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            directory,
            registry,
            bus,
            counters: Counters::default(),
            directory_writes: AsyncMutex::new(()),
        }
    }

    pub async fn ingest(&self, event: IngressEvent) -> Result<IngestOutcome, IngestError> {
        bump(&self.counters.received);
        let result = match event {
            IngressEvent::Telemetry(fields) => self.apply_telemetry(&fields),
            IngressEvent::DeviceCreated | IngressEvent::DeviceUpdated => Ok(self.refresh_directory().await),
            IngressEvent::DeviceDeleted { device_id } => Ok(self.remove_device(&device_id).await),
        };
        if let Err(e) = &result {
            self.reject(e);
        }
        result
    }

    pub async fn ingest_raw(&self, raw: &RawEvent) -> Result<IngestOutcome, IngestError> {
        match IngressEvent::from_routing_key(&raw.routing_key, &raw.payload) {
            Ok(event) => self.ingest(event).await,
            Err(e) => {
                bump(&self.counters.received);
                tracing::warn!("[dispatcher] dropped event on {}: {e}", raw.routing_key);
                bump(&self.counters.malformed);
                Err(e)
            }
        }
    }

    fn reject(&self, error: &IngestError) {
        bump(&self.counters.malformed);
        tracing::warn!("[dispatcher] dropped event: {error}");
    }

    fn apply_telemetry(&self, fields: &Map<String, Value>) -> Result<IngestOutcome, IngestError> {
        let event = build_telemetry(fields, &self.directory)?;
        let unknown_device = self.directory.get(&event.device_id).is_none();
        if unknown_device {
            bump(&self.counters.unknown_devices);
            tracing::debug!("[dispatcher] telemetry from unknown device {}", event.device_id);
        }

        let device_id = event.device_id.clone();
        let location = event.location.clone();
        let timestamp = event.timestamp;

        match self.store.append(event) {
            AppendOutcome::Duplicate => {
                bump(&self.counters.duplicates);
                tracing::debug!("[dispatcher] duplicate telemetry {device_id}@{timestamp}");
                Ok(IngestOutcome::Duplicate { device_id, timestamp })
            }
            AppendOutcome::Appended(_) => {
                bump(&self.counters.appended);
                self.bus.publish(ChangeNotification::TelemetryAppended { scope: ScopeKey::Global });
                self.bus.publish(ChangeNotification::TelemetryAppended {
                    scope: ScopeKey::Device(device_id.clone()),
                });
                self.bus.publish(ChangeNotification::TelemetryAppended {
                    scope: ScopeKey::Location(location.clone()),
                });
                Ok(IngestOutcome::Appended {
                    device_id,
                    location,
                    unknown_device,
                })
            }
        }
    }

    async fn load_directory(&self) -> Result<usize, RegistryError> {
        let devices = self.registry.list_devices().await?;
        Ok(self.directory.replace_all(devices))
    }

    /// Relit tout le registre. En cas d'échec, le snapshot précédent reste en place.
    pub async fn refresh_directory(&self) -> IngestOutcome {
        let _writes = self.directory_writes.lock().await;
        let mut result = self.load_directory().await;
        if result.is_ok() {
            if let Err(e) = self.directory.verify() {
                tracing::warn!("[dispatcher] {e}, rebuilding directory");
                bump(&self.counters.directory_rebuilds);
                result = self.load_directory().await;
            }
        }

        match result {
            Ok(devices) => {
                bump(&self.counters.directory_refreshes);
                tracing::info!("[dispatcher] directory refreshed ({devices} devices)");
                self.bus.publish(ChangeNotification::DirectoryChanged);
                IngestOutcome::DirectoryRefreshed { devices }
            }
            Err(e) => {
                bump(&self.counters.refresh_failures);
                tracing::warn!("[dispatcher] directory refresh failed, keeping previous snapshot: {e}");
                IngestOutcome::DirectoryRefreshFailed { reason: e.to_string() }
            }
        }
    }

    /// Contrôle périodique de l'annuaire ; reconstruit depuis le registre si incohérent
    pub async fn check_directory(&self) -> Option<IngestOutcome> {
        match self.directory.verify() {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!("[dispatcher] {e}, forcing refresh");
                bump(&self.counters.directory_rebuilds);
                Some(self.refresh_directory().await)
            }
        }
    }

    pub async fn remove_device(&self, device_id: &str) -> IngestOutcome {
        let was_known = {
            let _writes = self.directory_writes.lock().await;
            self.directory.remove(device_id).is_some()
        };
        if !was_known {
            tracing::debug!("[dispatcher] delete for device {device_id} not in directory");
        }
        bump(&self.counters.removals);
        self.bus.publish(ChangeNotification::DeviceRemoved {
            device_id: device_id.to_string(),
        });
        self.bus.publish(ChangeNotification::DirectoryChanged);
        IngestOutcome::DeviceRemoved {
            device_id: device_id.to_string(),
            was_known,
        }
    }

    /// Boucle mono-écrivain : se termine quand tous les émetteurs sont fermés
    pub async fn run(self: Arc<Self>, mut queue: mpsc::Receiver<RawEvent>) {
        tracing::info!("[dispatcher] ingest loop started");
        while let Some(raw) = queue.recv().await {
            // les erreurs sont déjà comptées et loggées
            self.ingest_raw(&raw).await.ok();
        }
        tracing::info!("[dispatcher] ingest queue closed, loop stopped");
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            received: c.received.load(Ordering::Relaxed),
            appended: c.appended.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            unknown_devices: c.unknown_devices.load(Ordering::Relaxed),
            directory_refreshes: c.directory_refreshes.load(Ordering::Relaxed),
            refresh_failures: c.refresh_failures.load(Ordering::Relaxed),
            directory_rebuilds: c.directory_rebuilds.load(Ordering::Relaxed),
            removals: c.removals.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ScopeFilter;
    use crate::models::{Device, DeviceStatus, DeviceType};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    struct StubRegistry {
        devices: Mutex<Vec<Device>>,
        failing: Mutex<bool>,
    }

    #[async_trait]
    impl DeviceRegistry for StubRegistry {
        async fn list_devices(&self) -> Result<Vec<Device>, RegistryError> {
            if *self.failing.lock() {
                return Err(RegistryError::Unavailable("registry down".into()));
            }
            Ok(self.devices.lock().clone())
        }
    }

    fn device(id: &str, location: &str) -> Device {
        Device {
            device_id: id.into(),
            name: id.into(),
            device_type: DeviceType::Sensor,
            location: location.into(),
            status: DeviceStatus::Online,
            ip_address: None,
            mac_address: None,
            firmware_version: None,
            latitude: None,
            longitude: None,
        }
    }

    fn setup(devices: Vec<Device>) -> (Dispatcher, Arc<StubRegistry>, EventBus) {
        let registry = Arc::new(StubRegistry {
            devices: Mutex::new(devices),
            failing: Mutex::new(false),
        });
        let bus = EventBus::default();
        let dispatcher = Dispatcher::new(
            Arc::new(TelemetryStore::new(Default::default())),
            Arc::new(DeviceDirectory::new()),
            registry.clone(),
            bus.clone(),
        );
        (dispatcher, registry, bus)
    }

    fn telemetry(value: serde_json::Value) -> IngressEvent {
        match value {
            Value::Object(map) => IngressEvent::Telemetry(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_routing_key_classification() {
        let body = br#"{"device_id":"d1","timestamp":1.0}"#;
        for key in ["device.telemetry", "sensors.data", "cloud-security-iot.iot.telemetry.d1"] {
            assert!(matches!(IngressEvent::from_routing_key(key, body), Ok(IngressEvent::Telemetry(_))));
        }
        assert_eq!(IngressEvent::from_routing_key("device.created", b"{}"), Ok(IngressEvent::DeviceCreated));
        assert_eq!(IngressEvent::from_routing_key("device.updated", b""), Ok(IngressEvent::DeviceUpdated));
        assert_eq!(
            IngressEvent::from_routing_key("device.deleted", br#"{"device_id":"d1"}"#),
            Ok(IngressEvent::DeviceDeleted { device_id: "d1".into() })
        );
        assert!(IngressEvent::from_routing_key("device.deleted", b"{}").is_err());
        assert!(IngressEvent::from_routing_key("billing.invoice", body).is_err());
        assert!(IngressEvent::from_routing_key("sensors.data", b"[1,2]").is_err());
        assert!(IngressEvent::from_routing_key("sensors.data", b"not json").is_err());
    }

    #[test]
    fn test_topic_to_routing_key() {
        assert_eq!(RawEvent::from_topic("device/telemetry", "{}").routing_key, "device.telemetry");
    }

    #[test]
    fn test_build_telemetry_fields() {
        let directory = DeviceDirectory::new();
        directory.replace_all(vec![device("d1", "Rabat")]);

        let fields = json!({
            "device_id": "d1",
            "timestamp": 1700000000.25,
            "temperature": 21.5,
            "power": true,
            "label": "ignored",
            "nested": {"x": 1}
        });
        let Value::Object(fields) = fields else { unreachable!() };
        let event = build_telemetry(&fields, &directory).unwrap();

        assert_eq!(event.location, "Rabat");
        assert_eq!(event.number("temperature"), Some(21.5));
        assert_eq!(event.attribute("power"), Some(AttributeValue::Bool(true)));
        assert_eq!(event.attributes.len(), 2);

        let Value::Object(orphan) = json!({"device_id": "zz", "timestamp": 1}) else { unreachable!() };
        assert_eq!(build_telemetry(&orphan, &directory).unwrap().location, UNKNOWN_LOCATION);

        let Value::Object(with_city) = json!({"device_id": "d1", "city": "Paris", "timestamp": 1}) else {
            unreachable!()
        };
        assert_eq!(build_telemetry(&with_city, &directory).unwrap().location, "Paris");
    }

    #[tokio::test]
    async fn test_malformed_telemetry_is_rejected() {
        let (dispatcher, _, _) = setup(Vec::new());

        for bad in [
            json!({"timestamp": 1.0}),
            json!({"device_id": "", "timestamp": 1.0}),
            json!({"device_id": "d1"}),
            json!({"device_id": "d1", "timestamp": "yesterday"}),
        ] {
            assert!(matches!(dispatcher.ingest(telemetry(bad)).await, Err(IngestError::Malformed(_))));
        }
        assert_eq!(dispatcher.stats().malformed, 4);
        assert_eq!(dispatcher.stats().appended, 0);
    }

    #[tokio::test]
    async fn test_append_publishes_three_scopes() {
        let (dispatcher, _, bus) = setup(Vec::new());
        let mut all = bus.subscribe(ScopeFilter::All);

        let outcome = dispatcher
            .ingest(telemetry(json!({"device_id": "d1", "city": "Paris", "timestamp": 1.0})))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Appended {
                device_id: "d1".into(),
                location: "Paris".into(),
                unknown_device: true
            }
        );

        let scopes: Vec<ChangeNotification> = (0..3).filter_map(|_| all.try_recv()).collect();
        assert_eq!(
            scopes,
            vec![
                ChangeNotification::TelemetryAppended { scope: ScopeKey::Global },
                ChangeNotification::TelemetryAppended { scope: ScopeKey::Device("d1".into()) },
                ChangeNotification::TelemetryAppended { scope: ScopeKey::Location("Paris".into()) },
            ]
        );
        assert_eq!(dispatcher.stats().unknown_devices, 1);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let (dispatcher, _, _) = setup(Vec::new());
        let event = json!({"device_id": "d1", "city": "Paris", "timestamp": 5.0, "temperature": 20});

        dispatcher.ingest(telemetry(event.clone())).await.unwrap();
        let again = dispatcher.ingest(telemetry(event)).await.unwrap();

        assert!(matches!(again, IngestOutcome::Duplicate { .. }));
        assert_eq!(dispatcher.store.global_history().len(), 1);
        assert_eq!(dispatcher.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn test_created_refreshes_directory() {
        let (dispatcher, registry, bus) = setup(vec![device("d1", "Paris")]);
        let mut sub = bus.subscribe(ScopeFilter::Location("Paris".into()));

        let outcome = dispatcher.ingest(IngressEvent::DeviceCreated).await.unwrap();
        assert_eq!(outcome, IngestOutcome::DirectoryRefreshed { devices: 1 });
        assert_eq!(sub.try_recv(), Some(ChangeNotification::DirectoryChanged));

        registry.devices.lock().push(device("d2", "Paris"));
        dispatcher.ingest(IngressEvent::DeviceUpdated).await.unwrap();
        assert_eq!(dispatcher.directory.by_location("Paris").len(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let (dispatcher, registry, _) = setup(vec![device("d1", "Paris")]);
        dispatcher.refresh_directory().await;

        *registry.failing.lock() = true;
        let outcome = dispatcher.ingest(IngressEvent::DeviceUpdated).await.unwrap();

        assert!(matches!(outcome, IngestOutcome::DirectoryRefreshFailed { .. }));
        assert!(dispatcher.directory.get("d1").is_some());
        assert_eq!(dispatcher.stats().refresh_failures, 1);
    }

    #[tokio::test]
    async fn test_delete_emits_removed_then_changed() {
        let (dispatcher, _, bus) = setup(vec![device("d1", "Paris")]);
        dispatcher.refresh_directory().await;
        let mut sub = bus.subscribe(ScopeFilter::Device("d1".into()));

        let outcome = dispatcher
            .ingest(IngressEvent::DeviceDeleted { device_id: "d1".into() })
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::DeviceRemoved { device_id: "d1".into(), was_known: true });
        assert_eq!(sub.try_recv(), Some(ChangeNotification::DeviceRemoved { device_id: "d1".into() }));
        assert_eq!(sub.try_recv(), Some(ChangeNotification::DirectoryChanged));
        assert!(dispatcher.directory.get("d1").is_none());
    }

    #[tokio::test]
    async fn test_run_loop_survives_malformed_events() {
        let (dispatcher, _, _) = setup(Vec::new());
        let dispatcher = Arc::new(dispatcher);
        let (tx, rx) = ingest_channel(8);

        tx.send(RawEvent::new("sensors.data", "garbage")).await.unwrap();
        tx.send(RawEvent::new("nowhere", "{}")).await.unwrap();
        tx.send(RawEvent::from_topic(
            "sensors/data",
            r#"{"device_id":"device_001","city":"Casablanca","temperature":30.1,"humidity":55.0,"timestamp":10.0}"#,
        ))
        .await
        .unwrap();
        drop(tx);

        Arc::clone(&dispatcher).run(rx).await;

        let stats = dispatcher.stats();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.appended, 1);
        assert_eq!(dispatcher.store.location_history("Casablanca").len(), 1);
    }

    /// Registre qui bloque list_devices jusqu'à libération
    struct GatedRegistry {
        devices: Vec<Device>,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl DeviceRegistry for GatedRegistry {
        async fn list_devices(&self) -> Result<Vec<Device>, RegistryError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(self.devices.clone())
        }
    }

    #[tokio::test]
    async fn test_delete_during_refresh_is_not_undone() {
        let registry = Arc::new(GatedRegistry {
            devices: vec![device("d1", "Paris")],
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(TelemetryStore::new(Default::default())),
            Arc::new(DeviceDirectory::new()),
            registry.clone(),
            EventBus::default(),
        ));

        // la relecture a obtenu une liste qui contient encore d1
        let refresh = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.refresh_directory().await }
        });
        registry.entered.notified().await;

        let delete = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.remove_device("d1").await }
        });
        tokio::task::yield_now().await;
        registry.release.notify_one();

        assert_eq!(refresh.await.unwrap(), IngestOutcome::DirectoryRefreshed { devices: 1 });
        assert_eq!(
            delete.await.unwrap(),
            IngestOutcome::DeviceRemoved {
                device_id: "d1".into(),
                was_known: true
            }
        );
        assert!(dispatcher.directory.get("d1").is_none());
    }
}
