/**
 * KERNEL - Assemblage des composants du moteur Skywatch
 *
 * RÔLE :
 * Construit et relie store, annuaire, cache météo, bus, dispatcher et vues.
 * Chaque Kernel possède ses propres instances (aucun état global) : les tests
 * peuvent en créer autant qu'ils veulent.
 */

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::{EventBus, ScopeFilter, Subscription, DEFAULT_BUS_CAPACITY};
use crate::directory::DeviceDirectory;
use crate::dispatcher::{Dispatcher, RawEvent};
use crate::forecast_cache::{ForecastCache, DEFAULT_FETCH_TIMEOUT, DEFAULT_TTL};
use crate::query::QueryLayer;
use crate::registry::DeviceRegistry;
use crate::telemetry_store::{RetentionPolicy, TelemetryStore};
use crate::weather::WeatherProvider;

pub struct KernelBuilder {
    registry: Arc<dyn DeviceRegistry>,
    weather: Arc<dyn WeatherProvider>,
    retention: RetentionPolicy,
    forecast_ttl: Duration,
    fetch_timeout: Duration,
    bus_capacity: usize,
}

impl KernelBuilder {
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_forecast_ttl(mut self, ttl: Duration) -> Self {
        self.forecast_ttl = ttl;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    pub fn build(self) -> Kernel {
        let store = Arc::new(TelemetryStore::new(self.retention));
        let directory = Arc::new(DeviceDirectory::new());
        let forecasts = Arc::new(ForecastCache::new(self.weather, self.forecast_ttl, self.fetch_timeout));
        let bus = EventBus::new(self.bus_capacity);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&directory),
            self.registry,
            bus.clone(),
        ));
        let query = QueryLayer::new(Arc::clone(&store), Arc::clone(&directory), Arc::clone(&forecasts));

        Kernel {
            store,
            directory,
            forecasts,
            bus,
            dispatcher,
            query,
        }
    }
}

pub struct Kernel {
    pub store: Arc<TelemetryStore>,
    pub directory: Arc<DeviceDirectory>,
    pub forecasts: Arc<ForecastCache>,
    pub bus: EventBus,
    pub dispatcher: Arc<Dispatcher>,
    pub query: QueryLayer,
}

impl Kernel {
    pub fn builder(registry: Arc<dyn DeviceRegistry>, weather: Arc<dyn WeatherProvider>) -> KernelBuilder {
        KernelBuilder {
            registry,
            weather,
            retention: RetentionPolicy::default(),
            forecast_ttl: DEFAULT_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }

    pub fn subscribe(&self, filter: ScopeFilter) -> Subscription {
        self.bus.subscribe(filter)
    }

    /// Démarre la boucle mono-écrivain sur la file d'ingestion
    pub fn spawn_dispatcher(&self, queue: mpsc::Receiver<RawEvent>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.dispatcher).run(queue))
    }

    /// Balayage périodique : rétention par âge + contrôle de cohérence de l'annuaire
    pub fn spawn_maintenance(&self, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let pruned = store.prune_expired(unix_now());
                if pruned > 0 {
                    tracing::debug!("[maintenance] pruned {pruned} expired telemetry entries");
                }
                dispatcher.check_directory().await;
            }
        })
    }
}

pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
