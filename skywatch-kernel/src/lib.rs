//! SKYWATCH KERNEL - Agrégation de télémétrie IoT et corrélation météo
//!
//! RÔLE :
//! Ingère un flux continu de télémétrie par device, garde un historique borné
//! par scope, reflète le registre de devices et sert des vues cohérentes
//! (par device, par localisation, par type) enrichies des prévisions météo.
//!
//! FLUX : producteurs -> (MQTT | HTTP) -> Dispatcher -> {ring buffers, annuaire}
//!        -> vues <-> cache météo -> observateurs (JSON, SSE, abonnés in-process)
//!

pub mod bus;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod forecast_cache;
pub mod health;
pub mod http;
pub mod kernel;
pub mod models;
pub mod mqtt;
pub mod query;
pub mod registry;
pub mod ring_buffer;
pub mod telemetry_store;
pub mod weather;

pub use bus::{ChangeNotification, EventBus, ScopeFilter, Subscription};
pub use dispatcher::{IngestError, IngestOutcome, IngressEvent, RawEvent};
pub use forecast_cache::{ForecastCache, ForecastLookup};
pub use kernel::{Kernel, KernelBuilder};
pub use models::{AttributeValue, Device, DeviceStatus, DeviceType, Forecast, ScopeKey, TelemetryEvent};
pub use registry::{DeviceRegistry, RegistryError};
pub use weather::{ForecastError, WeatherProvider};
