/**
 * CONFIG - Chargement de la configuration du kernel Skywatch
 *
 * RÔLE :
 * Fichier YAML désigné par SKYWATCH_KERNEL_CONFIG (défaut : skywatch.yaml).
 * Fichier absent, vide ou invalide : configuration par défaut (loggé).
 *
 * SURCHARGES ENV :
 * SKYWATCH_REGISTRY_URL, SKYWATCH_MQTT_HOST, SKYWATCH_MQTT_PORT, SKYWATCH_HTTP_BIND
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::dispatcher::DEFAULT_QUEUE_CAPACITY;
use crate::forecast_cache::{DEFAULT_FETCH_TIMEOUT, DEFAULT_TTL};
use crate::telemetry_store::{RetentionPolicy, DEFAULT_BUFFER_CAPACITY};
use crate::weather::{Coordinates, OpenMeteoConfig, DEFAULT_FORECAST_URL, DEFAULT_GEOCODING_URL};

pub const CONFIG_ENV: &str = "SKYWATCH_KERNEL_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "skywatch.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkywatchConfig {
    pub mqtt: MqttConf,
    pub http: HttpConf,
    pub registry: RegistryConf,
    pub buffers: BufferConf,
    pub forecast: ForecastConf,
    pub ingest: IngestConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topics: Vec<String>,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "skywatch-kernel".into(),
            topics: vec![
                "device/#".into(),
                "sensors/data".into(),
                "cloud-security-iot/iot/telemetry/#".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConf {
    pub url: String,
    pub timeout_seconds: u64,
}

impl Default for RegistryConf {
    fn default() -> Self {
        Self {
            url: "http://localhost:8001".into(),
            timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConf {
    pub global: usize,
    pub per_device: usize,
    pub per_location: usize,
    /// Rétention par âge, désactivée si absent
    pub max_age_seconds: Option<u64>,
    pub sweep_interval_seconds: u64,
}

impl Default for BufferConf {
    fn default() -> Self {
        Self {
            global: DEFAULT_BUFFER_CAPACITY,
            per_device: DEFAULT_BUFFER_CAPACITY,
            per_location: DEFAULT_BUFFER_CAPACITY,
            max_age_seconds: None,
            sweep_interval_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConf {
    pub ttl_seconds: u64,
    pub fetch_timeout_seconds: u64,
    pub base_url: String,
    /// null désactive le géocodage
    pub geocoding_url: Option<String>,
    pub coordinates: HashMap<String, Coordinates>,
    pub fallback: Option<Coordinates>,
}

impl Default for ForecastConf {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL.as_secs(),
            fetch_timeout_seconds: DEFAULT_FETCH_TIMEOUT.as_secs(),
            base_url: DEFAULT_FORECAST_URL.into(),
            geocoding_url: Some(DEFAULT_GEOCODING_URL.into()),
            coordinates: HashMap::new(),
            fallback: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConf {
    pub queue_capacity: usize,
}

impl Default for IngestConf {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl SkywatchConfig {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            global_capacity: self.buffers.global,
            per_device_capacity: self.buffers.per_device,
            per_location_capacity: self.buffers.per_location,
            max_age: self.buffers.max_age_seconds.map(Duration::from_secs),
        }
    }

    pub fn forecast_ttl(&self) -> Duration {
        Duration::from_secs(self.forecast.ttl_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.forecast.fetch_timeout_seconds)
    }

    pub fn open_meteo(&self) -> OpenMeteoConfig {
        OpenMeteoConfig {
            base_url: self.forecast.base_url.clone(),
            geocoding_url: self.forecast.geocoding_url.clone(),
            coordinates: self.forecast.coordinates.clone(),
            fallback: self.forecast.fallback,
            timeout: self.fetch_timeout(),
        }
    }

    /// `lookup` abstrait l'environnement (std::env::var en production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SKYWATCH_REGISTRY_URL") {
            self.registry.url = url;
        }
        if let Some(host) = lookup("SKYWATCH_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("SKYWATCH_MQTT_PORT") {
            match port.parse() {
                Ok(port) => self.mqtt.port = port,
                Err(_) => tracing::warn!("[config] SKYWATCH_MQTT_PORT invalide: {port}"),
            }
        }
        if let Some(bind) = lookup("SKYWATCH_HTTP_BIND") {
            self.http.bind = bind;
        }
    }
}

pub fn parse_config(txt: &str) -> Result<SkywatchConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(SkywatchConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config_from(path: impl AsRef<Path>) -> SkywatchConfig {
    let path = path.as_ref();
    if !path.exists() {
        tracing::info!("[config] pas de {}, usage config par défaut", path.display());
        return SkywatchConfig::default();
    }
    let txt = match fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) => {
            tracing::warn!("[config] lecture {} impossible: {e}", path.display());
            return SkywatchConfig::default();
        }
    };
    parse_config(&txt).unwrap_or_else(|e| {
        tracing::warn!("[config] config invalide: {e}");
        SkywatchConfig::default()
    })
}

/// Fichier désigné par SKYWATCH_KERNEL_CONFIG puis surcharges d'environnement
pub async fn load_config() -> SkywatchConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut cfg = load_config_from(&path).await;
    cfg.apply_overrides(|key| std::env::var(key).ok());
    cfg
}
