/**
 * HEALTH - État de santé du kernel
 *
 * RÔLE :
 * Agrège en un seul rapport les compteurs des sous-systèmes (buffers,
 * ingestion, cache de prévisions, bus) et l'état du lien MQTT, pour
 * GET /system/health et le résumé périodique dans les logs.
 *
 * FONCTIONNEMENT :
 * - Le lien MQTT est une petite machine à états mise à jour par la boucle d'événements
 * - Chaque perte de connexion compte une reconnexion
 * - Le rapport est recalculé à chaque lecture, rien n'est mis en cache
 */

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;

use crate::dispatcher::DispatchStats;
use crate::forecast_cache::ForecastStats;
use crate::kernel::Kernel;
use crate::telemetry_store::StoreStats;

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub devices_tracked: u32,
    pub subscribers: u32,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub buffers: StoreStats,
    pub ingest: DispatchStats,
    pub forecast: ForecastStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttLinkState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

impl MqttLinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            MqttLinkState::Connecting => "connecting",
            MqttLinkState::Connected => "connected",
            MqttLinkState::Disconnected => "disconnected",
            MqttLinkState::Reconnecting => "reconnecting",
        }
    }
}

/// Partagé entre la boucle MQTT et l'API : les clones voient le même état
#[derive(Clone)]
pub struct HealthTracker {
    started: Instant,
    link: Arc<Mutex<MqttLinkState>>,
    link_losses: Arc<AtomicU32>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            link: Arc::new(Mutex::new(MqttLinkState::Connecting)),
            link_losses: Arc::new(AtomicU32::new(0)),
        }
    }

    fn set_link(&self, state: MqttLinkState) {
        let mut link = self.link.lock();
        if *link != state {
            tracing::debug!("[health] mqtt {} -> {}", link.as_str(), state.as_str());
            *link = state;
        }
    }

    /// ConnAck reçu
    pub fn mark_mqtt_connected(&self) {
        self.set_link(MqttLinkState::Connected);
    }

    pub fn mark_mqtt_disconnected(&self) {
        self.set_link(MqttLinkState::Disconnected);
    }

    /// Erreur de la boucle rumqttc : elle retentera seule au prochain poll
    pub fn increment_reconnects(&self) {
        self.link_losses.fetch_add(1, Ordering::Relaxed);
        self.set_link(MqttLinkState::Reconnecting);
    }

    pub fn link_state(&self) -> MqttLinkState {
        *self.link.lock()
    }

    pub fn mqtt_status(&self) -> String {
        self.link_state().as_str().to_string()
    }

    pub fn reconnects(&self) -> u32 {
        self.link_losses.load(Ordering::Relaxed)
    }

    pub fn get_health(&self, kernel: &Kernel) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.started.elapsed().as_secs(),
            devices_tracked: kernel.directory.len() as u32,
            subscribers: kernel.bus.subscriber_count() as u32,
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status(),
            mqtt_reconnects: self.reconnects(),
            buffers: kernel.store.stats(),
            ingest: kernel.dispatcher.stats(),
            forecast: kernel.forecasts.stats(),
        }
    }

    /// Résumé de santé périodique dans les logs
    pub fn spawn_health_reporter(&self, kernel: Arc<Kernel>, every: Duration) {
        let tracker = self.clone();
        task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let health = tracker.get_health(&kernel);
                tracing::info!(
                    "[health] uptime {}s, devices {}, buffered {}, ingested {}, malformed {}, mqtt {}",
                    health.uptime_seconds,
                    health.devices_tracked,
                    health.buffers.global_events,
                    health.ingest.appended,
                    health.ingest.malformed,
                    health.mqtt_status
                );
            }
        });
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}
