/*!
Test Harness pour le kernel Skywatch

Facilite l'écriture de scénarios de bout en bout avec:
- Kernel complet branché sur les doubles (registre + météo)
- Envoi d'événements au format des producteurs réels
- Attente bornée de notifications sur le bus
*/

use anyhow::{Context, Result};
use serde_json::Value;
use skywatch_kernel::bus::{ChangeNotification, ScopeFilter, Subscription};
use skywatch_kernel::dispatcher::{ingest_channel, IngestOutcome, IngestSender, IngressEvent, RawEvent};
use skywatch_kernel::kernel::{Kernel, KernelBuilder};
use skywatch_kernel::models::Device;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::registry_stub::MockDeviceRegistry;
use crate::weather_stub::MockWeatherProvider;

/// Harness de test : un kernel isolé par instance
pub struct TestHarness {
    pub kernel: Arc<Kernel>,
    pub registry: Arc<MockDeviceRegistry>,
    pub weather: Arc<MockWeatherProvider>,
}

impl TestHarness {
    /// Kernel avec configuration par défaut
    pub fn new() -> Self {
        Self::with_builder(MockWeatherProvider::new(), |builder| builder)
    }

    /// Permet d'ajuster rétention, TTL, timeout avant construction
    pub fn with_builder<F>(weather: MockWeatherProvider, configure: F) -> Self
    where
        F: FnOnce(KernelBuilder) -> KernelBuilder,
    {
        init_tracing();
        let registry = Arc::new(MockDeviceRegistry::new());
        let weather = Arc::new(weather);
        let kernel = configure(Kernel::builder(registry.clone(), weather.clone())).build();

        Self {
            kernel: Arc::new(kernel),
            registry,
            weather,
        }
    }

    /// Publie une liste de devices dans le registre puis notifie le kernel
    pub async fn publish_devices(&self, devices: Vec<Device>) -> Result<IngestOutcome> {
        self.registry.set_devices(devices);
        self.kernel
            .dispatcher
            .ingest(IngressEvent::DeviceCreated)
            .await
            .context("directory refresh")
    }

    /// Retire le device du registre et envoie la notification de suppression
    pub async fn delete_device(&self, device_id: &str) -> Result<IngestOutcome> {
        self.registry.remove(device_id);
        self.kernel
            .dispatcher
            .ingest(IngressEvent::DeviceDeleted {
                device_id: device_id.to_string(),
            })
            .await
            .context("device delete")
    }

    /// Envoie un message sur une routing key, comme le ferait le transport
    pub async fn send(&self, routing_key: &str, payload: &Value) -> Result<IngestOutcome> {
        let raw = RawEvent::new(routing_key, serde_json::to_vec(payload)?);
        Ok(self.kernel.dispatcher.ingest_raw(&raw).await?)
    }

    pub async fn send_telemetry(&self, payload: &Value) -> Result<IngestOutcome> {
        self.send("device.telemetry", payload).await
    }

    /// Démarre la boucle d'ingestion ; le sender alimente la file comme MQTT
    pub fn start_ingest_loop(&self, capacity: usize) -> IngestSender {
        let (sender, queue) = ingest_channel(capacity);
        self.kernel.spawn_dispatcher(queue);
        sender
    }

    pub fn subscribe(&self, filter: ScopeFilter) -> Subscription {
        self.kernel.subscribe(filter)
    }

    /// Attend la première notification satisfaisant `predicate`
    pub async fn wait_for<P>(
        subscription: &mut Subscription,
        wait: Duration,
        predicate: P,
    ) -> Result<Option<ChangeNotification>>
    where
        P: Fn(&ChangeNotification) -> bool,
    {
        let found = timeout(wait, async {
            while let Some(notification) = subscription.recv().await {
                if predicate(&notification) {
                    return Some(notification);
                }
            }
            None
        })
        .await;

        match found {
            Ok(notification) => Ok(notification),
            Err(_) => {
                tracing::warn!("[harness] timeout waiting for notification");
                Ok(None)
            }
        }
    }

    /// Vide les notifications déjà en attente
    pub fn drain(subscription: &mut Subscription) -> Vec<ChangeNotification> {
        std::iter::from_fn(|| subscription.try_recv()).collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::MessageBuilder;
    use skywatch_kernel::models::DeviceType;

    #[tokio::test]
    async fn test_harness_roundtrip() {
        let harness = TestHarness::new();
        harness
            .publish_devices(vec![MessageBuilder::device("d1", DeviceType::Sensor, "Paris")])
            .await
            .unwrap();

        let outcome = harness
            .send("sensors.data", &MessageBuilder::sensor_reading("d1", "Paris", 21.0, 40.0, 1.0))
            .await
            .unwrap();

        assert!(matches!(outcome, IngestOutcome::Appended { unknown_device: false, .. }));
        assert_eq!(harness.kernel.store.device_history("d1").len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_send_is_an_error() {
        let harness = TestHarness::new();
        assert!(harness.send_telemetry(&serde_json::json!({"timestamp": 1})).await.is_err());
    }
}
