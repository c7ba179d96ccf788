/*!
Registre de devices en mémoire

Joue le rôle du service de gestion des devices : la liste est modifiée par le
test, puis le kernel la relit sur un événement created/updated.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use skywatch_kernel::models::Device;
use skywatch_kernel::registry::{DeviceRegistry, RegistryError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct MockDeviceRegistry {
    devices: Mutex<Vec<Device>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<Device>) -> Self {
        let registry = Self::default();
        registry.set_devices(devices);
        registry
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.devices.lock() = devices;
    }

    /// Ajoute ou remplace (même device_id)
    pub fn upsert(&self, device: Device) {
        let mut devices = self.devices.lock();
        match devices.iter_mut().find(|d| d.device_id == device.device_id) {
            Some(existing) => *existing = device,
            None => devices.push(device),
        }
    }

    pub fn remove(&self, device_id: &str) -> bool {
        let mut devices = self.devices.lock();
        let before = devices.len();
        devices.retain(|d| d.device_id != device_id);
        devices.len() != before
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceRegistry for MockDeviceRegistry {
    async fn list_devices(&self) -> Result<Vec<Device>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("mock registry down".into()));
        }
        Ok(self.devices.lock().clone())
    }
}
