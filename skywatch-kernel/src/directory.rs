/**
 * DEVICE DIRECTORY - Projection mémoire du registre de devices
 *
 * RÔLE :
 * Miroir lecture seule des enregistrements du registre, indexé par id et par
 * localisation. Le kernel ne crée jamais de device : il ne fait que recopier.
 *
 * FONCTIONNEMENT :
 * - replace_all : le nouveau snapshot est construit hors verrou puis échangé (swap de pointeur)
 * - Les lecteurs gardent un Arc sur l'ancien ou le nouveau snapshot, jamais un état partiel
 * - verify : contrôle de cohérence des index (déclenche un rebuild côté dispatcher)
 */

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Device, DeviceType};

#[derive(Debug, Error, PartialEq)]
pub enum DirectoryError {
    #[error("directory index inconsistent: {0}")]
    Inconsistent(String),
}

/// Snapshot immuable : liste dans l'ordre du registre + index
#[derive(Debug, Default)]
pub struct DirectorySnapshot {
    devices: Vec<Device>,
    by_id: HashMap<String, usize>,
    by_location: HashMap<String, Vec<usize>>,
}

impl DirectorySnapshot {
    /// Ids dupliqués : le dernier enregistrement gagne, à la position du premier
    pub fn build(incoming: Vec<Device>) -> Self {
        let mut devices: Vec<Device> = Vec::with_capacity(incoming.len());
        let mut by_id: HashMap<String, usize> = HashMap::with_capacity(incoming.len());

        for device in incoming {
            match by_id.get(&device.device_id) {
                Some(&pos) => devices[pos] = device,
                None => {
                    by_id.insert(device.device_id.clone(), devices.len());
                    devices.push(device);
                }
            }
        }

        let mut by_location: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, device) in devices.iter().enumerate() {
            by_location.entry(device.location.clone()).or_default().push(pos);
        }

        Self { devices, by_id, by_location }
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.by_id.get(device_id).and_then(|&pos| self.devices.get(pos))
    }

    pub fn by_location(&self, location: &str) -> Vec<Device> {
        self.by_location
            .get(location)
            .map(|positions| positions.iter().filter_map(|&p| self.devices.get(p)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn verify(&self) -> Result<(), DirectoryError> {
        if self.by_id.len() != self.devices.len() {
            return Err(DirectoryError::Inconsistent(format!(
                "{} ids indexed for {} devices",
                self.by_id.len(),
                self.devices.len()
            )));
        }
        for (id, &pos) in &self.by_id {
            match self.devices.get(pos) {
                Some(device) if &device.device_id == id => {}
                _ => {
                    return Err(DirectoryError::Inconsistent(format!(
                        "id index for {id} points to slot {pos}"
                    )))
                }
            }
        }
        let mut located = 0;
        for (location, positions) in &self.by_location {
            for &pos in positions {
                match self.devices.get(pos) {
                    Some(device) if &device.location == location => located += 1,
                    _ => {
                        return Err(DirectoryError::Inconsistent(format!(
                            "location index for {location} points to slot {pos}"
                        )))
                    }
                }
            }
        }
        if located != self.devices.len() {
            return Err(DirectoryError::Inconsistent(format!(
                "{located} located entries for {} devices",
                self.devices.len()
            )));
        }
        Ok(())
    }
}

pub struct DeviceDirectory {
    current: RwLock<Arc<DirectorySnapshot>>,
}

impl Default for DeviceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(DirectorySnapshot::default())),
        }
    }

    /// Remplace tout le contenu. Le contenu visible après l'appel est une fonction
    /// de `devices` seule : rejouer la même liste donne le même état.
    pub fn replace_all(&self, devices: Vec<Device>) -> usize {
        let next = Arc::new(DirectorySnapshot::build(devices));
        let count = next.len();
        *self.current.write() = next;
        count
    }

    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.snapshot().get(device_id).cloned()
    }

    pub fn by_location(&self, location: &str) -> Vec<Device> {
        self.snapshot().by_location(location)
    }

    /// Type effectif (Local pour la machine hôte) d'un device connu
    pub fn type_of(&self, device_id: &str) -> Option<DeviceType> {
        self.snapshot().get(device_id).map(Device::effective_type)
    }

    pub fn location_of(&self, device_id: &str) -> Option<String> {
        self.snapshot().get(device_id).map(|d| d.location.clone())
    }

    pub fn all(&self) -> Vec<Device> {
        self.snapshot().devices().to_vec()
    }

    /// Retire un device ; retourne l'enregistrement retiré s'il existait
    pub fn remove(&self, device_id: &str) -> Option<Device> {
        let mut current = self.current.write();
        let removed = current.get(device_id).cloned()?;
        let remaining: Vec<Device> = current
            .devices()
            .iter()
            .filter(|d| d.device_id != device_id)
            .cloned()
            .collect();
        *current = Arc::new(DirectorySnapshot::build(remaining));
        Some(removed)
    }

    pub fn verify(&self) -> Result<(), DirectoryError> {
        self.snapshot().verify()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
