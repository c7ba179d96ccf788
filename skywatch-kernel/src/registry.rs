/**
 * DEVICE REGISTRY - Frontière avec le registre de devices (source de vérité)
 *
 * RÔLE :
 * Le kernel ne persiste aucun device : il relit la liste complète à chaque
 * notification created/updated et la recopie dans l'annuaire.
 *
 * IMPLÉMENTATIONS :
 * - HttpDeviceRegistry : GET {url}/devices/ (tableau JSON)
 * - doubles de test dans le devkit
 */

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::models::Device;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry answered {0}")]
    Status(u16),
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>, RegistryError>;
}

pub struct HttpDeviceRegistry {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDeviceRegistry {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("skywatch-kernel")
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn devices_url(&self) -> String {
        format!("{}/devices/", self.base_url)
    }
}

#[async_trait]
impl DeviceRegistry for HttpDeviceRegistry {
    async fn list_devices(&self) -> Result<Vec<Device>, RegistryError> {
        let response = self.client.get(self.devices_url()).send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::Status(response.status().as_u16()));
        }
        let devices: Vec<Device> = response.json().await?;
        tracing::debug!("[registry] fetched {} devices", devices.len());
        Ok(devices)
    }
}
