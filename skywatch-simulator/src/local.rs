//! Moniteur de la machine locale : CPU / RAM / disque réels via sysinfo.
//!
//! La machine est un device de type Server rattaché à la localisation "Local" ;
//! elle est retrouvée ou créée dans le registre au démarrage.

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use sysinfo::{Disks, System};

pub const LOCAL_CITY: &str = "Local";
pub const TELEMETRY_TOPIC_PREFIX: &str = "cloud-security-iot/iot/telemetry";

#[derive(Debug, Clone, Serialize)]
pub struct HostMetrics {
    pub device_id: String,
    pub city: &'static str,
    pub cpu_usage: f64,
    pub ram_usage: f64,
    pub disk_usage: f64,
    // champs attendus par les vues capteurs, toujours nuls ici
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: f64,
}

pub fn topic_for(device_id: &str) -> String {
    format!("{TELEMETRY_TOPIC_PREFIX}/{device_id}")
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round1(used as f64 * 100.0 / total as f64)
    }
}

pub struct HostSampler {
    sys: System,
    disks: Disks,
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            disks: Disks::new_with_refreshed_list(),
        }
    }

    /// Le premier appel renvoie un CPU à 0 : sysinfo a besoin de deux mesures
    pub fn sample(&mut self, device_id: &str, timestamp: f64) -> HostMetrics {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.disks.refresh();

        // disque racine, sinon le premier monté
        let disks = self.disks.list();
        let disk = disks
            .iter()
            .find(|d| d.mount_point() == std::path::Path::new("/"))
            .or_else(|| disks.first());
        let disk_usage = disk.map_or(0.0, |d| {
            percent(d.total_space().saturating_sub(d.available_space()), d.total_space())
        });

        HostMetrics {
            device_id: device_id.to_string(),
            city: LOCAL_CITY,
            cpu_usage: round1(self.sys.global_cpu_info().cpu_usage() as f64),
            ram_usage: percent(self.sys.used_memory(), self.sys.total_memory()),
            disk_usage,
            temperature: 0.0,
            humidity: 0.0,
            timestamp,
        }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Cherche un device "Local" dans le registre, sinon le crée
pub async fn ensure_host_device(registry_url: &str) -> Result<String> {
    let base = registry_url.trim_end_matches('/');
    let url = format!("{base}/devices/");
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("http client")?;

    let devices: Vec<Value> = http
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .context("list devices")?
        .json()
        .await
        .context("decode devices")?;

    if let Some(id) = find_local_device(&devices) {
        tracing::info!("[local] found existing host device {id}");
        return Ok(id);
    }

    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    let created: Value = http
        .post(&url)
        .json(&json!({
            "name": format!("Host PC ({hostname})"),
            "type": "Server",
            "city": LOCAL_CITY,
            "ip_address": "127.0.0.1",
            "mac_address": "00:00:00:00:00:00",
            "firmware_version": "v1.0",
            "latitude": "0",
            "longitude": "0"
        }))
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .context("create host device")?
        .json()
        .await
        .context("decode created device")?;

    let id = created
        .get("device_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .context("registry response without device_id")?;
    tracing::info!("[local] registered host device {id}");
    Ok(id)
}

fn find_local_device(devices: &[Value]) -> Option<String> {
    devices
        .iter()
        .find(|d| {
            let location = d.get("city").or_else(|| d.get("location")).and_then(Value::as_str);
            location == Some(LOCAL_CITY)
        })
        .and_then(|d| d.get("device_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Identité de la machine : imposée, sinon registre (3 essais), sinon hostname
pub async fn resolve_host_id(forced: Option<String>, registry_url: &str) -> String {
    if let Some(id) = forced {
        return id;
    }
    for attempt in 1..=3 {
        match ensure_host_device(registry_url).await {
            Ok(id) => return id,
            Err(e) => {
                tracing::warn!("[local] registry attempt {attempt}/3 failed: {e:#}");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    tracing::warn!("[local] registry unreachable, publishing as {hostname}");
    hostname
}

pub async fn run(client: AsyncClient, device_id: String, every: Duration) {
    let topic = topic_for(&device_id);
    tracing::info!("[local] monitoring host {device_id} on {topic}");

    let mut sampler = HostSampler::new();
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let metrics = sampler.sample(&device_id, crate::unix_now());
        let payload = match serde_json::to_vec(&metrics) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("[local] serialize metrics: {e}");
                continue;
            }
        };
        match client.publish(topic.as_str(), QoS::AtLeastOnce, false, payload).await {
            Ok(()) => tracing::debug!(
                "[local] CPU {}% | RAM {}% | Disk {}%",
                metrics.cpu_usage,
                metrics.ram_usage,
                metrics.disk_usage
            ),
            Err(e) => tracing::warn!("[local] publish failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_and_percent() {
        assert_eq!(topic_for("host-1"), "cloud-security-iot/iot/telemetry/host-1");
        assert_eq!(percent(1, 3), 33.3);
        assert_eq!(percent(5, 0), 0.0);
    }

    #[test]
    fn test_find_local_device() {
        let devices = vec![
            json!({"device_id": "d1", "city": "Paris"}),
            json!({"device_id": "host-9", "city": "Local"}),
        ];
        assert_eq!(find_local_device(&devices).as_deref(), Some("host-9"));
        assert!(find_local_device(&devices[..1]).is_none());
    }

    #[test]
    fn test_sample_shape() {
        let mut sampler = HostSampler::new();
        let metrics = sampler.sample("host-1", 10.0);
        assert!((0.0..=100.0).contains(&metrics.ram_usage));
        assert!((0.0..=100.0).contains(&metrics.disk_usage));

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["city"], "Local");
        assert_eq!(json["temperature"], 0.0);
    }
}
