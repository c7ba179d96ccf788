/**
 * SIMULATOR CONFIG - Paramètres lus depuis l'environnement
 *
 * Variables reconnues (toutes optionnelles) :
 * - SKYWATCH_MQTT_HOST / SKYWATCH_MQTT_PORT : broker cible
 * - SKYWATCH_SIM_INTERVAL_SECS : période d'émission des capteurs
 * - SKYWATCH_SIM_MODE : sensors | local | both
 * - SKYWATCH_HOST_DEVICE_ID : identifiant imposé pour la machine locale
 * - SKYWATCH_REGISTRY_URL : registre où enregistrer la machine locale
 */

use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    Sensors,
    Local,
    Both,
}

impl SimMode {
    pub fn sensors(self) -> bool {
        matches!(self, SimMode::Sensors | SimMode::Both)
    }

    pub fn local(self) -> bool {
        matches!(self, SimMode::Local | SimMode::Both)
    }
}

impl FromStr for SimMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sensors" => Ok(SimMode::Sensors),
            "local" => Ok(SimMode::Local),
            "both" | "" => Ok(SimMode::Both),
            other => bail!("unknown simulator mode '{other}' (expected sensors|local|both)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub interval: Duration,
    /// Le moniteur local publie plus souvent que les capteurs
    pub local_interval: Duration,
    pub mode: SimMode,
    pub host_device_id: Option<String>,
    pub registry_url: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "localhost".into(),
            mqtt_port: 1883,
            interval: Duration::from_secs(5),
            local_interval: Duration::from_secs(4),
            mode: SimMode::Both,
            host_device_id: None,
            registry_url: "http://localhost:8001".into(),
        }
    }
}

impl SimConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(host) = lookup("SKYWATCH_MQTT_HOST") {
            cfg.mqtt_host = host;
        }
        if let Some(port) = lookup("SKYWATCH_MQTT_PORT") {
            cfg.mqtt_port = port.parse().with_context(|| format!("invalid SKYWATCH_MQTT_PORT '{port}'"))?;
        }
        if let Some(secs) = lookup("SKYWATCH_SIM_INTERVAL_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("invalid SKYWATCH_SIM_INTERVAL_SECS '{secs}'"))?;
            cfg.interval = Duration::from_secs(secs.max(1));
        }
        if let Some(mode) = lookup("SKYWATCH_SIM_MODE") {
            cfg.mode = mode.parse()?;
        }
        cfg.host_device_id = lookup("SKYWATCH_HOST_DEVICE_ID").filter(|id| !id.trim().is_empty());
        if let Some(url) = lookup("SKYWATCH_REGISTRY_URL") {
            cfg.registry_url = url;
        }

        Ok(cfg)
    }
}
