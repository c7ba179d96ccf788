/**
 * MODELS - Types métier partagés par tout le kernel Skywatch
 *
 * RÔLE :
 * Device (miroir du registre), TelemetryEvent (mesure horodatée), prévisions météo
 * et clés de scope des ring buffers.
 *
 * FORMAT WIRE :
 * Les noms suivent le registre et les producteurs existants : la localisation
 * voyage sous `city` (alias `location`), les statuts en majuscules (`ONLINE`),
 * les types de device sont insensibles à la casse.
 */

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ring_buffer::Timestamped;

/// Sentinelle de localisation de la machine hôte
pub const LOCAL_LOCATION: &str = "Local";

/// Localisation utilisée quand ni l'événement ni l'annuaire ne la connaissent
pub const UNKNOWN_LOCATION: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceType {
    Sensor,
    Actuator,
    Server,
    Gateway,
    /// Pseudo-type réservé à la machine hôte
    Local,
}

impl DeviceType {
    pub const ALL: [DeviceType; 5] = [
        DeviceType::Sensor,
        DeviceType::Actuator,
        DeviceType::Server,
        DeviceType::Gateway,
        DeviceType::Local,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Sensor => "Sensor",
            DeviceType::Actuator => "Actuator",
            DeviceType::Server => "Server",
            DeviceType::Gateway => "Gateway",
            DeviceType::Local => "Local",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device type: {0}")]
pub struct UnknownDeviceType(pub String);

impl FromStr for DeviceType {
    type Err = UnknownDeviceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownDeviceType(s.to_string()))
    }
}

impl Default for DeviceType {
    /// Le formulaire de création du dashboard propose "Sensor" par défaut
    fn default() -> Self {
        DeviceType::Sensor
    }
}

/// Le registre stocke le type en texte libre (nullable) : une valeur absente
/// ou inconnue retombe sur le type par défaut plutôt que de rejeter toute la liste.
fn lenient_device_type<'de, D>(deserializer: D) -> Result<DeviceType, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .and_then(|s| s.parse::<DeviceType>().ok())
        .unwrap_or_default())
}

fn location_or_unknown<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()))
}

fn unknown_location() -> String {
    UNKNOWN_LOCATION.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    #[serde(alias = "online", alias = "Online")]
    Online,
    #[default]
    #[serde(alias = "offline", alias = "Offline")]
    Offline,
    #[serde(alias = "error", alias = "Error")]
    Error,
    #[serde(alias = "maintenance", alias = "Maintenance")]
    Maintenance,
}

/// Enregistrement device tel que publié par le registre (jamais créé par le kernel)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_device_type")]
    pub device_type: DeviceType,
    #[serde(
        rename = "city",
        alias = "location",
        default = "unknown_location",
        deserialize_with = "location_or_unknown"
    )]
    pub location: String,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<String>,
}

impl Device {
    /// Type utilisé pour choisir les champs de télémétrie pertinents.
    /// La machine hôte est enregistrée comme "Server" mais localisée sur "Local".
    pub fn effective_type(&self) -> DeviceType {
        if self.location == LOCAL_LOCATION {
            DeviceType::Local
        } else {
            self.device_type
        }
    }
}

/// Valeur d'un attribut de télémétrie : numérique ou booléen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
}

impl AttributeValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            AttributeValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            AttributeValue::Number(_) => None,
        }
    }
}

/// Mesure immuable rattachée à un device.
/// `location` est dénormalisée à l'émission : l'historique reste lisible
/// même si le device est déplacé ou supprimé ensuite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub device_id: String,
    #[serde(rename = "city")]
    pub location: String,
    /// Secondes unix (fractionnaires acceptées)
    pub timestamp: f64,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl TelemetryEvent {
    pub fn new(device_id: impl Into<String>, location: impl Into<String>, timestamp: f64) -> Self {
        Self {
            device_id: device_id.into(),
            location: location.into(),
            timestamp,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<AttributeValue> {
        self.attributes.get(key).copied()
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.attribute(key).and_then(|v| v.as_f64())
    }
}

impl Timestamped for TelemetryEvent {
    fn unix_timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// Partition logique d'un ring buffer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", content = "key", rename_all = "snake_case")]
pub enum ScopeKey {
    Global,
    Device(String),
    Location(String),
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Global => f.write_str("global"),
            ScopeKey::Device(id) => write!(f, "device:{id}"),
            ScopeKey::Location(loc) => write!(f, "location:{loc}"),
        }
    }
}

/// Point horaire de prévision (24 prochaines heures)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyPoint {
    /// Heure locale au format "HH:MM"
    pub time: String,
    pub temperature: f64,
    pub humidity: f64,
}

/// Prévision journalière (semaine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: String,
    pub condition: String,
    pub max_temp: f64,
    pub min_temp: f64,
}

/// Résultat brut d'un appel au fournisseur météo
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Forecast {
    pub hourly: Vec<HourlyPoint>,
    pub weekly: Vec<DailyForecast>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_from_registry_json() {
        let json = serde_json::json!({
            "device_id": "3f2c",
            "name": "Host PC",
            "type": "SERVER",
            "city": "Local",
            "status": "ONLINE",
            "ip_address": "127.0.0.1",
            "mac_address": "00:00:00:00:00:00",
            "firmware_version": "v1.0",
            "latitude": "0",
            "longitude": "0",
            "created_at": "2025-01-01T00:00:00"
        });

        let device: Device = serde_json::from_value(json).unwrap();
        assert_eq!(device.device_type, DeviceType::Server);
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.location, "Local");
        assert_eq!(device.effective_type(), DeviceType::Local);
    }

    #[test]
    fn test_device_tolerates_missing_fields() {
        let json = serde_json::json!({
            "device_id": "d9",
            "name": "orphan",
            "type": null,
            "status": "MAINTENANCE"
        });

        let device: Device = serde_json::from_value(json).unwrap();
        assert_eq!(device.device_type, DeviceType::Sensor);
        assert_eq!(device.location, UNKNOWN_LOCATION);
        assert_eq!(device.status, DeviceStatus::Maintenance);
        assert!(device.ip_address.is_none());
    }

    #[test]
    fn test_device_type_parsing() {
        assert_eq!("gateway".parse::<DeviceType>().unwrap(), DeviceType::Gateway);
        assert_eq!(" Actuator ".parse::<DeviceType>().unwrap(), DeviceType::Actuator);
        assert!("Thermostat".parse::<DeviceType>().is_err());
    }

    #[test]
    fn test_telemetry_serializes_flat() {
        let event = TelemetryEvent::new("device_001", "Paris", 1_700_000_000.5)
            .with_attribute("temperature", AttributeValue::Number(21.5))
            .with_attribute("power", AttributeValue::Bool(true));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["device_id"], "device_001");
        assert_eq!(value["city"], "Paris");
        assert_eq!(value["temperature"], 21.5);
        assert_eq!(value["power"], true);
        assert_eq!(event.number("temperature"), Some(21.5));
        assert_eq!(event.number("power"), None);
    }

    #[test]
    fn test_scope_key_display() {
        assert_eq!(ScopeKey::Global.to_string(), "global");
        assert_eq!(ScopeKey::Device("d1".into()).to_string(), "device:d1");
        assert_eq!(ScopeKey::Location("Paris".into()).to_string(), "location:Paris");
    }
}
