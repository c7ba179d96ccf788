/*!
Builders de messages et de fixtures

Produit les payloads JSON exactement comme les producteurs réels
(simulateur de capteurs par ville, moniteur de la machine locale, service
de gestion des devices) ainsi que des Device et Forecast de test.
*/

use chrono::Utc;
use serde_json::{json, Value};
use skywatch_kernel::models::{DailyForecast, Device, DeviceStatus, DeviceType, Forecast, HourlyPoint, LOCAL_LOCATION};

pub struct MessageBuilder;

impl MessageBuilder {
    /// Horodatage unix courant (secondes fractionnaires)
    pub fn now_ts() -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0
    }

    /// Message du simulateur (topic sensors/data)
    pub fn sensor_reading(device_id: &str, city: &str, temperature: f64, humidity: f64, timestamp: f64) -> Value {
        json!({
            "device_id": device_id,
            "city": city,
            "temperature": temperature,
            "humidity": humidity,
            "timestamp": timestamp
        })
    }

    /// Message du moniteur local (routing key ...telemetry.<host_id>)
    pub fn local_metrics(host_id: &str, cpu: f64, ram: f64, disk: f64, timestamp: f64) -> Value {
        json!({
            "device_id": host_id,
            "city": LOCAL_LOCATION,
            "cpu_usage": cpu,
            "ram_usage": ram,
            "disk_usage": disk,
            "temperature": 0,
            "humidity": 0,
            "timestamp": timestamp
        })
    }

    /// Corps des notifications device.created / updated / deleted
    pub fn device_event(device_id: &str) -> Value {
        json!({ "device_id": device_id })
    }

    pub fn device(device_id: &str, device_type: DeviceType, location: &str) -> Device {
        Device {
            device_id: device_id.to_string(),
            name: format!("{device_type} {device_id}"),
            device_type,
            location: location.to_string(),
            status: DeviceStatus::Online,
            ip_address: Some("127.0.0.1".into()),
            mac_address: None,
            firmware_version: Some("v1.0".into()),
            latitude: None,
            longitude: None,
        }
    }

    pub fn sample_forecast(hours: usize) -> Forecast {
        let hourly = (0..hours)
            .map(|h| HourlyPoint {
                time: format!("{:02}:00", h % 24),
                temperature: 15.0 + (h % 12) as f64,
                humidity: 55.0,
            })
            .collect();
        let weekly = (1..=7)
            .map(|d| DailyForecast {
                date: format!("2025-06-{d:02}"),
                condition: "Clear sky".into(),
                max_temp: 25.0,
                min_temp: 14.0,
            })
            .collect();
        Forecast { hourly, weekly }
    }
}
