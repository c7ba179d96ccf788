//! Capteurs simulés : un device par ville, température et humidité aléatoires.

use rand::Rng;
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use std::time::Duration;

pub const SENSORS_TOPIC: &str = "sensors/data";

pub const CITIES: [&str; 28] = [
    "Casablanca", "Rabat", "Marrakech", "Tanger", "Agadir", "Fes", "Meknes", "Oujda", "Tetouan", "Essaouira",
    "Paris", "London", "New York", "Tokyo", "Berlin", "Madrid", "Rome", "Beijing", "Sydney", "Moskow", "Dubai",
    "Singapore", "Toronto", "Mumbai", "Sao Paulo", "Cairo", "Istanbul", "Seoul",
];

#[derive(Debug, Clone, Serialize)]
pub struct SensorReading {
    pub device_id: String,
    pub city: &'static str,
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: f64,
}

/// device_001 -> première ville, device_002 -> deuxième, ...
pub fn fleet() -> Vec<(String, &'static str)> {
    CITIES
        .iter()
        .enumerate()
        .map(|(i, city)| (format!("device_{:03}", i + 1), *city))
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn reading<R: Rng>(rng: &mut R, device_id: &str, city: &'static str, timestamp: f64) -> SensorReading {
    SensorReading {
        device_id: device_id.to_string(),
        city,
        temperature: round2(rng.gen_range(5.0..=45.0)),
        humidity: round2(rng.gen_range(20.0..=90.0)),
        timestamp,
    }
}

pub async fn run(client: AsyncClient, every: Duration) {
    let fleet = fleet();
    tracing::info!("[sensors] simulating {} devices every {:?}", fleet.len(), every);

    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let timestamp = crate::unix_now();

        // ThreadRng n'est pas Send : les lectures sont construites avant tout await
        let batch: Vec<SensorReading> = {
            let mut rng = rand::thread_rng();
            fleet
                .iter()
                .map(|(id, city)| reading(&mut rng, id, *city, timestamp))
                .collect()
        };

        for sample in batch {
            let payload = match serde_json::to_vec(&sample) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!("[sensors] serialize {}: {e}", sample.device_id);
                    continue;
                }
            };
            if let Err(e) = client.publish(SENSORS_TOPIC, QoS::AtLeastOnce, false, payload).await {
                tracing::warn!("[sensors] publish failed for {}: {e}", sample.device_id);
            }
        }
        tracing::debug!("[sensors] batch published at {timestamp}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_ids() {
        let fleet = fleet();
        assert_eq!(fleet.len(), 28);
        assert_eq!(fleet[0], ("device_001".to_string(), "Casablanca"));
        assert_eq!(fleet[27], ("device_028".to_string(), "Seoul"));
    }

    #[test]
    fn test_reading_ranges_and_shape() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let r = reading(&mut rng, "device_011", "Paris", 1.5);
            assert!((5.0..=45.0).contains(&r.temperature));
            assert!((20.0..=90.0).contains(&r.humidity));
        }

        let json = serde_json::to_value(reading(&mut rng, "device_011", "Paris", 1.5)).unwrap();
        assert_eq!(json["city"], "Paris");
        assert_eq!(json["timestamp"], 1.5);
        assert!(json.get("location").is_none());
    }
}
