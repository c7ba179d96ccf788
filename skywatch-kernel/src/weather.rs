/**
 * WEATHER PROVIDER - Récupération des prévisions par localisation
 *
 * RÔLE :
 * Frontière vers le fournisseur météo externe. Appelé uniquement par le
 * ForecastCache, jamais directement par les vues.
 *
 * FONCTIONNEMENT (Open-Meteo) :
 * - Résolution localisation -> coordonnées : table de config, puis API de géocodage,
 *   puis coordonnées de repli optionnelles
 * - /v1/forecast : hourly température + humidité, daily max/min + weathercode
 * - 24 premiers points horaires formatés "HH:MM", codes WMO traduits en libellés
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use time::macros::format_description;
use time::PrimitiveDateTime;

use crate::models::{DailyForecast, Forecast, HourlyPoint};

pub const DEFAULT_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";

const HOURLY_POINTS: usize = 24;

/// Erreurs de fetch. Clone : le résultat d'un fetch est partagé entre tous les appelants.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ForecastError {
    #[error("forecast unavailable: {0}")]
    Unavailable(String),
    #[error("forecast fetch timed out after {0}s")]
    Timeout(u64),
    #[error("weather http error: {0}")]
    Http(String),
    #[error("weather payload invalid: {0}")]
    Decode(String),
    #[error("no coordinates for location {0}")]
    UnknownLocation(String),
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn fetch_forecast(&self, location: &str) -> Result<Forecast, ForecastError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone)]
pub struct OpenMeteoConfig {
    pub base_url: String,
    /// None désactive le géocodage
    pub geocoding_url: Option<String>,
    pub coordinates: HashMap<String, Coordinates>,
    pub fallback: Option<Coordinates>,
    pub timeout: Duration,
}

impl Default for OpenMeteoConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_FORECAST_URL.to_string(),
            geocoding_url: Some(DEFAULT_GEOCODING_URL.to_string()),
            coordinates: HashMap::new(),
            fallback: None,
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct OpenMeteoProvider {
    config: OpenMeteoConfig,
    client: reqwest::Client,
    geocoded: Mutex<HashMap<String, Coordinates>>,
}

impl OpenMeteoProvider {
    pub fn new(config: OpenMeteoConfig) -> Result<Self, ForecastError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("skywatch-kernel")
            .build()
            .map_err(|e| ForecastError::Http(e.to_string()))?;
        Ok(Self {
            config,
            client,
            geocoded: Mutex::new(HashMap::new()),
        })
    }

    async fn resolve(&self, location: &str) -> Result<Coordinates, ForecastError> {
        if let Some(coords) = self.config.coordinates.get(location) {
            return Ok(*coords);
        }
        if let Some(coords) = self.geocoded.lock().get(location) {
            return Ok(*coords);
        }

        if let Some(url) = &self.config.geocoding_url {
            match self.geocode(url, location).await {
                Ok(Some(coords)) => {
                    self.geocoded.lock().insert(location.to_string(), coords);
                    return Ok(coords);
                }
                Ok(None) => tracing::debug!("[weather] geocoding has no match for {location}"),
                Err(e) => tracing::warn!("[weather] geocoding failed for {location}: {e}"),
            }
        }

        self.config
            .fallback
            .ok_or_else(|| ForecastError::UnknownLocation(location.to_string()))
    }

    async fn geocode(&self, url: &str, location: &str) -> Result<Option<Coordinates>, ForecastError> {
        let response = self
            .client
            .get(url)
            .query(&[("name", location), ("count", "1")])
            .send()
            .await
            .map_err(|e| self.http_error(e))?;
        if !response.status().is_success() {
            return Err(ForecastError::Http(format!("geocoding answered {}", response.status())));
        }
        let body: GeocodingResponse = response.json().await.map_err(|e| ForecastError::Decode(e.to_string()))?;
        Ok(body
            .results
            .into_iter()
            .next()
            .map(|hit| Coordinates { lat: hit.latitude, lon: hit.longitude }))
    }

    pub fn forecast_request(&self, coords: Coordinates) -> Result<reqwest::Request, ForecastError> {
        self.client
            .get(&self.config.base_url)
            .query(&[
                ("latitude", coords.lat.to_string()),
                ("longitude", coords.lon.to_string()),
                ("daily", "temperature_2m_max,temperature_2m_min,weathercode".to_string()),
                ("hourly", "temperature_2m,relative_humidity_2m".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .build()
            .map_err(|e| ForecastError::Http(e.to_string()))
    }

    fn http_error(&self, e: reqwest::Error) -> ForecastError {
        if e.is_timeout() {
            ForecastError::Timeout(self.config.timeout.as_secs())
        } else {
            ForecastError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    async fn fetch_forecast(&self, location: &str) -> Result<Forecast, ForecastError> {
        let coords = self.resolve(location).await?;
        let request = self.forecast_request(coords)?;
        let response = self.client.execute(request).await.map_err(|e| self.http_error(e))?;
        if !response.status().is_success() {
            return Err(ForecastError::Http(format!("forecast answered {}", response.status())));
        }
        let body: OpenMeteoResponse = response.json().await.map_err(|e| ForecastError::Decode(e.to_string()))?;
        map_response(body)
    }
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingHit>,
}

#[derive(Debug, Deserialize)]
struct GeocodingHit {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenMeteoResponse {
    #[serde(default)]
    daily: DailyBlock,
    #[serde(default)]
    hourly: HourlyBlock,
}

#[derive(Debug, Default, Deserialize)]
struct DailyBlock {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    weathercode: Vec<Option<i64>>,
}

#[derive(Debug, Default, Deserialize)]
struct HourlyBlock {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m: Vec<Option<f64>>,
}

fn value_at<T: Copy>(values: &[Option<T>], i: usize) -> Option<T> {
    values.get(i).copied().flatten()
}

/// Convertit la réponse Open-Meteo. Sans jours de prévision, la réponse est inexploitable.
pub fn map_response(body: OpenMeteoResponse) -> Result<Forecast, ForecastError> {
    let daily = body.daily;
    if daily.time.is_empty() {
        return Err(ForecastError::Unavailable("External API connection failed".to_string()));
    }

    let weekly = daily
        .time
        .iter()
        .enumerate()
        .filter_map(|(i, date)| {
            Some(DailyForecast {
                date: date.clone(),
                condition: wmo_condition(value_at(&daily.weathercode, i)?).to_string(),
                max_temp: value_at(&daily.temperature_2m_max, i)?,
                min_temp: value_at(&daily.temperature_2m_min, i)?,
            })
        })
        .collect();

    let hourly_block = body.hourly;
    let mut hourly = Vec::with_capacity(HOURLY_POINTS);
    for (i, raw_time) in hourly_block.time.iter().take(HOURLY_POINTS).enumerate() {
        let (Some(temperature), Some(humidity)) = (
            value_at(&hourly_block.temperature_2m, i),
            value_at(&hourly_block.relative_humidity_2m, i),
        ) else {
            continue;
        };
        hourly.push(HourlyPoint {
            time: hour_minute(raw_time)?,
            temperature,
            humidity,
        });
    }

    Ok(Forecast { hourly, weekly })
}

/// "2025-01-01T14:00" -> "14:00"
fn hour_minute(raw: &str) -> Result<String, ForecastError> {
    let parsed = PrimitiveDateTime::parse(raw, format_description!("[year]-[month]-[day]T[hour]:[minute]"))
        .or_else(|_| {
            PrimitiveDateTime::parse(raw, format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"))
        })
        .map_err(|e| ForecastError::Decode(format!("hourly time {raw}: {e}")))?;
    parsed
        .format(format_description!("[hour]:[minute]"))
        .map_err(|e| ForecastError::Decode(e.to_string()))
}

/// Codes météo WMO (WW)
pub fn wmo_condition(code: i64) -> &'static str {
    match code {
        0 => "Clear sky",
        1..=3 => "Partly cloudy",
        45 | 48 => "Fog",
        51 | 53 | 55 => "Drizzle",
        61 | 63 | 65 => "Rain",
        71 | 73 | 75 => "Snow",
        95 | 96 | 99 => "Thunderstorm",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> OpenMeteoResponse {
        let hourly_times: Vec<String> = (0..48).map(|h| format!("2025-06-0{}T{:02}:00", 1 + h / 24, h % 24)).collect();
        let temperatures = vec![18.5; 48];
        let humidities = vec![60.0; 48];
        let json = serde_json::json!({
            "daily": {
                "time": ["2025-06-01", "2025-06-02"],
                "temperature_2m_max": [24.1, 26.3],
                "temperature_2m_min": [14.0, 15.2],
                "weathercode": [0, 61]
            },
            "hourly": {
                "time": hourly_times,
                "temperature_2m": temperatures,
                "relative_humidity_2m": humidities
            }
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_map_response() {
        let forecast = map_response(fixture()).unwrap();

        assert_eq!(forecast.weekly.len(), 2);
        assert_eq!(forecast.weekly[0].condition, "Clear sky");
        assert_eq!(forecast.weekly[1].condition, "Rain");
        assert_eq!(forecast.weekly[1].max_temp, 26.3);

        assert_eq!(forecast.hourly.len(), 24);
        assert_eq!(forecast.hourly[0].time, "00:00");
        assert_eq!(forecast.hourly[14].time, "14:00");
        assert_eq!(forecast.hourly[23].humidity, 60.0);
    }

    #[test]
    fn test_empty_daily_is_unavailable() {
        let body: OpenMeteoResponse = serde_json::from_value(serde_json::json!({"error": true})).unwrap();
        assert_eq!(
            map_response(body),
            Err(ForecastError::Unavailable("External API connection failed".into()))
        );
    }

    #[test]
    fn test_null_values_are_skipped() {
        let json = serde_json::json!({
            "daily": {
                "time": ["2025-06-01", "2025-06-02"],
                "temperature_2m_max": [null, 20.0],
                "temperature_2m_min": [10.0, 11.0],
                "weathercode": [3, 45]
            },
            "hourly": {
                "time": ["2025-06-01T00:00", "2025-06-01T01:00"],
                "temperature_2m": [12.0, null],
                "relative_humidity_2m": [80.0, 81.0]
            }
        });
        let forecast = map_response(serde_json::from_value(json).unwrap()).unwrap();
        assert_eq!(forecast.weekly.len(), 1);
        assert_eq!(forecast.weekly[0].condition, "Fog");
        assert_eq!(forecast.hourly.len(), 1);
    }

    #[test]
    fn test_hour_minute_accepts_seconds() {
        assert_eq!(hour_minute("2025-06-01T07:30:00").unwrap(), "07:30");
        assert!(hour_minute("yesterday").is_err());
    }

    #[test]
    fn test_wmo_condition() {
        assert_eq!(wmo_condition(2), "Partly cloudy");
        assert_eq!(wmo_condition(53), "Drizzle");
        assert_eq!(wmo_condition(73), "Snow");
        assert_eq!(wmo_condition(96), "Thunderstorm");
        assert_eq!(wmo_condition(80), "Unknown");
    }

    #[test]
    fn test_forecast_request_params() {
        let provider = OpenMeteoProvider::new(OpenMeteoConfig::default()).unwrap();
        let request = provider.forecast_request(Coordinates { lat: 48.8566, lon: 2.3522 }).unwrap();
        let url = request.url().as_str();

        assert!(url.starts_with(DEFAULT_FORECAST_URL));
        assert!(url.contains("latitude=48.8566"));
        assert!(url.contains("longitude=2.3522"));
        assert!(url.contains("timezone=auto"));
        assert!(url.contains("weathercode"));
    }

    #[tokio::test]
    async fn test_resolve_prefers_config_table_then_fallback() {
        let mut config = OpenMeteoConfig {
            geocoding_url: None,
            ..OpenMeteoConfig::default()
        };
        config
            .coordinates
            .insert("Paris".into(), Coordinates { lat: 48.8566, lon: 2.3522 });
        let provider = OpenMeteoProvider::new(config.clone()).unwrap();

        assert_eq!(provider.resolve("Paris").await.unwrap().lat, 48.8566);
        assert_eq!(
            provider.resolve("Atlantis").await,
            Err(ForecastError::UnknownLocation("Atlantis".into()))
        );

        config.fallback = Some(Coordinates { lat: 33.5898, lon: -7.6038 });
        let provider = OpenMeteoProvider::new(config).unwrap();
        assert_eq!(provider.resolve("Atlantis").await.unwrap().lon, -7.6038);
    }
}
