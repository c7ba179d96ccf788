/*!
Mock du fournisseur météo

Remplace Open-Meteo dans les tests : réponses configurables par localisation,
pannes ciblées ou globales, latence simulée et comptage des appels (pour
vérifier le dédoublonnage des fetchs).
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use skywatch_kernel::models::Forecast;
use skywatch_kernel::weather::{ForecastError, WeatherProvider};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::builders::MessageBuilder;

pub struct MockWeatherProvider {
    calls: AtomicUsize,
    calls_by_location: Mutex<HashMap<String, usize>>,
    forecasts: Mutex<HashMap<String, Forecast>>,
    default_forecast: Forecast,
    failing: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    delay: Duration,
}

impl MockWeatherProvider {
    /// Répond 24 points horaires pour n'importe quelle localisation
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            calls_by_location: Mutex::new(HashMap::new()),
            forecasts: Mutex::new(HashMap::new()),
            default_forecast: MessageBuilder::sample_forecast(24),
            failing: Mutex::new(HashSet::new()),
            fail_all: AtomicBool::new(false),
            delay: Duration::ZERO,
        }
    }

    /// Latence simulée avant chaque réponse (utile avec l'horloge tokio en pause)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_forecast(self, location: &str, forecast: Forecast) -> Self {
        self.forecasts.lock().insert(location.to_string(), forecast);
        self
    }

    pub fn fail_location(&self, location: &str) {
        self.failing.lock().insert(location.to_string());
    }

    pub fn recover_location(&self, location: &str) {
        self.failing.lock().remove(location);
    }

    pub fn set_fail_all(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, location: &str) -> usize {
        self.calls_by_location.lock().get(location).copied().unwrap_or(0)
    }
}

impl Default for MockWeatherProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WeatherProvider for MockWeatherProvider {
    async fn fetch_forecast(&self, location: &str) -> Result<Forecast, ForecastError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.calls_by_location.lock().entry(location.to_string()).or_insert(0) += 1;
        tracing::debug!("[mock-weather] fetch {location}");

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.fail_all.load(Ordering::SeqCst) || self.failing.lock().contains(location) {
            return Err(ForecastError::Http(format!("mock provider down for {location}")));
        }

        let forecast = self.forecasts.lock().get(location).cloned();
        Ok(forecast.unwrap_or_else(|| self.default_forecast.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_and_failures() {
        let provider = MockWeatherProvider::new().with_forecast("Paris", MessageBuilder::sample_forecast(3));

        assert_eq!(provider.fetch_forecast("Paris").await.unwrap().hourly.len(), 3);
        assert_eq!(provider.fetch_forecast("Rabat").await.unwrap().hourly.len(), 24);

        provider.fail_location("Rabat");
        assert!(provider.fetch_forecast("Rabat").await.is_err());
        provider.recover_location("Rabat");
        assert!(provider.fetch_forecast("Rabat").await.is_ok());

        assert_eq!(provider.calls(), 4);
        assert_eq!(provider.calls_for("Rabat"), 3);
    }
}
