/**
 * FORECAST CACHE - Cache pull des prévisions par localisation
 *
 * RÔLE :
 * Évite de solliciter le fournisseur météo à chaque vue. Une entrée est fraîche
 * pendant le TTL, puis re-fetchée paresseusement à la demande suivante.
 *
 * FONCTIONNEMENT :
 * - Au plus UN fetch en vol par localisation : les appelants concurrents attendent
 *   le même futur partagé (futures::Shared sur une task tokio)
 * - Le fetch tourne hors de tout verrou ; seule l'installation du résultat est synchronisée
 * - Fetch borné par un timeout ; en cas d'échec : dernière entrée connue (Stale)
 *   ou Unavailable si rien en cache
 */

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::models::{DailyForecast, Forecast, HourlyPoint};
use crate::weather::{ForecastError, WeatherProvider};

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct ForecastCacheEntry {
    pub location: String,
    pub hourly: Vec<HourlyPoint>,
    pub weekly: Vec<DailyForecast>,
    #[serde(serialize_with = "rfc3339")]
    pub fetched_at: OffsetDateTime,
    /// Horloge monotone pour le TTL (l'horloge murale ne sert qu'à l'affichage)
    #[serde(skip)]
    fetched_instant: Instant,
}

impl ForecastCacheEntry {
    pub fn new(location: impl Into<String>, forecast: Forecast) -> Self {
        Self {
            location: location.into(),
            hourly: forecast.hourly,
            weekly: forecast.weekly,
            fetched_at: OffsetDateTime::now_utc(),
            fetched_instant: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.fetched_instant.elapsed()
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

fn rfc3339<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.format(&Rfc3339).unwrap_or_default())
}

/// Résultat d'une lecture du cache, sérialisé avec un champ `status`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForecastLookup {
    Fresh { forecast: Arc<ForecastCacheEntry> },
    Stale { forecast: Arc<ForecastCacheEntry>, reason: String },
    Unavailable { reason: String },
}

impl ForecastLookup {
    pub fn entry(&self) -> Option<&Arc<ForecastCacheEntry>> {
        match self {
            ForecastLookup::Fresh { forecast } | ForecastLookup::Stale { forecast, .. } => Some(forecast),
            ForecastLookup::Unavailable { .. } => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, ForecastLookup::Fresh { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ForecastLookup::Unavailable { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastStats {
    pub cached_locations: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub fetches: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

type FetchResult = Result<Arc<ForecastCacheEntry>, ForecastError>;
type InFlightFetch = Shared<BoxFuture<'static, FetchResult>>;

pub struct ForecastCache {
    provider: Arc<dyn WeatherProvider>,
    ttl: Duration,
    fetch_timeout: Duration,
    entries: Arc<Mutex<HashMap<String, Arc<ForecastCacheEntry>>>>,
    in_flight: Arc<Mutex<HashMap<String, InFlightFetch>>>,
    counters: Arc<Counters>,
}

impl ForecastCache {
    pub fn new(provider: Arc<dyn WeatherProvider>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            provider,
            ttl,
            fetch_timeout,
            entries: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, location: &str) -> ForecastLookup {
        if let Some(entry) = self.fresh_entry(location) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return ForecastLookup::Fresh { forecast: entry };
        }

        let fetch = self.join_or_start(location);
        match fetch.await {
            Ok(entry) => ForecastLookup::Fresh { forecast: entry },
            Err(e) => {
                let reason = e.to_string();
                match self.peek(location) {
                    Some(entry) => ForecastLookup::Stale { forecast: entry, reason },
                    None => ForecastLookup::Unavailable { reason },
                }
            }
        }
    }

    /// Dernière entrée connue, fraîche ou non, sans déclencher de fetch
    pub fn peek(&self, location: &str) -> Option<Arc<ForecastCacheEntry>> {
        self.entries.lock().get(location).cloned()
    }

    pub fn invalidate(&self, location: &str) -> bool {
        self.entries.lock().remove(location).is_some()
    }

    pub fn stats(&self) -> ForecastStats {
        ForecastStats {
            cached_locations: self.entries.lock().len(),
            in_flight: self.in_flight.lock().len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    fn fresh_entry(&self, location: &str) -> Option<Arc<ForecastCacheEntry>> {
        self.entries
            .lock()
            .get(location)
            .filter(|entry| entry.is_fresh(self.ttl))
            .cloned()
    }

    fn join_or_start(&self, location: &str) -> InFlightFetch {
        let mut in_flight = self.in_flight.lock();
        if let Some(fetch) = in_flight.get(location) {
            return fetch.clone();
        }
        // un fetch a pu s'installer entre la lecture de fraîcheur et ce verrou
        if let Some(entry) = self.fresh_entry(location) {
            return futures::future::ready(Ok(entry)).boxed().shared();
        }

        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("[forecast] fetching {location}");

        let provider = Arc::clone(&self.provider);
        let entries = Arc::clone(&self.entries);
        let pending = Arc::clone(&self.in_flight);
        let counters = Arc::clone(&self.counters);
        let timeout = self.fetch_timeout;
        let key = location.to_string();

        let task = tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, provider.fetch_forecast(&key)).await {
                Ok(Ok(forecast)) => Ok(Arc::new(ForecastCacheEntry::new(key.clone(), forecast))),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ForecastError::Timeout(timeout.as_secs())),
            };

            match &result {
                Ok(entry) => {
                    entries.lock().insert(key.clone(), Arc::clone(entry));
                }
                Err(e) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("[forecast] fetch failed for {key}: {e}");
                }
            }
            pending.lock().remove(&key);
            result
        });

        let shared = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(ForecastError::Unavailable(format!("fetch task aborted: {e}"))),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(location.to_string(), shared.clone());
        shared
    }
}
