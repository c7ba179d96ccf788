/**
 * QUERY LAYER - Vues composées pour les observateurs
 *
 * RÔLE :
 * Assemble annuaire + historique + prévisions en vues prêtes à servir
 * (par device, par localisation, par type, globale). Aucun stockage propre.
 *
 * RÈGLES :
 * - Les erreurs ne remontent jamais : device absent = None, météo absente = Unavailable
 * - Série du graphique par localisation : télémétrie du device focus >
 *   télémétrie de la localisation > prévision horaire > vide
 */

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::directory::DeviceDirectory;
use crate::forecast_cache::{ForecastCache, ForecastLookup};
use crate::models::{AttributeValue, Device, DeviceType, HourlyPoint, TelemetryEvent};
use crate::ring_buffer::Snapshot;
use crate::telemetry_store::TelemetryStore;

pub const DEFAULT_GLOBAL_LIMIT: usize = 100;

/// Champs de télémétrie pertinents par type de device
pub fn fields_for(device_type: DeviceType) -> &'static [&'static str] {
    match device_type {
        DeviceType::Sensor => &["temperature", "humidity"],
        DeviceType::Actuator => &["power_usage", "status"],
        DeviceType::Server => &["connected_users", "active_processes"],
        DeviceType::Gateway => &["network_in", "network_out"],
        DeviceType::Local => &["cpu_usage", "ram_usage", "disk_usage"],
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    pub device_id: String,
    pub device: Option<Device>,
    pub history: Vec<Arc<TelemetryEvent>>,
    /// Localisation utilisée pour la prévision
    pub location: Option<String>,
    pub forecast: ForecastLookup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ChartSeries {
    DeviceTelemetry {
        device_id: String,
        points: Vec<Arc<TelemetryEvent>>,
    },
    LocationTelemetry {
        points: Vec<Arc<TelemetryEvent>>,
    },
    ForecastHourly {
        points: Vec<HourlyPoint>,
    },
    Empty,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationView {
    pub location: String,
    pub focus: Option<String>,
    pub devices: Vec<Device>,
    pub history: Vec<Arc<TelemetryEvent>>,
    pub forecast: ForecastLookup,
    pub chart: ChartSeries,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypedDevice {
    #[serde(flatten)]
    pub device: Device,
    /// Dernières valeurs connues, restreintes aux champs du type
    pub readings: BTreeMap<&'static str, AttributeValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeView {
    pub device_type: DeviceType,
    pub location: Option<String>,
    pub fields: &'static [&'static str],
    pub devices: Vec<TypedDevice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalView {
    pub devices: Vec<Device>,
    pub events: Vec<Arc<TelemetryEvent>>,
    pub buffered: usize,
}

/// Choix de la série du graphique, par ordre de priorité
pub fn select_chart(
    focus: Option<(&str, &Snapshot<TelemetryEvent>)>,
    location_history: &Snapshot<TelemetryEvent>,
    forecast: &ForecastLookup,
) -> ChartSeries {
    if let Some((device_id, history)) = focus {
        if !history.is_empty() {
            return ChartSeries::DeviceTelemetry {
                device_id: device_id.to_string(),
                points: history.to_vec(),
            };
        }
    }
    if !location_history.is_empty() {
        return ChartSeries::LocationTelemetry {
            points: location_history.to_vec(),
        };
    }
    match forecast.entry() {
        Some(entry) if !entry.hourly.is_empty() => ChartSeries::ForecastHourly {
            points: entry.hourly.clone(),
        },
        _ => ChartSeries::Empty,
    }
}

#[derive(Clone)]
pub struct QueryLayer {
    store: Arc<TelemetryStore>,
    directory: Arc<DeviceDirectory>,
    forecasts: Arc<ForecastCache>,
}

impl QueryLayer {
    pub fn new(store: Arc<TelemetryStore>, directory: Arc<DeviceDirectory>, forecasts: Arc<ForecastCache>) -> Self {
        Self {
            store,
            directory,
            forecasts,
        }
    }

    pub async fn view_by_device(&self, device_id: &str) -> DeviceView {
        let device = self.directory.get(device_id);
        let history = self.store.device_history(device_id);

        // hors annuaire : la dernière localisation émise par le device
        let location = device
            .as_ref()
            .map(|d| d.location.clone())
            .or_else(|| history.last().map(|e| e.location.clone()));

        let forecast = match &location {
            Some(loc) => self.forecasts.get(loc).await,
            None => ForecastLookup::Unavailable {
                reason: format!("no known location for device {device_id}"),
            },
        };

        DeviceView {
            device_id: device_id.to_string(),
            device,
            history: history.to_vec(),
            location,
            forecast,
        }
    }

    pub async fn view_by_location(&self, location: &str, focus: Option<&str>) -> LocationView {
        let devices = self.directory.by_location(location);
        let history = self.store.location_history(location);
        let forecast = self.forecasts.get(location).await;

        let focus_history = focus.map(|id| (id, self.store.device_history(id)));
        let chart = select_chart(
            focus_history.as_ref().map(|(id, h)| (*id, h)),
            &history,
            &forecast,
        );

        LocationView {
            location: location.to_string(),
            focus: focus.map(str::to_string),
            devices,
            history: history.to_vec(),
            forecast,
            chart,
        }
    }

    pub fn view_by_type(&self, device_type: DeviceType, location: Option<&str>) -> TypeView {
        let fields = fields_for(device_type);
        let devices = self
            .directory
            .all()
            .into_iter()
            .filter(|d| d.effective_type() == device_type)
            .filter(|d| location.map_or(true, |loc| d.location == loc))
            .map(|device| {
                let readings = self
                    .store
                    .latest_for_device(&device.device_id)
                    .map(|event| {
                        fields
                            .iter()
                            .filter_map(|&field| event.attribute(field).map(|v| (field, v)))
                            .collect()
                    })
                    .unwrap_or_default();
                TypedDevice { device, readings }
            })
            .collect();

        TypeView {
            device_type,
            location: location.map(str::to_string),
            fields,
            devices,
        }
    }

    pub fn view_global(&self, limit: usize) -> GlobalView {
        let history = self.store.global_history();
        GlobalView {
            devices: self.directory.all(),
            events: history.tail(limit),
            buffered: history.len(),
        }
    }

    /// Événements globaux, du plus récent au plus ancien
    pub fn recent_telemetry(&self, limit: usize) -> Vec<Arc<TelemetryEvent>> {
        let mut events = self.store.global_history().tail(limit);
        events.reverse();
        events
    }

    pub async fn forecast(&self, location: &str) -> ForecastLookup {
        self.forecasts.get(location).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast_cache::{ForecastCacheEntry, DEFAULT_FETCH_TIMEOUT, DEFAULT_TTL};
    use crate::models::{DeviceStatus, Forecast};
    use crate::ring_buffer::RingBuffer;
    use crate::weather::{ForecastError, WeatherProvider};
    use async_trait::async_trait;

    struct NoWeather;

    #[async_trait]
    impl WeatherProvider for NoWeather {
        async fn fetch_forecast(&self, location: &str) -> Result<Forecast, ForecastError> {
            Err(ForecastError::UnknownLocation(location.to_string()))
        }
    }

    fn device(id: &str, ty: DeviceType, location: &str) -> Device {
        Device {
            device_id: id.into(),
            name: id.into(),
            device_type: ty,
            location: location.into(),
            status: DeviceStatus::Online,
            ip_address: None,
            mac_address: None,
            firmware_version: None,
            latitude: None,
            longitude: None,
        }
    }

    fn history(points: &[(&str, f64)]) -> Snapshot<TelemetryEvent> {
        let mut buffer = RingBuffer::with_capacity(10);
        for (id, ts) in points {
            buffer.append(TelemetryEvent::new(*id, "Paris", *ts));
        }
        buffer.snapshot()
    }

    fn fresh_forecast(points: usize) -> ForecastLookup {
        let hourly = (0..points)
            .map(|h| HourlyPoint {
                time: format!("{h:02}:00"),
                temperature: 20.0,
                humidity: 40.0,
            })
            .collect();
        ForecastLookup::Fresh {
            forecast: Arc::new(ForecastCacheEntry::new("Paris", Forecast { hourly, weekly: Vec::new() })),
        }
    }

    fn layer() -> QueryLayer {
        QueryLayer::new(
            Arc::new(TelemetryStore::new(Default::default())),
            Arc::new(DeviceDirectory::new()),
            Arc::new(ForecastCache::new(Arc::new(NoWeather), DEFAULT_TTL, DEFAULT_FETCH_TIMEOUT)),
        )
    }

    #[test]
    fn test_fields_table() {
        assert_eq!(fields_for(DeviceType::Sensor), ["temperature", "humidity"]);
        assert_eq!(fields_for(DeviceType::Gateway), ["network_in", "network_out"]);
        assert_eq!(fields_for(DeviceType::Local).len(), 3);
    }

    #[test]
    fn test_chart_prefers_focused_device() {
        let focused = history(&[("d1", 1.0), ("d1", 2.0)]);
        let location = history(&[("d1", 1.0), ("d1", 2.0), ("d2", 3.0)]);

        let chart = select_chart(Some(("d1", &focused)), &location, &fresh_forecast(24));
        assert!(matches!(chart, ChartSeries::DeviceTelemetry { ref points, .. } if points.len() == 2));
    }

    #[test]
    fn test_chart_falls_back_to_location_then_forecast() {
        let empty = Snapshot::empty();
        let location = history(&[("d2", 3.0)]);

        let chart = select_chart(Some(("d1", &empty)), &location, &fresh_forecast(24));
        assert!(matches!(chart, ChartSeries::LocationTelemetry { .. }));

        let chart = select_chart(None, &empty, &fresh_forecast(24));
        assert!(matches!(chart, ChartSeries::ForecastHourly { ref points } if points.len() == 24));

        let unavailable = ForecastLookup::Unavailable { reason: "down".into() };
        assert!(matches!(select_chart(None, &empty, &unavailable), ChartSeries::Empty));
        assert!(matches!(select_chart(None, &empty, &fresh_forecast(0)), ChartSeries::Empty));
    }

    #[test]
    fn test_view_by_type_filters_both_predicates() {
        let query = layer();
        query.directory.replace_all(vec![
            device("s1", DeviceType::Sensor, "Paris"),
            device("s2", DeviceType::Sensor, "Rabat"),
            device("a1", DeviceType::Actuator, "Paris"),
            device("host", DeviceType::Server, "Local"),
        ]);
        query.store.append(
            TelemetryEvent::new("s1", "Paris", 1.0)
                .with_attribute("temperature", AttributeValue::Number(22.0))
                .with_attribute("cpu_usage", AttributeValue::Number(99.0)),
        );

        let view = query.view_by_type(DeviceType::Sensor, Some("Paris"));
        assert_eq!(view.devices.len(), 1);
        assert_eq!(view.devices[0].device.device_id, "s1");
        assert_eq!(view.devices[0].readings.get("temperature"), Some(&AttributeValue::Number(22.0)));
        assert!(view.devices[0].readings.get("cpu_usage").is_none());

        assert_eq!(query.view_by_type(DeviceType::Sensor, None).devices.len(), 2);
        assert_eq!(query.view_by_type(DeviceType::Local, None).devices.len(), 1);
        assert!(query.view_by_type(DeviceType::Server, None).devices.is_empty());
    }

    #[test]
    fn test_global_view_and_recent() {
        let query = layer();
        for ts in 0..5 {
            query.store.append(TelemetryEvent::new("d1", "Paris", ts as f64));
        }

        let view = query.view_global(2);
        assert_eq!(view.buffered, 5);
        let stamps: Vec<f64> = view.events.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![3.0, 4.0]);

        let recent: Vec<f64> = query.recent_telemetry(3).iter().map(|e| e.timestamp).collect();
        assert_eq!(recent, vec![4.0, 3.0, 2.0]);
    }

    #[tokio::test]
    async fn test_unknown_device_uses_last_telemetry_location() {
        let query = layer();
        query.store.append(TelemetryEvent::new("ghost", "Oslo", 1.0));

        let view = query.view_by_device("ghost").await;
        assert!(view.device.is_none());
        assert_eq!(view.location.as_deref(), Some("Oslo"));
        assert_eq!(view.history.len(), 1);
        assert!(view.forecast.is_unavailable());

        let nobody = query.view_by_device("nobody").await;
        assert!(nobody.location.is_none());
        assert!(nobody.history.is_empty());
    }
}
