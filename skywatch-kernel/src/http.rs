/**
 * API HTTP SKYWATCH - Surface REST + SSE du kernel
 *
 * RÔLE :
 * Expose l'annuaire, les vues composées, les prévisions et le flux de
 * notifications aux observateurs (dashboard, scripts, monitoring).
 *
 * ROUTES :
 * - /health, /system/health
 * - /devices, /devices/{id}
 * - /views/device/{id}, /views/location/{location}?focus=, /views/type/{type}?location=, /views/global?limit=
 * - /forecast/{location} : toujours 200, le champ `status` dit fresh/stale/unavailable
 * - /telemetry?limit= : événements récents, le plus récent d'abord
 * - POST /ingest/{routing_key} : mise en file (202), 400 si l'événement est invalide
 * - /events?scope=all|device:<id>|location:<loc> : Server-Sent Events
 */

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;

use crate::bus::ScopeFilter;
use crate::dispatcher::{build_telemetry, IngestSender, IngressEvent, RawEvent};
use crate::forecast_cache::ForecastLookup;
use crate::health::{HealthTracker, KernelHealth};
use crate::kernel::Kernel;
use crate::models::{Device, DeviceType, TelemetryEvent};
use crate::query::{DeviceView, GlobalView, LocationView, TypeView, DEFAULT_GLOBAL_LIMIT};

#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<Kernel>,
    pub health: HealthTracker,
    pub ingest: IngestSender,
}

type ApiError = (StatusCode, String);

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FocusParams {
    focus: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TypeParams {
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsParams {
    scope: Option<String>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/devices", get(list_devices))
        .route("/devices/{id}", get(get_device))
        .route("/views/device/{id}", get(view_device))
        .route("/views/location/{location}", get(view_location))
        .route("/views/type/{device_type}", get(view_type))
        .route("/views/global", get(view_global))
        .route("/forecast/{location}", get(get_forecast))
        .route("/telemetry", get(recent_telemetry))
        .route("/ingest/{routing_key}", post(ingest))
        .route("/events", get(events))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(&app.kernel))
}

// GET /devices
async fn list_devices(State(app): State<AppState>) -> Json<Vec<Device>> {
    Json(app.kernel.directory.all())
}

// GET /devices/{id}
async fn get_device(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Device>, StatusCode> {
    app.kernel.directory.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn view_device(State(app): State<AppState>, Path(id): Path<String>) -> Json<DeviceView> {
    Json(app.kernel.query.view_by_device(&id).await)
}

async fn view_location(
    State(app): State<AppState>,
    Path(location): Path<String>,
    Query(params): Query<FocusParams>,
) -> Json<LocationView> {
    Json(app.kernel.query.view_by_location(&location, params.focus.as_deref()).await)
}

async fn view_type(
    State(app): State<AppState>,
    Path(device_type): Path<String>,
    Query(params): Query<TypeParams>,
) -> Result<Json<TypeView>, ApiError> {
    let device_type: DeviceType = device_type
        .parse()
        .map_err(|e: crate::models::UnknownDeviceType| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(app.kernel.query.view_by_type(device_type, params.location.as_deref())))
}

async fn view_global(State(app): State<AppState>, Query(params): Query<LimitParams>) -> Json<GlobalView> {
    Json(app.kernel.query.view_global(params.limit.unwrap_or(DEFAULT_GLOBAL_LIMIT)))
}

async fn get_forecast(State(app): State<AppState>, Path(location): Path<String>) -> Json<ForecastLookup> {
    Json(app.kernel.query.forecast(&location).await)
}

async fn recent_telemetry(
    State(app): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<Arc<TelemetryEvent>>> {
    Json(app.kernel.query.recent_telemetry(params.limit.unwrap_or(DEFAULT_GLOBAL_LIMIT)))
}

// POST /ingest/{routing_key} : validé ici pour répondre 400, appliqué par le dispatcher
async fn ingest(
    State(app): State<AppState>,
    Path(routing_key): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let event =
        IngressEvent::from_routing_key(&routing_key, &body).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    if let IngressEvent::Telemetry(fields) = &event {
        build_telemetry(fields, &app.kernel.directory).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    }

    match app.ingest.try_send(RawEvent::new(routing_key.clone(), body.to_vec())) {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "accepted": true, "routing_key": routing_key })),
        )),
        Err(TrySendError::Full(_)) => Err((StatusCode::TOO_MANY_REQUESTS, "ingest queue full".into())),
        Err(TrySendError::Closed(_)) => Err((StatusCode::SERVICE_UNAVAILABLE, "ingest stopped".into())),
    }
}

// GET /events?scope=...
async fn events(
    State(app): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let filter = ScopeFilter::parse(params.scope.as_deref().unwrap_or("all"))
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let subscription = app.kernel.subscribe(filter);

    let stream = subscription.into_stream().map(|notification| {
        let event = Event::default().event(notification.kind());
        Ok(match serde_json::to_string(&notification) {
            Ok(json) => event.data(json),
            Err(e) => event.comment(format!("unserializable notification: {e}")),
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
