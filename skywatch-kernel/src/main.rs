/**
 * SKYWATCH KERNEL - Point d'entrée du serveur
 *
 * RÔLE : Bootstrap : config, registre, fournisseur météo, kernel, boucle
 * d'ingestion, listener MQTT, maintenance et API HTTP/SSE.
 */

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use skywatch_kernel::config::load_config;
use skywatch_kernel::dispatcher::ingest_channel;
use skywatch_kernel::health::HealthTracker;
use skywatch_kernel::http::{build_router, AppState};
use skywatch_kernel::mqtt::spawn_mqtt_listener;
use skywatch_kernel::registry::HttpDeviceRegistry;
use skywatch_kernel::weather::OpenMeteoProvider;
use skywatch_kernel::Kernel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    let registry = HttpDeviceRegistry::new(&cfg.registry.url, Duration::from_secs(cfg.registry.timeout_seconds))
        .context("building registry client")?;
    let weather = OpenMeteoProvider::new(cfg.open_meteo()).context("building weather client")?;

    let kernel = Arc::new(
        Kernel::builder(Arc::new(registry), Arc::new(weather))
            .with_retention(cfg.retention())
            .with_forecast_ttl(cfg.forecast_ttl())
            .with_fetch_timeout(cfg.fetch_timeout())
            .build(),
    );

    // premier remplissage de l'annuaire ; un registre absent n'empêche pas le démarrage
    let outcome = kernel.dispatcher.refresh_directory().await;
    tracing::info!("[kernel] initial directory sync: {outcome:?}");

    let health = HealthTracker::new();
    let (ingest, queue) = ingest_channel(cfg.ingest.queue_capacity);

    kernel.spawn_dispatcher(queue);
    kernel.spawn_maintenance(Duration::from_secs(cfg.buffers.sweep_interval_seconds.max(1)));
    health.spawn_health_reporter(Arc::clone(&kernel), Duration::from_secs(60));
    spawn_mqtt_listener(cfg.mqtt.clone(), ingest.clone(), health.clone());

    let app = build_router(AppState {
        kernel,
        health,
        ingest,
    });

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("binding {}", cfg.http.bind))?;
    tracing::info!("[kernel] listening on http://{}", cfg.http.bind);
    axum::serve(listener, app).await.context("http server stopped")?;
    Ok(())
}
