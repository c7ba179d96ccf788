/**
 * SKYWATCH SIMULATOR - Producteur de télémétrie
 *
 * RÔLE :
 * Joue le rôle des producteurs externes : une flotte de capteurs par ville
 * (valeurs aléatoires) et le moniteur de la machine locale (mesures réelles).
 * Ne parle au kernel que via MQTT.
 *
 * FONCTIONNEMENT :
 * - Connexion au broker, boucle d'événements dans une tâche dédiée
 * - Une tâche par producteur selon SKYWATCH_SIM_MODE
 * - Arrêt propre sur Ctrl-C
 */

mod config;
mod local;
mod sensors;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use config::SimConfig;

pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = SimConfig::from_env()?;
    tracing::info!(
        "[simulator] broker {}:{} mode {:?}",
        cfg.mqtt_host,
        cfg.mqtt_port,
        cfg.mode
    );

    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    let mut opts = MqttOptions::new(format!("skywatch-simulator-{hostname}"), cfg.mqtt_host.clone(), cfg.mqtt_port);
    opts.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(opts, 64);

    // rumqttc ne publie que si l'eventloop est pollé ; il se reconnecte au poll suivant
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    tracing::info!("[simulator] connected to broker");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("[simulator] MQTT loop error: {e}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let mut tasks = Vec::new();
    if cfg.mode.sensors() {
        tasks.push(tokio::spawn(sensors::run(client.clone(), cfg.interval)));
    }
    if cfg.mode.local() {
        let host_id = local::resolve_host_id(cfg.host_device_id.clone(), &cfg.registry_url).await;
        tasks.push(tokio::spawn(local::run(client.clone(), host_id, cfg.local_interval)));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("[simulator] stopping");
    for task in tasks {
        task.abort();
    }
    if let Err(e) = client.disconnect().await {
        tracing::debug!("[simulator] disconnect: {e}");
    }
    Ok(())
}
