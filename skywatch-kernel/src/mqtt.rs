use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::task::{self, JoinHandle};

use crate::config::MqttConf;
use crate::dispatcher::{IngestSender, RawEvent};
use crate::health::HealthTracker;

/// Relaie les publications MQTT vers la file d'ingestion du dispatcher.
/// Les abonnements sont rejoués à chaque (re)connexion.
pub fn spawn_mqtt_listener(cfg: MqttConf, queue: IngestSender, health: HealthTracker) -> JoinHandle<()> {
    task::spawn(async move {
        let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    tracing::info!("[mqtt] connected to {}:{}", cfg.host, cfg.port);
                    for topic in &cfg.topics {
                        if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                            tracing::warn!("[mqtt] subscribe {topic} failed: {e:?}");
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    let raw = RawEvent::from_topic(&p.topic, p.payload.to_vec());
                    if queue.send(raw).await.is_err() {
                        tracing::info!("[mqtt] ingest queue closed, listener stopped");
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("[mqtt] erreur: {e:?}");
                    health.mark_mqtt_disconnected();
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}
