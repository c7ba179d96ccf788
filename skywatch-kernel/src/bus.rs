/**
 * EVENT BUS - Publication/abonnement des notifications de changement
 *
 * RÔLE :
 * Prévient les observateurs (SSE, tests, consommateurs in-process) qu'un scope
 * a changé. Les notifications ne portent pas de données : l'observateur relit
 * la vue qui l'intéresse.
 *
 * FONCTIONNEMENT :
 * - Instance dédiée (tokio::sync::broadcast), jamais de bus global
 * - Chaque Subscription filtre par scope ; la lâcher suffit à se désabonner
 * - Un abonné trop lent perd les plus anciennes notifications (log warn) sans bloquer l'écrivain
 */

use futures::Stream;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use uuid::Uuid;

use crate::models::ScopeKey;

pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeNotification {
    TelemetryAppended { scope: ScopeKey },
    DirectoryChanged,
    DeviceRemoved { device_id: String },
}

impl ChangeNotification {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeNotification::TelemetryAppended { .. } => "telemetry_appended",
            ChangeNotification::DirectoryChanged => "directory_changed",
            ChangeNotification::DeviceRemoved { .. } => "device_removed",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid scope filter '{0}' (expected all, device:<id> or location:<name>)")]
pub struct ScopeFilterError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    All,
    Device(String),
    Location(String),
}

impl ScopeFilter {
    pub fn matches(&self, notification: &ChangeNotification) -> bool {
        match (self, notification) {
            (ScopeFilter::All, _) => true,
            (_, ChangeNotification::DirectoryChanged) => true,
            (ScopeFilter::Device(id), ChangeNotification::TelemetryAppended { scope: ScopeKey::Device(d) }) => id == d,
            (ScopeFilter::Device(id), ChangeNotification::DeviceRemoved { device_id }) => id == device_id,
            (ScopeFilter::Location(loc), ChangeNotification::TelemetryAppended { scope: ScopeKey::Location(l) }) => {
                loc == l
            }
            // le device retiré était peut-être affiché sur cette localisation
            (ScopeFilter::Location(_), ChangeNotification::DeviceRemoved { .. }) => true,
            (_, ChangeNotification::TelemetryAppended { .. }) => false,
        }
    }

    /// "all" (ou vide), "device:<id>", "location:<nom>"
    pub fn parse(raw: &str) -> Result<Self, ScopeFilterError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
            return Ok(ScopeFilter::All);
        }
        match raw.split_once(':') {
            Some(("device", id)) if !id.is_empty() => Ok(ScopeFilter::Device(id.to_string())),
            Some(("location", loc)) if !loc.is_empty() => Ok(ScopeFilter::Location(loc.to_string())),
            _ => Err(ScopeFilterError(raw.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChangeNotification>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Retourne le nombre d'abonnés atteints (0 si personne n'écoute)
    pub fn publish(&self, notification: ChangeNotification) -> usize {
        self.sender.send(notification).unwrap_or(0)
    }

    pub fn subscribe(&self, filter: ScopeFilter) -> Subscription {
        let id = Uuid::new_v4();
        tracing::debug!("[bus] subscription {id} opened ({filter:?})");
        Subscription {
            id,
            filter,
            receiver: self.sender.subscribe(),
            lagged: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct Subscription {
    id: Uuid,
    filter: ScopeFilter,
    receiver: broadcast::Receiver<ChangeNotification>,
    lagged: u64,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn filter(&self) -> &ScopeFilter {
        &self.filter
    }

    /// Notifications perdues parce que l'abonné lisait trop lentement
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    /// Prochaine notification correspondant au filtre ; None quand le bus est fermé
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) if self.filter.matches(&notification) => return Some(notification),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    self.lagged += skipped;
                    tracing::warn!("[bus] subscription {} lagged, {skipped} notifications dropped", self.id);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Variante non bloquante : None si rien de pertinent n'est en attente
    pub fn try_recv(&mut self) -> Option<ChangeNotification> {
        loop {
            match self.receiver.try_recv() {
                Ok(notification) if self.filter.matches(&notification) => return Some(notification),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    self.lagged += skipped;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ChangeNotification> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|notification| (notification, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        tracing::debug!("[bus] subscription {} closed", self.id);
    }
}
