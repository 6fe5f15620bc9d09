use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::alert_index::{AlertIndex, IndexEvent};
use crate::sharedbus::AlertUpdateEvent;
use crate::storage::Storage;

/// Converts `alert-updates` events into `AlertIndex` mutations and owns the
/// cold-start / SIGHUP-triggered full resync.
pub struct SyncBridge {
    storage: Arc<dyn Storage>,
    alert_index: Arc<AlertIndex>,
}

impl SyncBridge {
    pub fn new(storage: Arc<dyn Storage>, alert_index: Arc<AlertIndex>) -> Self {
        Self { storage, alert_index }
    }

    /// Full resync from durable storage. On failure the previous index is
    /// left untouched, keeping the last good snapshot rather than going
    /// empty.
    pub async fn resync(&self) -> bool {
        match self.storage.list_active_alerts().await {
            Ok(alerts) => {
                let count = alerts.len();
                self.alert_index.rebuild(alerts);
                info!(alert_count = count, "alert index resynced from storage");
                true
            }
            Err(err) => {
                error!(error = ?err, "alert index resync failed, keeping previous index");
                false
            }
        }
    }

    /// Drain `alert-updates` events, applying each as an incremental
    /// `IndexEvent` until the channel closes.
    pub async fn run(&self, mut rx: mpsc::Receiver<AlertUpdateEvent>) {
        while let Some(event) = rx.recv().await {
            self.apply(event);
        }
        warn!("alert-updates channel closed, sync bridge stopping");
    }

    fn apply(&self, event: AlertUpdateEvent) {
        match event {
            AlertUpdateEvent::Upsert { alert, .. } => {
                self.alert_index.apply(IndexEvent::Upsert(alert));
            }
            AlertUpdateEvent::Remove { symbol, alert_id } => {
                self.alert_index.apply(IndexEvent::Remove { symbol, alert_id });
            }
        }
    }
}
