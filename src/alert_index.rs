use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::model::Alert;

/// An Upsert/Remove event consumed from the sync bridge.
pub enum IndexEvent {
    Upsert(Alert),
    Remove { symbol: String, alert_id: Uuid },
}

/// In-memory `symbol -> [Alert]` index, read-mostly.
///
/// Each symbol's slice lives behind an `Arc`; readers clone the `Arc`
/// (a pointer swap, not a deep copy) while writers replace it under a
/// per-symbol write lock, so `alerts_for` never blocks on a concurrent
/// `apply`.
pub struct AlertIndex {
    by_symbol: RwLock<HashMap<String, Arc<Vec<Alert>>>>,
}

impl AlertIndex {
    pub fn new() -> Self {
        Self {
            by_symbol: RwLock::new(HashMap::new()),
        }
    }

    /// Only `active && userCreated` alerts are indexed; others are filtered
    /// on ingress.
    fn eligible(alert: &Alert) -> bool {
        alert.active && alert.user_created
    }

    pub fn alerts_for(&self, symbol: &str) -> Arc<Vec<Alert>> {
        self.by_symbol
            .read()
            .expect("alert index lock poisoned")
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    pub fn apply(&self, event: IndexEvent) {
        match event {
            IndexEvent::Upsert(alert) => self.upsert(alert),
            IndexEvent::Remove { symbol, alert_id } => self.remove(&symbol, alert_id),
        }
    }

    fn upsert(&self, alert: Alert) {
        let mut guard = self.by_symbol.write().expect("alert index lock poisoned");
        let current = guard.get(&alert.symbol).cloned().unwrap_or_default();
        let mut next: Vec<Alert> = current
            .iter()
            .filter(|a| a.alert_id != alert.alert_id)
            .cloned()
            .collect();

        if Self::eligible(&alert) {
            next.push(alert.clone());
        }

        guard.insert(alert.symbol.clone(), Arc::new(next));
    }

    fn remove(&self, symbol: &str, alert_id: Uuid) {
        let mut guard = self.by_symbol.write().expect("alert index lock poisoned");
        if let Some(current) = guard.get(symbol) {
            let next: Vec<Alert> = current
                .iter()
                .filter(|a| a.alert_id != alert_id)
                .cloned()
                .collect();
            guard.insert(symbol.to_string(), Arc::new(next));
        }
    }

    /// Rebuild the index from a full snapshot, as performed on cold start
    /// and on a SIGHUP-triggered resync.
    pub fn rebuild(&self, alerts: Vec<Alert>) {
        let mut by_symbol: HashMap<String, Vec<Alert>> = HashMap::new();
        for alert in alerts.into_iter().filter(Self::eligible) {
            by_symbol.entry(alert.symbol.clone()).or_default().push(alert);
        }
        let mut guard = self.by_symbol.write().expect("alert index lock poisoned");
        *guard = by_symbol
            .into_iter()
            .map(|(symbol, alerts)| (symbol, Arc::new(alerts)))
            .collect();
    }

    pub fn symbol_count(&self) -> usize {
        self.by_symbol.read().expect("alert index lock poisoned").len()
    }
}

impl Default for AlertIndex {
    fn default() -> Self {
        Self::new()
    }
}
