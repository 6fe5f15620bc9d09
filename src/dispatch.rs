use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::model::TriggeredAlert;
use crate::notifier::Notifier;
use crate::stats::Stats;
use crate::storage::Storage;

/// A WS session's symbol filter.
#[derive(Debug, Clone)]
pub enum SubscriptionSet {
    All,
    Symbols(HashSet<String>),
}

impl SubscriptionSet {
    fn matches(&self, symbol: &str) -> bool {
        match self {
            Self::All => true,
            Self::Symbols(symbols) => symbols.contains(symbol),
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    #[allow(dead_code)]
    user_id: Option<Uuid>,
    subscribed: SubscriptionSet,
}

/// Tracks each connected WS session's subscription filter so the frontend
/// server task can decide what to forward without re-broadcasting per
/// symbol.
pub struct SessionRegistry {
    sessions: RwLock<std::collections::HashMap<Uuid, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn register(&self, session_id: Uuid, user_id: Option<Uuid>) {
        self.sessions.write().expect("session registry lock poisoned").insert(
            session_id,
            Session {
                user_id,
                subscribed: SubscriptionSet::Symbols(HashSet::new()),
            },
        );
    }

    pub fn unregister(&self, session_id: Uuid) {
        self.sessions
            .write()
            .expect("session registry lock poisoned")
            .remove(&session_id);
    }

    pub fn subscribe_symbol(&self, session_id: Uuid, symbol: &str) {
        let mut guard = self.sessions.write().expect("session registry lock poisoned");
        if let Some(session) = guard.get_mut(&session_id) {
            if let SubscriptionSet::Symbols(symbols) = &mut session.subscribed {
                symbols.insert(symbol.to_string());
            }
        }
    }

    pub fn unsubscribe_symbol(&self, session_id: Uuid, symbol: &str) {
        let mut guard = self.sessions.write().expect("session registry lock poisoned");
        if let Some(session) = guard.get_mut(&session_id) {
            if let SubscriptionSet::Symbols(symbols) = &mut session.subscribed {
                symbols.remove(symbol);
            }
        }
    }

    pub fn subscribe_all(&self, session_id: Uuid) {
        let mut guard = self.sessions.write().expect("session registry lock poisoned");
        if let Some(session) = guard.get_mut(&session_id) {
            session.subscribed = SubscriptionSet::All;
        }
    }

    /// Whether `session_id` should receive an event for `symbol`: either
    /// the session subscribed to everything, or it subscribed to this
    /// specific symbol.
    pub fn should_deliver(&self, session_id: Uuid, symbol: &str) -> bool {
        self.sessions
            .read()
            .expect("session registry lock poisoned")
            .get(&session_id)
            .map(|session| session.subscribed.matches(symbol))
            .unwrap_or(false)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().expect("session registry lock poisoned").len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Notification fan-out: consumes the `alerts` broadcast topic and delivers
/// each `TriggeredAlert` to every configured `Notifier` adapter.
pub struct NotificationDispatcher {
    storage: Arc<dyn Storage>,
    notifiers: Vec<Arc<dyn Notifier>>,
    stats: Arc<Stats>,
}

impl NotificationDispatcher {
    pub fn new(storage: Arc<dyn Storage>, notifiers: Vec<Arc<dyn Notifier>>, stats: Arc<Stats>) -> Self {
        Self {
            storage,
            notifiers,
            stats,
        }
    }

    pub async fn run(&self, mut rx: broadcast::Receiver<TriggeredAlert>) {
        loop {
            match rx.recv().await {
                Ok(triggered) => self.dispatch_one(triggered).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "notification dispatcher lagged behind alerts topic");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn dispatch_one(&self, triggered: TriggeredAlert) {
        let alert = match self.storage.get_alert(triggered.alert_id).await {
            Ok(Some(alert)) => alert,
            Ok(None) => {
                warn!(alert_id = %triggered.alert_id, "triggered alert references unknown alert, skipping notification");
                return;
            }
            Err(err) => {
                warn!(alert_id = %triggered.alert_id, error = ?err, "failed to load alert for notification");
                return;
            }
        };

        for notifier in &self.notifiers {
            notifier.notify(&alert, &triggered);
            self.stats.notifications_sent.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_empty_symbol_subscription() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id, None);
        assert!(!registry.should_deliver(id, "BTCUSDT"));
    }

    #[test]
    fn subscribe_symbol_enables_delivery_for_that_symbol_only() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id, None);
        registry.subscribe_symbol(id, "BTCUSDT");

        assert!(registry.should_deliver(id, "BTCUSDT"));
        assert!(!registry.should_deliver(id, "ETHUSDT"));
    }

    #[test]
    fn subscribe_all_matches_every_symbol() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id, None);
        registry.subscribe_all(id);

        assert!(registry.should_deliver(id, "BTCUSDT"));
        assert!(registry.should_deliver(id, "ANYTHING"));
    }

    #[test]
    fn unsubscribe_removes_symbol() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id, None);
        registry.subscribe_symbol(id, "BTCUSDT");
        registry.unsubscribe_symbol(id, "BTCUSDT");

        assert!(!registry.should_deliver(id, "BTCUSDT"));
    }

    #[test]
    fn unregister_drops_session() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id, None);
        registry.unregister(id);

        assert_eq!(registry.session_count(), 0);
        assert!(!registry.should_deliver(id, "BTCUSDT"));
    }

    #[test]
    fn unknown_session_never_matches() {
        let registry = SessionRegistry::new();
        assert!(!registry.should_deliver(Uuid::new_v4(), "BTCUSDT"));
    }
}
