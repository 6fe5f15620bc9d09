use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::exchange::ExchangeStream;

const REFRESH_INTERVAL_MS: i64 = 5_000;

struct Entry {
    volume: f64,
    fetched_at_ms: i64,
}

/// Gate A's 24h-volume side channel: when a tick carries no `volume24h`,
/// fall back to this cache instead of hitting the 24h-ticker endpoint on
/// every evaluation. Reads are non-blocking; a stale or missing entry
/// triggers a deduplicated background refresh, at most once per symbol
/// every 5s, rather than being awaited inline.
pub struct VolumeCache {
    exchange: Arc<dyn ExchangeStream>,
    entries: Mutex<HashMap<String, Entry>>,
    in_flight: Mutex<HashSet<String>>,
}

impl VolumeCache {
    pub fn new(exchange: Arc<dyn ExchangeStream>) -> Self {
        Self {
            exchange,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the cached 24h quote volume for `symbol` without blocking on
    /// any I/O. Schedules a background refresh when the entry is missing or
    /// older than the refresh interval; the stale value (if any) is still
    /// returned while that refresh is in flight.
    pub fn get_cached(self: &Arc<Self>, symbol: &str, now_ms: i64) -> Option<f64> {
        let (value, stale) = {
            let guard = self.entries.lock().expect("volume cache lock poisoned");
            match guard.get(symbol) {
                Some(entry) => (
                    Some(entry.volume),
                    now_ms - entry.fetched_at_ms >= REFRESH_INTERVAL_MS,
                ),
                None => (None, true),
            }
        };

        if stale {
            self.spawn_refresh(symbol, now_ms);
        }

        value
    }

    fn spawn_refresh(self: &Arc<Self>, symbol: &str, now_ms: i64) {
        {
            let mut in_flight = self.in_flight.lock().expect("volume cache lock poisoned");
            if !in_flight.insert(symbol.to_string()) {
                return;
            }
        }

        let this = self.clone();
        let symbol = symbol.to_string();
        tokio::spawn(async move {
            match this.exchange.fetch_24h_volume(&symbol).await {
                Ok(volume) => {
                    this.entries.lock().expect("volume cache lock poisoned").insert(
                        symbol.clone(),
                        Entry {
                            volume,
                            fetched_at_ms: now_ms,
                        },
                    );
                }
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "24h volume side-channel refresh failed");
                }
            }
            this.in_flight
                .lock()
                .expect("volume cache lock poisoned")
                .remove(&symbol);
        });
    }
}
