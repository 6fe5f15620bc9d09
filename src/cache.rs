use std::collections::HashMap;
use std::sync::RwLock;

use crate::bus::Bus;
use crate::model::PriceTick;

/// Concurrent `symbol -> PriceTick` map with monotonic `put`: a tick older
/// than the currently cached one for its symbol is dropped.
///
/// Reads never block writers of other symbols: the map is sharded
/// implicitly by the `RwLock` around the whole table, which is acceptable
/// here because `Get` only clones a small struct and `Put` holds the write
/// lock for the duration of a single insert, never across I/O (the pub/sub
/// mirror happens after the lock is released).
pub struct PriceCache {
    latest: RwLock<HashMap<String, PriceTick>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self {
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Insert `tick` iff it is newer than (or equal to) the currently
    /// cached tick for its symbol. Returns `true` if it was stored.
    pub fn put(&self, tick: PriceTick) -> bool {
        let mut guard = self.latest.write().expect("price cache lock poisoned");
        match guard.get(&tick.symbol) {
            Some(existing) if existing.event_time_ms > tick.event_time_ms => false,
            _ => {
                guard.insert(tick.symbol.clone(), tick);
                true
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<PriceTick> {
        self.latest
            .read()
            .expect("price cache lock poisoned")
            .get(symbol)
            .cloned()
    }

    /// Evict a symbol that has left the active universe. Called only by the
    /// supervisor, never from the hot ingestion path.
    pub fn evict(&self, symbol: &str) {
        self.latest
            .write()
            .expect("price cache lock poisoned")
            .remove(symbol);
    }

    pub fn len(&self) -> usize {
        self.latest.read().expect("price cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply a tick to the cache and fan it out on the in-process bus. The
/// shared-bus mirror is driven separately by the supervisor's subscriber
/// loop so this function never blocks on network I/O.
pub fn put_and_publish(cache: &PriceCache, bus: &Bus, tick: PriceTick) -> bool {
    let stored = cache.put(tick.clone());
    if stored {
        bus.publish_price(tick);
    }
    stored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str, price: f64, event_time_ms: i64) -> PriceTick {
        PriceTick {
            symbol: symbol.into(),
            price,
            event_time_ms,
            volume_24h: None,
            price_change_pct_24h: None,
        }
    }

    #[test]
    fn put_then_get_returns_latest() {
        let cache = PriceCache::new();
        assert!(cache.put(tick("BTCUSDT", 100.0, 1)));
        assert_eq!(cache.get("BTCUSDT").unwrap().price, 100.0);
    }

    #[test]
    fn older_tick_is_dropped() {
        let cache = PriceCache::new();
        assert!(cache.put(tick("BTCUSDT", 100.0, 10)));
        assert!(!cache.put(tick("BTCUSDT", 99.0, 5)));
        assert_eq!(cache.get("BTCUSDT").unwrap().price, 100.0);
    }

    #[test]
    fn equal_timestamp_replaces() {
        let cache = PriceCache::new();
        assert!(cache.put(tick("BTCUSDT", 100.0, 10)));
        assert!(cache.put(tick("BTCUSDT", 101.0, 10)));
        assert_eq!(cache.get("BTCUSDT").unwrap().price, 101.0);
    }

    #[test]
    fn missing_symbol_returns_none() {
        let cache = PriceCache::new();
        assert!(cache.get("BTCUSDT").is_none());
    }

    #[test]
    fn evict_removes_symbol() {
        let cache = PriceCache::new();
        cache.put(tick("BTCUSDT", 100.0, 1));
        cache.evict("BTCUSDT");
        assert!(cache.get("BTCUSDT").is_none());
    }

    #[test]
    fn monotonic_sequence_of_puts_keeps_max_event_time() {
        let cache = PriceCache::new();
        let sequence = [1, 2, 3, 2, 4, 1, 5];
        for (i, ts) in sequence.iter().enumerate() {
            cache.put(tick("BTCUSDT", i as f64, *ts));
        }
        assert_eq!(cache.get("BTCUSDT").unwrap().event_time_ms, 5);
    }

    #[tokio::test]
    async fn put_and_publish_forwards_to_bus() {
        let cache = PriceCache::new();
        let bus = Bus::new(16, 16);
        let mut rx = bus.subscribe_prices();

        assert!(put_and_publish(&cache, &bus, tick("BTCUSDT", 100.0, 1)));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.symbol, "BTCUSDT");
    }

    #[tokio::test]
    async fn stale_tick_is_not_published() {
        let cache = PriceCache::new();
        let bus = Bus::new(16, 16);
        let mut rx = bus.subscribe_prices();

        put_and_publish(&cache, &bus, tick("BTCUSDT", 100.0, 10));
        rx.recv().await.unwrap();

        assert!(!put_and_publish(&cache, &bus, tick("BTCUSDT", 50.0, 1)));
        assert!(rx.try_recv().is_err());
    }
}
