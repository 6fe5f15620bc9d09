use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::model::{CandleCounter, Timeframe};

type Key = (Uuid, Timeframe);

/// Independent `(alertId, timeframe) -> CandleCounter` table, split out of
/// `Alert` rather than nested, so the recorder can read/write it without
/// touching the alert snapshot the index owns.
pub struct CounterStore {
    counters: Mutex<HashMap<Key, CandleCounter>>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, alert_id: Uuid, timeframe: Timeframe) -> Option<CandleCounter> {
        self.counters
            .lock()
            .expect("counter store lock poisoned")
            .get(&(alert_id, timeframe))
            .copied()
    }

    /// Advance the counter for `(alert_id, timeframe)` against the observed
    /// `candle_open_time_ms`: reset to `1` on a new candle, otherwise
    /// increment.
    pub fn record_trigger(
        &self,
        alert_id: Uuid,
        timeframe: Timeframe,
        candle_open_time_ms: i64,
        now_ms: i64,
    ) -> CandleCounter {
        let mut guard = self.counters.lock().expect("counter store lock poisoned");
        let key = (alert_id, timeframe);
        let next = match guard.get(&key) {
            Some(cur) if cur.last_candle_open_time_ms == candle_open_time_ms => CandleCounter {
                count: cur.count + 1,
                last_candle_open_time_ms: candle_open_time_ms,
                last_reset_at_ms: cur.last_reset_at_ms,
            },
            _ => CandleCounter {
                count: 1,
                last_candle_open_time_ms: candle_open_time_ms,
                last_reset_at_ms: now_ms,
            },
        };
        guard.insert(key, next);
        next
    }

    /// Reconcile from the durable store's max `count` for this key, used on
    /// restart when the store lacks transactions.
    pub fn reconcile(
        &self,
        alert_id: Uuid,
        timeframe: Timeframe,
        candle_open_time_ms: i64,
        max_count: u32,
        now_ms: i64,
    ) {
        let mut guard = self.counters.lock().expect("counter store lock poisoned");
        guard.insert(
            (alert_id, timeframe),
            CandleCounter {
                count: max_count,
                last_candle_open_time_ms: candle_open_time_ms,
                last_reset_at_ms: now_ms,
            },
        );
    }
}

impl Default for CounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_trigger_starts_count_at_one() {
        let store = CounterStore::new();
        let id = Uuid::new_v4();
        let counter = store.record_trigger(id, Timeframe::Min1, 60_000, 60_500);
        assert_eq!(counter.count, 1);
        assert_eq!(counter.last_candle_open_time_ms, 60_000);
    }

    #[test]
    fn same_candle_increments() {
        let store = CounterStore::new();
        let id = Uuid::new_v4();
        store.record_trigger(id, Timeframe::Min1, 60_000, 60_500);
        let counter = store.record_trigger(id, Timeframe::Min1, 60_000, 60_900);
        assert_eq!(counter.count, 2);
    }

    #[test]
    fn new_candle_resets_to_one() {
        let store = CounterStore::new();
        let id = Uuid::new_v4();
        store.record_trigger(id, Timeframe::Min1, 60_000, 60_500);
        store.record_trigger(id, Timeframe::Min1, 60_000, 60_900);
        let counter = store.record_trigger(id, Timeframe::Min1, 120_000, 120_500);
        assert_eq!(counter.count, 1);
        assert_eq!(counter.last_candle_open_time_ms, 120_000);
    }

    #[test]
    fn counters_are_independent_per_timeframe() {
        let store = CounterStore::new();
        let id = Uuid::new_v4();
        store.record_trigger(id, Timeframe::Min1, 60_000, 60_500);
        store.record_trigger(id, Timeframe::Hour1, 3_600_000, 3_600_500);

        assert_eq!(store.get(id, Timeframe::Min1).unwrap().count, 1);
        assert_eq!(store.get(id, Timeframe::Hour1).unwrap().count, 1);
    }

    #[test]
    fn missing_counter_returns_none() {
        let store = CounterStore::new();
        assert!(store.get(Uuid::new_v4(), Timeframe::Min1).is_none());
    }

    #[test]
    fn reconcile_sets_count_from_durable_max() {
        let store = CounterStore::new();
        let id = Uuid::new_v4();
        store.reconcile(id, Timeframe::Min1, 60_000, 3, 60_900);
        assert_eq!(store.get(id, Timeframe::Min1).unwrap().count, 3);
    }
}
