use std::sync::Arc;

use tracing::{error, warn};
use uuid::Uuid;

use crate::counter_store::CounterStore;
use crate::model::{Alert, BasePriceSource, GateResults, PriceTick, TriggeredAlert};
use crate::retry::RetryPolicy;
use crate::stats::Stats;
use crate::storage::Storage;

/// Owns the durable write path for a trigger: advance the in-memory counter,
/// persist the event, publish regardless of whether the write succeeded.
/// At-least-once delivery prevails over durability.
pub struct Recorder {
    storage: Arc<dyn Storage>,
    counter_store: Arc<CounterStore>,
    stats: Arc<Stats>,
    write_retry: RetryPolicy,
}

impl Recorder {
    pub fn new(storage: Arc<dyn Storage>, counter_store: Arc<CounterStore>, stats: Arc<Stats>) -> Self {
        Self {
            storage,
            counter_store,
            stats,
            write_retry: RetryPolicy::durable_write(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        alert: &Alert,
        tick: &PriceTick,
        volume_24h: Option<f64>,
        base_price: f64,
        base_price_source: BasePriceSource,
        pct_change: f64,
        gates: GateResults,
        candle_open_time_ms: i64,
    ) -> TriggeredAlert {
        let counter = self.counter_store.record_trigger(
            alert.alert_id,
            alert.count_timeframe,
            candle_open_time_ms,
            tick.event_time_ms,
        );

        let triggered = TriggeredAlert {
            trigger_id: Uuid::new_v4(),
            alert_id: alert.alert_id,
            symbol: alert.symbol.clone(),
            triggered_at_ms: tick.event_time_ms,
            price: tick.price,
            base_price_used: base_price,
            base_price_source,
            pct_change,
            volume_24h,
            conditions: gates,
            notifications_attempted: Vec::new(),
        };

        self.persist_with_retry(&triggered, candle_open_time_ms, counter.count)
            .await;

        triggered
    }

    async fn persist_with_retry(&self, triggered: &TriggeredAlert, candle_open_time_ms: i64, count: u32) {
        let mut attempt = 0u32;
        loop {
            match self
                .storage
                .insert_triggered_alert(triggered, candle_open_time_ms, count)
                .await
            {
                Ok(()) => return,
                Err(err) if self.write_retry.should_retry(attempt) => {
                    warn!(
                        trigger_id = %triggered.trigger_id,
                        attempt,
                        error = ?err,
                        "retrying triggered_alert write"
                    );
                    tokio::time::sleep(self.write_retry.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.stats.dropped_triggers.inc();
                    error!(
                        trigger_id = %triggered.trigger_id,
                        error = ?err,
                        "dropping triggered_alert after exhausting retries"
                    );
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::model::{Direction, TargetType, Timeframe};
    use error_stack::Report;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeStorage {
        calls: AtomicUsize,
        fail_times: usize,
        inserted: Mutex<Vec<(i64, u32)>>,
    }

    impl Storage for FakeStorage {
        fn list_active_alerts(
            &self,
        ) -> BoxFuture<'_, Result<Vec<Alert>, Report<StorageError>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn get_alert(
            &self,
            _alert_id: Uuid,
        ) -> BoxFuture<'_, Result<Option<Alert>, Report<StorageError>>> {
            Box::pin(async { Ok(None) })
        }

        fn upsert_alert(&self, _alert: &Alert) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
            Box::pin(async { Ok(()) })
        }

        fn remove_alert(&self, _alert_id: Uuid) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
            Box::pin(async { Ok(()) })
        }

        fn insert_triggered_alert(
            &self,
            _triggered: &TriggeredAlert,
            candle_open_time_ms: i64,
            count: u32,
        ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail_times = self.fail_times;
            self.inserted
                .lock()
                .unwrap()
                .push((candle_open_time_ms, count));
            Box::pin(async move {
                if call < fail_times {
                    return Err(Report::new(StorageError::Insert));
                }
                Ok(())
            })
        }

        fn max_count_for_candle(
            &self,
            _alert_id: Uuid,
            _candle_open_time_ms: i64,
        ) -> BoxFuture<'_, Result<Option<u32>, Report<StorageError>>> {
            Box::pin(async { Ok(None) })
        }
    }

    fn alert() -> Alert {
        Alert::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "BTCUSDT".into(),
            Direction::Up,
            TargetType::PercentChange,
            1.0,
            100.0,
            1.0,
            Timeframe::Min1,
            0.0,
            true,
            Timeframe::Min1,
            5,
        )
        .unwrap()
    }

    fn tick() -> PriceTick {
        PriceTick {
            symbol: "BTCUSDT".into(),
            price: 105.0,
            event_time_ms: 60_500,
            volume_24h: Some(1_000_000.0),
            price_change_pct_24h: None,
        }
    }

    fn gates() -> GateResults {
        GateResults {
            min_volume: true,
            change_pct: true,
            count: true,
        }
    }

    #[tokio::test]
    async fn record_persists_on_first_try() {
        let storage = Arc::new(FakeStorage {
            calls: AtomicUsize::new(0),
            fail_times: 0,
            inserted: Mutex::new(Vec::new()),
        });
        let counters = Arc::new(CounterStore::new());
        let stats = Arc::new(Stats::new());
        let recorder = Recorder::new(storage.clone(), counters, stats.clone());

        let triggered = recorder
            .record(&alert(), &tick(), Some(1_000_000.0), 100.0, BasePriceSource::CandleOpen, 5.0, gates(), 60_000)
            .await;

        assert_eq!(triggered.pct_change, 5.0);
        assert_eq!(storage.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.dropped_triggers.get(), 0);
    }

    #[tokio::test]
    async fn record_advances_counter() {
        let storage = Arc::new(FakeStorage {
            calls: AtomicUsize::new(0),
            fail_times: 0,
            inserted: Mutex::new(Vec::new()),
        });
        let counters = Arc::new(CounterStore::new());
        let stats = Arc::new(Stats::new());
        let recorder = Recorder::new(storage, counters.clone(), stats);
        let a = alert();

        recorder
            .record(&a, &tick(), Some(1_000_000.0), 100.0, BasePriceSource::CandleOpen, 5.0, gates(), 60_000)
            .await;
        recorder
            .record(&a, &tick(), Some(1_000_000.0), 100.0, BasePriceSource::CandleOpen, 5.0, gates(), 60_000)
            .await;

        assert_eq!(counters.get(a.alert_id, a.count_timeframe).unwrap().count, 2);
    }

    #[tokio::test]
    async fn record_retries_then_succeeds() {
        let storage = Arc::new(FakeStorage {
            calls: AtomicUsize::new(0),
            fail_times: 2,
            inserted: Mutex::new(Vec::new()),
        });
        let counters = Arc::new(CounterStore::new());
        let stats = Arc::new(Stats::new());
        let recorder = Recorder::new(storage.clone(), counters, stats.clone());

        recorder
            .record(&alert(), &tick(), Some(1_000_000.0), 100.0, BasePriceSource::CandleOpen, 5.0, gates(), 60_000)
            .await;

        assert_eq!(storage.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.dropped_triggers.get(), 0);
    }

    #[tokio::test]
    async fn record_drops_and_counts_after_exhausting_retries() {
        let storage = Arc::new(FakeStorage {
            calls: AtomicUsize::new(0),
            fail_times: 100,
            inserted: Mutex::new(Vec::new()),
        });
        let counters = Arc::new(CounterStore::new());
        let stats = Arc::new(Stats::new());
        let recorder = Recorder::new(storage.clone(), counters, stats.clone());

        let triggered = recorder
            .record(&alert(), &tick(), Some(1_000_000.0), 100.0, BasePriceSource::CandleOpen, 5.0, gates(), 60_000)
            .await;

        // Published regardless of the durable write outcome.
        assert_eq!(triggered.symbol, "BTCUSDT");
        assert_eq!(stats.dropped_triggers.get(), 1);
        assert_eq!(storage.calls.load(Ordering::SeqCst), 4);
    }
}
