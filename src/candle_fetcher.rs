use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::exchange::ExchangeStream;
use crate::model::{Candle, Timeframe};

type CacheKey = (String, Timeframe);

/// On-demand current-candle lookup. Reads are non-blocking: a cache miss or
/// a stale (previous-candle) entry kicks off a deduplicated background
/// refetch and returns `None` immediately rather than waiting on it.
pub struct CandleFetcher {
    exchange: Arc<dyn ExchangeStream>,
    ready: Mutex<HashMap<CacheKey, Candle>>,
    in_flight: Mutex<HashSet<CacheKey>>,
}

impl CandleFetcher {
    pub fn new(exchange: Arc<dyn ExchangeStream>) -> Self {
        Self {
            exchange,
            ready: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the currently-forming candle for `(symbol, tf)` from cache,
    /// or `None` on a miss. Callers MUST treat `None` as "unknown, fall
    /// back to the alert's basePrice" — this never awaits the upstream
    /// fetch itself, it only schedules one for next time.
    pub fn current_candle(self: &Arc<Self>, symbol: &str, tf: Timeframe, now_ms: i64) -> Option<Candle> {
        let key = (symbol.to_string(), tf);
        let open_time_ms = tf.open_time_ms(now_ms);

        let cached = {
            let guard = self.ready.lock().expect("candle cache lock poisoned");
            guard
                .get(&key)
                .filter(|candle| candle.open_time_ms == open_time_ms)
                .cloned()
        };

        if cached.is_none() {
            self.spawn_refresh(key, open_time_ms);
        }

        cached
    }

    /// Kick off a background fetch for `key` unless one is already running.
    fn spawn_refresh(self: &Arc<Self>, key: CacheKey, open_time_ms: i64) {
        {
            let mut in_flight = self.in_flight.lock().expect("candle cache lock poisoned");
            if !in_flight.insert(key.clone()) {
                return;
            }
        }

        let this = self.clone();
        tokio::spawn(async move {
            let (symbol, tf) = key.clone();
            let result = this.fetch(&symbol, tf, open_time_ms).await;
            if let Some(candle) = result {
                this.ready
                    .lock()
                    .expect("candle cache lock poisoned")
                    .insert(key.clone(), candle);
            }
            this.in_flight
                .lock()
                .expect("candle cache lock poisoned")
                .remove(&key);
        });
    }

    async fn fetch(&self, symbol: &str, tf: Timeframe, open_time_ms: i64) -> Option<Candle> {
        match self.exchange.fetch_candles(symbol, tf, 1).await {
            Ok(mut candles) => match candles.pop() {
                Some(candle) => Some(candle),
                None => {
                    warn!(symbol, %tf, "candle fetch returned empty result");
                    None
                }
            },
            Err(err) => {
                warn!(symbol, %tf, error = %err, "candle fetch failed");
                let _ = open_time_ms;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_stack::Report;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::error::IngestError;

    struct FakeExchange {
        calls: AtomicUsize,
        fail: bool,
    }

    impl ExchangeStream for FakeExchange {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn fetch_candles(
            &self,
            symbol: &str,
            timeframe: Timeframe,
            _limit: usize,
        ) -> BoxFuture<'_, Result<Vec<Candle>, Report<IngestError>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let symbol = symbol.to_string();
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    return Err(Report::new(IngestError::Request {
                        exchange: "fake".into(),
                    }));
                }
                Ok(vec![Candle {
                    symbol,
                    timeframe,
                    open_time_ms: 0,
                    close_time_ms: timeframe.duration_ms() - 1,
                    open: 100.0,
                    high: 110.0,
                    low: 90.0,
                    close: 105.0,
                    volume: 10.0,
                }])
            })
        }

        fn fetch_24h_volume(
            &self,
            _symbol: &str,
        ) -> BoxFuture<'_, Result<f64, Report<IngestError>>> {
            Box::pin(async { Ok(0.0) })
        }

        fn subscribe_ticks(
            &self,
            _symbols: &[String],
            _max_streams_per_connection: usize,
            _tx: mpsc::Sender<crate::model::PriceTick>,
            _cancel: CancellationToken,
        ) -> BoxFuture<'_, Result<(), Report<IngestError>>> {
            Box::pin(async { Ok(()) })
        }
    }

    async fn let_background_fetch_run() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn first_lookup_misses_and_schedules_a_background_fetch() {
        let exchange = Arc::new(FakeExchange {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let fetcher = Arc::new(CandleFetcher::new(exchange.clone()));

        let first = fetcher.current_candle("BTCUSDT", Timeframe::Min1, 1_000);
        assert!(first.is_none());

        let_background_fetch_run().await;
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn later_lookup_reads_the_cache_populated_by_the_background_fetch() {
        let exchange = Arc::new(FakeExchange {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let fetcher = Arc::new(CandleFetcher::new(exchange.clone()));

        assert!(fetcher.current_candle("BTCUSDT", Timeframe::Min1, 1_000).is_none());
        let_background_fetch_run().await;

        let second = fetcher.current_candle("BTCUSDT", Timeframe::Min1, 2_000);
        assert!(second.is_some());
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetches_after_candle_closes() {
        let exchange = Arc::new(FakeExchange {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let fetcher = Arc::new(CandleFetcher::new(exchange.clone()));

        fetcher.current_candle("BTCUSDT", Timeframe::Min1, 1_000);
        let_background_fetch_run().await;
        fetcher.current_candle("BTCUSDT", Timeframe::Min1, 2_000);

        // Next candle: cached entry's openTimeMs no longer matches.
        let stale = fetcher.current_candle("BTCUSDT", Timeframe::Min1, 61_000);
        assert!(stale.is_none());
        let_background_fetch_run().await;

        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stays_none_on_upstream_failure() {
        let exchange = Arc::new(FakeExchange {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let fetcher = Arc::new(CandleFetcher::new(exchange));

        fetcher.current_candle("BTCUSDT", Timeframe::Min1, 1_000);
        let_background_fetch_run().await;

        let result = fetcher.current_candle("BTCUSDT", Timeframe::Min1, 2_000);
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn concurrent_misses_share_a_single_background_fetch() {
        let exchange = Arc::new(FakeExchange {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let fetcher = Arc::new(CandleFetcher::new(exchange.clone()));

        for _ in 0..10 {
            assert!(fetcher.current_candle("BTCUSDT", Timeframe::Min1, 1_000).is_none());
        }
        let_background_fetch_run().await;

        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
        assert!(fetcher.current_candle("BTCUSDT", Timeframe::Min1, 1_000).is_some());
    }
}
