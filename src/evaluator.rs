use std::sync::Arc;

use error_stack::Report;
use tracing::warn;

use crate::alert_index::AlertIndex;
use crate::bus::Bus;
use crate::cache::PriceCache;
use crate::candle_fetcher::CandleFetcher;
use crate::counter_store::CounterStore;
use crate::error::EvaluatorError;
use crate::model::{Alert, BasePriceSource, Direction, GateResults, PriceTick};
use crate::recorder::Recorder;
use crate::stats::Stats;
use crate::volume_cache::VolumeCache;

/// One evaluator instance serializes all evaluation work; callers drive it
/// with one worker per symbol (or a worker pool keyed by `hash(symbol)`),
/// so the counter store never needs cross-worker locking for a given alert.
pub struct Evaluator {
    cache: Arc<PriceCache>,
    alert_index: Arc<AlertIndex>,
    candle_fetcher: Arc<CandleFetcher>,
    counter_store: Arc<CounterStore>,
    recorder: Arc<Recorder>,
    bus: Arc<Bus>,
    stats: Arc<Stats>,
    volume_cache: Arc<VolumeCache>,
}

impl Evaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<PriceCache>,
        alert_index: Arc<AlertIndex>,
        candle_fetcher: Arc<CandleFetcher>,
        counter_store: Arc<CounterStore>,
        recorder: Arc<Recorder>,
        bus: Arc<Bus>,
        stats: Arc<Stats>,
        volume_cache: Arc<VolumeCache>,
    ) -> Self {
        Self {
            cache,
            alert_index,
            candle_fetcher,
            counter_store,
            recorder,
            bus,
            stats,
            volume_cache,
        }
    }

    /// Evaluate every alert registered for `tick.symbol` against `tick`.
    pub async fn on_tick(&self, tick: PriceTick) {
        self.stats.price_updates_received.inc();

        if tick.price <= 0.0 {
            warn!(symbol = %tick.symbol, price = tick.price, "dropping tick with non-positive price");
            return;
        }

        let alerts = self.alert_index.alerts_for(&tick.symbol);
        for alert in alerts.iter() {
            self.evaluate_one(alert, &tick).await;
        }
    }

    async fn evaluate_one(&self, alert: &Alert, tick: &PriceTick) {
        self.stats.alerts_evaluated.inc();

        let volume_24h = match tick.volume_24h {
            Some(v) => Some(v),
            None if alert.min_daily_volume_quote > 0.0 => {
                self.volume_cache.get_cached(&alert.symbol, tick.event_time_ms)
            }
            None => None,
        };
        let min_volume = gate_a_min_volume(alert, volume_24h);
        if !min_volume {
            self.stats.gates_failed_a.inc();
            return;
        }

        let (change_pct_candle_open, base_price, base_price_source) =
            self.resolve_base_price(alert, &alert.change_pct_timeframe, tick.event_time_ms);

        if base_price <= 0.0 {
            let report = Report::new(EvaluatorError::InvalidBasePrice {
                alert_id: alert.alert_id.to_string(),
            });
            warn!(error = ?report, "skipping alert with non-positive resolved base price");
            return;
        }

        let pct_change = (tick.price - base_price) / base_price * 100.0;
        let change_pct = gate_b_change_pct(alert, pct_change);
        if !change_pct {
            self.stats.gates_failed_b.inc();
            return;
        }

        let (count, count_candle_open_ms) = self.gate_c_count_limit(alert, tick.event_time_ms);
        if !count {
            self.stats.gates_failed_c.inc();
            return;
        }

        let gates = GateResults {
            min_volume,
            change_pct,
            count,
        };

        let _ = change_pct_candle_open;
        let candle_open_ms = count_candle_open_ms
            .unwrap_or_else(|| alert.count_timeframe.open_time_ms(tick.event_time_ms));

        self.stats.alerts_triggered.inc();
        let triggered = self
            .recorder
            .record(
                alert,
                tick,
                volume_24h,
                base_price,
                base_price_source,
                pct_change,
                gates,
                candle_open_ms,
            )
            .await;
        self.bus.publish_alert(triggered);
    }

    /// Resolve the comparison base price for Gate B from the already-cached
    /// candle. A cache miss never blocks this call on an upstream fetch: it
    /// schedules a background refresh and reports the alert's configured
    /// `basePrice` as the fallback for this tick.
    fn resolve_base_price(
        &self,
        alert: &Alert,
        timeframe: &crate::model::Timeframe,
        now_ms: i64,
    ) -> (i64, f64, BasePriceSource) {
        match self.candle_fetcher.current_candle(&alert.symbol, *timeframe, now_ms) {
            Some(candle) => (candle.open_time_ms, candle.open, BasePriceSource::CandleOpen),
            None => {
                self.stats.candle_fetch_failures.inc();
                (
                    timeframe.open_time_ms(now_ms),
                    alert.base_price,
                    BasePriceSource::AlertBaseFallback,
                )
            }
        }
    }

    /// Returns whether the gate passes and, when a candle was available,
    /// its `openTimeMs` so the recorder updates the same candle's counter.
    /// Reads only the cached candle; a miss schedules a background refresh
    /// and falls back to the alert's fail-open/fail-closed default.
    fn gate_c_count_limit(&self, alert: &Alert, now_ms: i64) -> (bool, Option<i64>) {
        if !alert.count_enabled {
            return (true, None);
        }

        let candle = self
            .candle_fetcher
            .current_candle(&alert.symbol, alert.count_timeframe, now_ms);

        let Some(candle) = candle else {
            self.stats.candle_fetch_failures.inc();
            return (!alert.fail_closed_on_candle_error, None);
        };

        let passes = match self.counter_store.get(alert.alert_id, alert.count_timeframe) {
            Some(cur) if cur.last_candle_open_time_ms == candle.open_time_ms => {
                cur.count < alert.max_triggers_per_candle
            }
            _ => true,
        };
        (passes, Some(candle.open_time_ms))
    }
}

/// Gate A — min daily volume. Pass unconditionally when the threshold is 0.
/// `volume_24h` has already been resolved from the tick or the side-channel
/// cache by the caller.
pub fn gate_a_min_volume(alert: &Alert, volume_24h: Option<f64>) -> bool {
    if alert.min_daily_volume_quote == 0.0 {
        return true;
    }
    match volume_24h {
        Some(v) => v >= alert.min_daily_volume_quote,
        None => false,
    }
}

/// Gate B — change-percent direction semantics.
pub fn gate_b_change_pct(alert: &Alert, pct_change: f64) -> bool {
    let threshold = alert.change_pct_threshold;
    if threshold == 0.0 {
        return true;
    }
    match alert.direction {
        Direction::Up => pct_change >= threshold,
        Direction::Down => pct_change <= -threshold,
        Direction::Either => pct_change.abs() >= threshold.abs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, TargetType, Timeframe};
    use uuid::Uuid;

    fn alert(
        direction: Direction,
        threshold: f64,
        min_volume: f64,
    ) -> Alert {
        Alert::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "BTCUSDT".into(),
            direction,
            TargetType::PercentChange,
            1.0,
            100.0,
            threshold,
            Timeframe::Min1,
            min_volume,
            false,
            Timeframe::Min5,
            1,
        )
        .unwrap()
    }

    #[test]
    fn gate_a_passes_when_threshold_is_zero() {
        let a = alert(Direction::Up, 1.0, 0.0);
        assert!(gate_a_min_volume(&a, None));
    }

    #[test]
    fn gate_a_fails_when_volume_unknown_and_threshold_positive() {
        let a = alert(Direction::Up, 1.0, 1_000_000.0);
        assert!(!gate_a_min_volume(&a, None));
    }

    #[test]
    fn gate_a_passes_when_volume_meets_threshold() {
        let a = alert(Direction::Up, 1.0, 1_000_000.0);
        assert!(gate_a_min_volume(&a, Some(2_000_000.0)));
    }

    #[test]
    fn gate_a_fails_when_volume_below_threshold() {
        let a = alert(Direction::Up, 1.0, 1_000_000.0);
        assert!(!gate_a_min_volume(&a, Some(500_000.0)));
    }

    #[test]
    fn gate_b_zero_threshold_always_passes() {
        let a = alert(Direction::Up, 0.0, 0.0);
        assert!(gate_b_change_pct(&a, -99.0));
        assert!(gate_b_change_pct(&a, 99.0));
    }

    #[test]
    fn gate_b_up_requires_pct_at_or_above_threshold() {
        let a = alert(Direction::Up, 5.0, 0.0);
        assert!(gate_b_change_pct(&a, 5.0));
        assert!(gate_b_change_pct(&a, 6.0));
        assert!(!gate_b_change_pct(&a, 4.9));
    }

    #[test]
    fn gate_b_down_requires_pct_at_or_below_negative_threshold() {
        let a = alert(Direction::Down, 5.0, 0.0);
        assert!(gate_b_change_pct(&a, -5.0));
        assert!(gate_b_change_pct(&a, -6.0));
        assert!(!gate_b_change_pct(&a, -4.9));
    }

    #[test]
    fn gate_b_down_never_triggers_while_above_negative_threshold() {
        let a = alert(Direction::Down, 5.0, 0.0);
        for pct in [-4.9, -1.0, 0.0, 1.0, 10.0] {
            assert!(!gate_b_change_pct(&a, pct));
        }
    }

    #[test]
    fn gate_b_either_triggers_on_absolute_magnitude() {
        let a = alert(Direction::Either, 5.0, 0.0);
        assert!(gate_b_change_pct(&a, 5.0));
        assert!(gate_b_change_pct(&a, -5.0));
        assert!(!gate_b_change_pct(&a, 4.9));
        assert!(!gate_b_change_pct(&a, -4.9));
    }
}
