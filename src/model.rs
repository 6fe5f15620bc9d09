use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Candle timeframe supported by the engine.
///
/// String representations match both the config file format and the
/// upstream exchange's interval strings (e.g. `"1m"`, `"1h"`, `"1d"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Min1,
    Min5,
    Min15,
    Hour1,
    Hour4,
    Hour12,
    Day1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::Min1,
        Timeframe::Min5,
        Timeframe::Min15,
        Timeframe::Hour1,
        Timeframe::Hour4,
        Timeframe::Hour12,
        Timeframe::Day1,
    ];

    /// Parse a config/wire-format string into a `Timeframe`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::Min1),
            "5m" => Some(Self::Min5),
            "15m" => Some(Self::Min15),
            "1h" => Some(Self::Hour1),
            "4h" => Some(Self::Hour4),
            "12h" => Some(Self::Hour12),
            "1d" => Some(Self::Day1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Hour12 => "12h",
            Self::Day1 => "1d",
        }
    }

    /// Binance kline interval string for this timeframe.
    pub fn binance_interval(self) -> &'static str {
        self.as_str()
    }

    /// Duration of one bar of this timeframe, in milliseconds.
    pub fn duration_ms(self) -> i64 {
        match self {
            Self::Min1 => 60_000,
            Self::Min5 => 5 * 60_000,
            Self::Min15 => 15 * 60_000,
            Self::Hour1 => 60 * 60_000,
            Self::Hour4 => 4 * 60 * 60_000,
            Self::Hour12 => 12 * 60 * 60_000,
            Self::Day1 => 24 * 60 * 60_000,
        }
    }

    /// Candle-alignment algorithm: the `openTimeMs` of the candle of this
    /// timeframe that contains `now_ms`.
    ///
    /// `openTimeMs = floor(now / tf_ms) * tf_ms`, the single source of truth
    /// for "which candle we are in" across every component.
    pub fn open_time_ms(self, now_ms: i64) -> i64 {
        let tf_ms = self.duration_ms();
        now_ms.div_euclid(tf_ms) * tf_ms
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized price update from the exchange. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    pub event_time_ms: i64,
    pub volume_24h: Option<f64>,
    pub price_change_pct_24h: Option<f64>,
}

/// An OHLCV bar, identified by `(symbol, timeframe, open_time_ms)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time_ms: i64,
    pub close_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetType {
    AbsolutePrice,
    PercentChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasePriceSource {
    CandleOpen,
    AlertBaseFallback,
}

/// Per-(alertId, timeframe) trigger counter, reset whenever the observed
/// candle's `open_time_ms` advances past the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandleCounter {
    pub count: u32,
    pub last_candle_open_time_ms: i64,
    pub last_reset_at_ms: i64,
}

/// Error constructing an `Alert` from its raw fields.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum AlertValidationError {
    #[display("direction=EITHER is only valid for targetType=PERCENT_CHANGE")]
    EitherRequiresPercentChange,
    #[display("maxTriggersPerCandle must be >= 1 when countEnabled")]
    CountGateNeedsPositiveLimit,
    #[display("targetValue must be non-negative")]
    NegativeTargetValue,
    #[display("changePctThreshold must be non-negative")]
    NegativeChangePctThreshold,
    #[display("minDailyVolumeQuote must be non-negative")]
    NegativeMinDailyVolume,
}

/// A user-defined alert rule. Construction is validated: `Alert::new` is the
/// only way to build one, enforcing the invariants in the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub owner_id: Uuid,
    pub symbol: String,
    pub active: bool,
    pub user_created: bool,

    pub direction: Direction,
    pub target_type: TargetType,
    pub target_value: f64,
    pub base_price: f64,

    pub change_pct_threshold: f64,
    pub change_pct_timeframe: Timeframe,

    pub min_daily_volume_quote: f64,

    pub count_enabled: bool,
    pub count_timeframe: Timeframe,
    pub max_triggers_per_candle: u32,

    /// Per-alert override for Gate C's fail-open-on-candle-error default.
    #[serde(default)]
    pub fail_closed_on_candle_error: bool,

    pub email: Option<String>,
    pub chat_target: Option<String>,
    pub comment: Option<String>,

    pub last_triggered_at_ms: Option<i64>,
}

impl Alert {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        alert_id: Uuid,
        owner_id: Uuid,
        symbol: String,
        direction: Direction,
        target_type: TargetType,
        target_value: f64,
        base_price: f64,
        change_pct_threshold: f64,
        change_pct_timeframe: Timeframe,
        min_daily_volume_quote: f64,
        count_enabled: bool,
        count_timeframe: Timeframe,
        max_triggers_per_candle: u32,
    ) -> Result<Self, AlertValidationError> {
        if direction == Direction::Either && target_type != TargetType::PercentChange {
            return Err(AlertValidationError::EitherRequiresPercentChange);
        }
        if count_enabled && max_triggers_per_candle < 1 {
            return Err(AlertValidationError::CountGateNeedsPositiveLimit);
        }
        if target_value < 0.0 {
            return Err(AlertValidationError::NegativeTargetValue);
        }
        if change_pct_threshold < 0.0 {
            return Err(AlertValidationError::NegativeChangePctThreshold);
        }
        if min_daily_volume_quote < 0.0 {
            return Err(AlertValidationError::NegativeMinDailyVolume);
        }

        Ok(Self {
            alert_id,
            owner_id,
            symbol,
            active: true,
            user_created: true,
            direction,
            target_type,
            target_value,
            base_price,
            change_pct_threshold,
            change_pct_timeframe,
            min_daily_volume_quote,
            count_enabled,
            count_timeframe,
            max_triggers_per_candle,
            fail_closed_on_candle_error: false,
            email: None,
            chat_target: None,
            comment: None,
            last_triggered_at_ms: None,
        })
    }
}

/// Which of the three gates passed for a given evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResults {
    pub min_volume: bool,
    pub change_pct: bool,
    pub count: bool,
}

impl GateResults {
    pub fn all_pass(self) -> bool {
        self.min_volume && self.change_pct && self.count
    }
}

/// Immutable, append-only trigger event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredAlert {
    pub trigger_id: Uuid,
    pub alert_id: Uuid,
    pub symbol: String,
    pub triggered_at_ms: i64,
    pub price: f64,
    pub base_price_used: f64,
    pub base_price_source: BasePriceSource,
    pub pct_change: f64,
    pub volume_24h: Option<f64>,
    pub conditions: GateResults,
    pub notifications_attempted: Vec<String>,
}
