use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    SqlitePool,
};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StorageError;
use crate::model::{Alert, BasePriceSource, Direction, TargetType, Timeframe, TriggeredAlert};
use crate::storage::Storage;

#[derive(sqlx::FromRow)]
struct AlertRow {
    alert_id: String,
    owner_id: String,
    symbol: String,
    active: i64,
    user_created: i64,
    direction: String,
    target_type: String,
    target_value: f64,
    base_price: f64,
    change_pct_threshold: f64,
    change_pct_timeframe: String,
    min_daily_volume_quote: f64,
    count_enabled: i64,
    count_timeframe: String,
    max_triggers_per_candle: i64,
    fail_closed_on_candle_error: i64,
    email: Option<String>,
    chat_target: Option<String>,
    comment: Option<String>,
    last_triggered_at_ms: Option<i64>,
}

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StorageError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(StorageError::Open {
                    path: path.display().to_string(),
                })
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StorageError::Open {
                path: path.display().to_string(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StorageError::Open {
                path: path.display().to_string(),
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;

        Ok(Self { pool })
    }

    fn row_to_alert(row: AlertRow) -> Alert {
        let AlertRow {
            alert_id,
            owner_id,
            symbol,
            active,
            user_created,
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
            fail_closed_on_candle_error,
            email,
            chat_target,
            comment,
            last_triggered_at_ms,
        } = row;

        Alert {
            alert_id: Uuid::parse_str(&alert_id).unwrap_or_else(|_| Uuid::nil()),
            owner_id: Uuid::parse_str(&owner_id).unwrap_or_else(|_| Uuid::nil()),
            symbol,
            active: active != 0,
            user_created: user_created != 0,
            direction: parse_direction(&direction),
            target_type: parse_target_type(&target_type),
            target_value,
            base_price,
            change_pct_threshold,
            change_pct_timeframe: Timeframe::from_str(&change_pct_timeframe)
                .unwrap_or(Timeframe::Min1),
            min_daily_volume_quote,
            count_enabled: count_enabled != 0,
            count_timeframe: Timeframe::from_str(&count_timeframe).unwrap_or(Timeframe::Min1),
            max_triggers_per_candle: max_triggers_per_candle as u32,
            fail_closed_on_candle_error: fail_closed_on_candle_error != 0,
            email,
            chat_target,
            comment,
            last_triggered_at_ms,
        }
    }
}

impl Storage for SqliteStorage {
    fn list_active_alerts(&self) -> BoxFuture<'_, Result<Vec<Alert>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<AlertRow> = sqlx::query_as(
                "SELECT alert_id, owner_id, symbol, active, user_created, direction, \
                 target_type, target_value, base_price, change_pct_threshold, \
                 change_pct_timeframe, min_daily_volume_quote, count_enabled, \
                 count_timeframe, max_triggers_per_candle, fail_closed_on_candle_error, \
                 email, chat_target, comment, last_triggered_at_ms \
                 FROM alerts WHERE active = 1 AND user_created = 1",
            )
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(rows.into_iter().map(Self::row_to_alert).collect())
        })
    }

    fn get_alert(
        &self,
        alert_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Alert>, Report<StorageError>>> {
        Box::pin(async move {
            let row: Option<AlertRow> = sqlx::query_as(
                "SELECT alert_id, owner_id, symbol, active, user_created, direction, \
                 target_type, target_value, base_price, change_pct_threshold, \
                 change_pct_timeframe, min_daily_volume_quote, count_enabled, \
                 count_timeframe, max_triggers_per_candle, fail_closed_on_candle_error, \
                 email, chat_target, comment, last_triggered_at_ms \
                 FROM alerts WHERE alert_id = ?",
            )
            .bind(alert_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(row.map(Self::row_to_alert))
        })
    }

    fn upsert_alert(&self, alert: &Alert) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let alert = alert.clone();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO alerts \
                 (alert_id, owner_id, symbol, active, user_created, direction, target_type, \
                  target_value, base_price, change_pct_threshold, change_pct_timeframe, \
                  min_daily_volume_quote, count_enabled, count_timeframe, \
                  max_triggers_per_candle, fail_closed_on_candle_error, email, chat_target, \
                  comment, last_triggered_at_ms) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(alert_id) DO UPDATE SET \
                 owner_id = excluded.owner_id, \
                 symbol = excluded.symbol, \
                 active = excluded.active, \
                 user_created = excluded.user_created, \
                 direction = excluded.direction, \
                 target_type = excluded.target_type, \
                 target_value = excluded.target_value, \
                 base_price = excluded.base_price, \
                 change_pct_threshold = excluded.change_pct_threshold, \
                 change_pct_timeframe = excluded.change_pct_timeframe, \
                 min_daily_volume_quote = excluded.min_daily_volume_quote, \
                 count_enabled = excluded.count_enabled, \
                 count_timeframe = excluded.count_timeframe, \
                 max_triggers_per_candle = excluded.max_triggers_per_candle, \
                 fail_closed_on_candle_error = excluded.fail_closed_on_candle_error, \
                 email = excluded.email, \
                 chat_target = excluded.chat_target, \
                 comment = excluded.comment, \
                 last_triggered_at_ms = excluded.last_triggered_at_ms",
            )
            .bind(alert.alert_id.to_string())
            .bind(alert.owner_id.to_string())
            .bind(&alert.symbol)
            .bind(alert.active as i64)
            .bind(alert.user_created as i64)
            .bind(direction_str(alert.direction))
            .bind(target_type_str(alert.target_type))
            .bind(alert.target_value)
            .bind(alert.base_price)
            .bind(alert.change_pct_threshold)
            .bind(alert.change_pct_timeframe.as_str())
            .bind(alert.min_daily_volume_quote)
            .bind(alert.count_enabled as i64)
            .bind(alert.count_timeframe.as_str())
            .bind(alert.max_triggers_per_candle as i64)
            .bind(alert.fail_closed_on_candle_error as i64)
            .bind(&alert.email)
            .bind(&alert.chat_target)
            .bind(&alert.comment)
            .bind(alert.last_triggered_at_ms)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn remove_alert(&self, alert_id: Uuid) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM alerts WHERE alert_id = ?")
                .bind(alert_id.to_string())
                .execute(&self.pool)
                .await
                .change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn insert_triggered_alert(
        &self,
        triggered: &TriggeredAlert,
        candle_open_time_ms: i64,
        count: u32,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let triggered = triggered.clone();
        Box::pin(async move {
            let notifications = serde_json::to_string(&triggered.notifications_attempted)
                .change_context(StorageError::Insert)?;

            sqlx::query(
                "INSERT INTO triggered_alerts \
                 (trigger_id, alert_id, symbol, triggered_at_ms, price, base_price_used, \
                  base_price_source, pct_change, volume_24h, min_volume_pass, change_pct_pass, \
                  count_pass, notifications_attempted, candle_open_time_ms, count) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(alert_id, candle_open_time_ms, count) DO NOTHING",
            )
            .bind(triggered.trigger_id.to_string())
            .bind(triggered.alert_id.to_string())
            .bind(&triggered.symbol)
            .bind(triggered.triggered_at_ms)
            .bind(triggered.price)
            .bind(triggered.base_price_used)
            .bind(base_price_source_str(triggered.base_price_source))
            .bind(triggered.pct_change)
            .bind(triggered.volume_24h)
            .bind(triggered.conditions.min_volume as i64)
            .bind(triggered.conditions.change_pct as i64)
            .bind(triggered.conditions.count as i64)
            .bind(notifications)
            .bind(candle_open_time_ms)
            .bind(count as i64)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn max_count_for_candle(
        &self,
        alert_id: Uuid,
        candle_open_time_ms: i64,
    ) -> BoxFuture<'_, Result<Option<u32>, Report<StorageError>>> {
        Box::pin(async move {
            let row: Option<(i64,)> = sqlx::query_as(
                "SELECT MAX(count) FROM triggered_alerts \
                 WHERE alert_id = ? AND candle_open_time_ms = ?",
            )
            .bind(alert_id.to_string())
            .bind(candle_open_time_ms)
            .fetch_optional(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(row.map(|(count,)| count as u32))
        })
    }
}

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::Up => "UP",
        Direction::Down => "DOWN",
        Direction::Either => "EITHER",
    }
}

fn parse_direction(value: &str) -> Direction {
    match value {
        "DOWN" => Direction::Down,
        "EITHER" => Direction::Either,
        _ => Direction::Up,
    }
}

fn target_type_str(target_type: TargetType) -> &'static str {
    match target_type {
        TargetType::AbsolutePrice => "ABSOLUTE_PRICE",
        TargetType::PercentChange => "PERCENT_CHANGE",
    }
}

fn parse_target_type(value: &str) -> TargetType {
    match value {
        "ABSOLUTE_PRICE" => TargetType::AbsolutePrice,
        _ => TargetType::PercentChange,
    }
}

fn base_price_source_str(source: BasePriceSource) -> &'static str {
    match source {
        BasePriceSource::CandleOpen => "CANDLE_OPEN",
        BasePriceSource::AlertBaseFallback => "ALERT_BASE_FALLBACK",
    }
}
