pub mod sqlite;

use error_stack::Report;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::error::StorageError;
use crate::model::{Alert, TriggeredAlert};

/// Durable store surface: `alerts` (owned by the external admin API, read
/// here for cold-start index rebuilds) and `triggered_alerts` (owned by
/// this crate, append-only).
pub trait Storage: Send + Sync {
    fn list_active_alerts(&self) -> BoxFuture<'_, Result<Vec<Alert>, Report<StorageError>>>;

    fn get_alert(&self, alert_id: Uuid) -> BoxFuture<'_, Result<Option<Alert>, Report<StorageError>>>;

    fn upsert_alert(&self, alert: &Alert) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn remove_alert(&self, alert_id: Uuid) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Insert one `TriggeredAlert`. Idempotent on the `(alertId,
    /// candleOpenTimeMs, count)` uniqueness key: a duplicate insert is
    /// treated as success, not an error.
    fn insert_triggered_alert(
        &self,
        triggered: &TriggeredAlert,
        candle_open_time_ms: i64,
        count: u32,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Read back the max `count` recorded for `(alertId, timeframe)` at the
    /// given candle, used to reconcile the in-memory `CounterStore` after a
    /// restart.
    fn max_count_for_candle(
        &self,
        alert_id: Uuid,
        candle_open_time_ms: i64,
    ) -> BoxFuture<'_, Result<Option<u32>, Report<StorageError>>>;
}
