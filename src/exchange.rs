pub mod binance;

use error_stack::Report;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::IngestError;
use crate::model::{Candle, PriceTick, Timeframe};

/// Abstraction over an upstream exchange's market-data surface: tick
/// streaming, historical candles, and 24h volume lookups.
///
/// Uses `BoxFuture` (from `futures`) instead of `async fn` in trait so the
/// trait stays object-safe (`dyn ExchangeStream`).
pub trait ExchangeStream: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch candles via REST, most recent `limit` bars, newest last.
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<IngestError>>>;

    /// Fetch the 24h ticker side-channel used as a volume fallback (Gate A).
    fn fetch_24h_volume(&self, symbol: &str) -> BoxFuture<'_, Result<f64, Report<IngestError>>>;

    /// Subscribe to real-time ticker updates for `symbols`, sharded across
    /// connections per `max_streams_per_connection`. Sends `PriceTick`
    /// values into `tx` until `cancel` fires. Reconnects internally on
    /// error; only returns when cancelled or unrecoverable.
    fn subscribe_ticks(
        &self,
        symbols: &[String],
        max_streams_per_connection: usize,
        tx: mpsc::Sender<PriceTick>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<IngestError>>>;
}
