use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::exchange::ExchangeStream;
use crate::model::{Candle, PriceTick, Timeframe};
use crate::retry::RetryPolicy;

const BINANCE_BASE_URL: &str = "https://api.binance.com";
const BINANCE_WS_BASE: &str = "wss://stream.binance.com:9443/stream";
const MAX_CANDLES_PER_REQUEST: usize = 1000;
const HEARTBEAT_IDLE_SECS: u64 = 30;
const HEARTBEAT_GRACE_SECS: u64 = 30;
/// Binance kline endpoint costs weight 2; limit ~2500 req/min (5000 weight/min)
/// = ~40 req/s. Use 20 for safety margin.
const BINANCE_REQUESTS_PER_SECOND: u32 = 20;

pub struct BinanceStream {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    reconnect_policy: RetryPolicy,
}

impl BinanceStream {
    pub fn new() -> Self {
        let quota = Quota::per_second(NonZeroU32::new(BINANCE_REQUESTS_PER_SECOND).unwrap());
        Self {
            client: reqwest::Client::new(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            reconnect_policy: RetryPolicy::exchange_reconnect(),
        }
    }
}

impl Default for BinanceStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic shard assignment: symbols with the same shard index share a
/// single WS connection, via `hash(symbol) mod N`.
fn shard_symbols(symbols: &[String], max_per_connection: usize) -> Vec<Vec<String>> {
    let shard_count = symbols.len().div_ceil(max_per_connection.max(1)).max(1);
    let mut shards: Vec<Vec<String>> = vec![Vec::new(); shard_count];
    for symbol in symbols {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % shard_count;
        shards[idx].push(symbol.clone());
    }
    shards.into_iter().filter(|s| !s.is_empty()).collect()
}

impl ExchangeStream for BinanceStream {
    fn name(&self) -> &'static str {
        "binance"
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<IngestError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let url = format!("{BINANCE_BASE_URL}/api/v3/klines");
            let interval = timeframe.binance_interval();
            let fetch_limit = limit.min(MAX_CANDLES_PER_REQUEST);
            let limit_str = fetch_limit.to_string();
            let params = [
                ("symbol", symbol.as_str()),
                ("interval", interval),
                ("limit", limit_str.as_str()),
            ];

            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .change_context(IngestError::Request {
                    exchange: "binance".into(),
                })?;

            if !response.status().is_success() {
                return Err(Report::new(IngestError::Request {
                    exchange: "binance".into(),
                })
                .attach(format!("HTTP status: {}", response.status())));
            }

            let raw: Vec<BinanceKlineRow> =
                response
                    .json()
                    .await
                    .change_context(IngestError::MessageParse {
                        exchange: "binance".into(),
                    })?;

            info!(
                symbol = %symbol,
                timeframe = %timeframe,
                fetched = raw.len(),
                "binance candle fetch complete"
            );

            raw.into_iter()
                .map(|row| row.into_candle(&symbol, timeframe))
                .collect()
        })
    }

    fn fetch_24h_volume(&self, symbol: &str) -> BoxFuture<'_, Result<f64, Report<IngestError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let url = format!("{BINANCE_BASE_URL}/api/v3/ticker/24hr");
            let response = self
                .client
                .get(&url)
                .query(&[("symbol", symbol.as_str())])
                .send()
                .await
                .change_context(IngestError::Request {
                    exchange: "binance".into(),
                })?;

            if !response.status().is_success() {
                return Err(Report::new(IngestError::Request {
                    exchange: "binance".into(),
                })
                .attach(format!("HTTP status: {}", response.status())));
            }

            let body: Binance24hTicker =
                response
                    .json()
                    .await
                    .change_context(IngestError::MessageParse {
                        exchange: "binance".into(),
                    })?;

            body.quote_volume
                .parse::<f64>()
                .change_context(IngestError::MessageParse {
                    exchange: "binance".into(),
                })
        })
    }

    fn subscribe_ticks(
        &self,
        symbols: &[String],
        max_streams_per_connection: usize,
        tx: mpsc::Sender<PriceTick>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<IngestError>>> {
        let symbols = symbols.to_vec();
        Box::pin(async move {
            let shards = shard_symbols(&symbols, max_streams_per_connection);
            let mut handles = Vec::new();

            for shard in shards {
                let tx = tx.clone();
                let cancel = cancel.clone();
                let policy = self.reconnect_policy;
                handles.push(tokio::spawn(async move {
                    run_shard_with_reconnect(shard, tx, cancel, policy).await
                }));
            }

            for handle in handles {
                let _ = handle.await;
            }
            Ok(())
        })
    }
}

async fn run_shard_with_reconnect(
    shard: Vec<String>,
    tx: mpsc::Sender<PriceTick>,
    cancel: CancellationToken,
    policy: RetryPolicy,
) {
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match run_ticker_ws(&shard, &tx, &cancel).await {
            Ok(()) => break,
            Err(e) => {
                warn!(error = %e, symbols = ?shard, "binance ticker ws disconnected, retrying");
                sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

async fn run_ticker_ws(
    symbols: &[String],
    tx: &mpsc::Sender<PriceTick>,
    cancel: &CancellationToken,
) -> Result<(), Report<IngestError>> {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@ticker", s.to_lowercase()))
        .collect();
    let ws_url = format!("{BINANCE_WS_BASE}?streams={}", streams.join("/"));

    let (ws_stream, _) =
        connect_async(&ws_url)
            .await
            .change_context(IngestError::Connection {
                exchange: "binance".into(),
            })?;

    let (mut write, mut read) = ws_stream.split();
    info!(symbols = ?symbols, "binance ticker ws connected");

    let mut last_activity = Instant::now();
    let mut ping_sent = false;
    let mut heartbeat = interval(Duration::from_secs(5));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("binance ticker ws cancelled");
                break;
            }
            _ = heartbeat.tick() => {
                let idle = last_activity.elapsed();
                if idle >= Duration::from_secs(HEARTBEAT_IDLE_SECS + HEARTBEAT_GRACE_SECS) {
                    return Err(Report::new(IngestError::Connection {
                        exchange: "binance (heartbeat timeout)".into(),
                    }));
                }
                if idle >= Duration::from_secs(HEARTBEAT_IDLE_SECS) && !ping_sent {
                    let _ = write.send(Message::Ping(Vec::new().into())).await;
                    ping_sent = true;
                }
            }
            msg = read.next() => {
                match msg {
                    None => break,
                    Some(Err(e)) => return Err(Report::new(e)
                        .change_context(IngestError::Connection {
                            exchange: "binance".into(),
                        })),
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        ping_sent = false;
                        match serde_json::from_str::<BinanceCombinedMsg<BinanceTickerData>>(&text) {
                            Ok(combined) => {
                                let _ = tx.send(combined.data.into_tick()).await;
                            }
                            Err(e) => {
                                warn!(error = %e, raw = %text, "binance ticker parse error");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_activity = Instant::now();
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                        ping_sent = false;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    Ok(())
}

// ── REST response types ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BinanceKlineRow(
    i64,                        // 0: open_time (ms)
    String,                     // 1: open
    String,                     // 2: high
    String,                     // 3: low
    String,                     // 4: close
    String,                     // 5: volume
    i64,                        // 6: close_time (ms)
    #[allow(dead_code)] String, // 7: quote asset volume
    #[allow(dead_code)] i64,    // 8: number of trades
    #[allow(dead_code)] String, // 9: taker buy base volume
    #[allow(dead_code)] String, // 10: taker buy quote volume
    #[allow(dead_code)] String, // 11: ignore
);

impl BinanceKlineRow {
    fn into_candle(
        self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Candle, Report<IngestError>> {
        let parse_f64 = |s: &str| -> Result<f64, Report<IngestError>> {
            s.parse::<f64>().change_context(IngestError::MessageParse {
                exchange: "binance".into(),
            })
        };

        Ok(Candle {
            symbol: symbol.to_owned(),
            timeframe,
            open_time_ms: self.0,
            close_time_ms: self.6,
            open: parse_f64(&self.1)?,
            high: parse_f64(&self.2)?,
            low: parse_f64(&self.3)?,
            close: parse_f64(&self.4)?,
            volume: parse_f64(&self.5)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Binance24hTicker {
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
}

// ── WebSocket message types ──────────────────────────────────────────────────

/// Combined stream wrapper: `{ "stream": "...", "data": { ... } }`
#[derive(Debug, Deserialize)]
struct BinanceCombinedMsg<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct BinanceTickerData {
    #[serde(rename = "s")]
    symbol: String,
    /// Last price
    #[serde(rename = "c")]
    price: String,
    /// Quote asset volume over the statistics window (24h).
    #[serde(rename = "q")]
    quote_volume: String,
    /// Price change percent over the statistics window.
    #[serde(rename = "P")]
    price_change_pct: String,
    /// Event time (ms epoch).
    #[serde(rename = "E")]
    event_time_ms: i64,
}

impl BinanceTickerData {
    fn into_tick(self) -> PriceTick {
        let price = self.price.parse::<f64>().unwrap_or(0.0);
        let volume_24h = self.quote_volume.parse::<f64>().ok();
        let price_change_pct_24h = self.price_change_pct.parse::<f64>().ok();

        PriceTick {
            symbol: self.symbol,
            price,
            event_time_ms: self.event_time_ms,
            volume_24h,
            price_change_pct_24h,
        }
    }
}
