use derive_more::{Display, Error};

/// Config file load/parse/validate failures. One `Validation` variant per
/// rejected field so `config::validate` can accumulate several before
/// giving up.
#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

/// Exchange stream client failures.
#[derive(Debug, Display, Error)]
pub enum IngestError {
    #[display("failed to connect to {exchange}")]
    Connection { exchange: String },
    #[display("request to {exchange} failed")]
    Request { exchange: String },
    #[display("failed to parse message from {exchange}")]
    MessageParse { exchange: String },
    #[display("rate limit exceeded for {exchange}")]
    #[allow(dead_code)]
    RateLimit { exchange: String },
    #[display("{exchange} rejected subscription for {symbol}")]
    SubscriptionRejected { exchange: String, symbol: String },
}

/// Candle fetcher failures. Callers treat these as "unknown, fall back
/// to the alert's base price" rather than propagating.
#[derive(Debug, Display, Error)]
pub enum CandleError {
    #[display("request to {exchange} failed for {symbol}/{timeframe}")]
    Request {
        exchange: String,
        symbol: String,
        timeframe: String,
    },
    #[display("failed to parse candle response for {symbol}/{timeframe}")]
    ResponseParse { symbol: String, timeframe: String },
    #[display("no candle data returned for {symbol}/{timeframe}")]
    Empty { symbol: String, timeframe: String },
}

/// Condition evaluator failures. Always component-local: an evaluation
/// error skips the one (alert, tick) pair, never the whole symbol.
#[derive(Debug, Display, Error)]
pub enum EvaluatorError {
    #[display("alert {alert_id} has zero or invalid base price")]
    InvalidBasePrice { alert_id: String },
    #[display("tick price {price} is not usable (<= 0)")]
    InvalidTickPrice { price: f64 },
}

/// Trigger recorder failures.
#[derive(Debug, Display, Error)]
pub enum RecorderError {
    #[display("failed to insert triggered alert")]
    Insert,
    #[display("failed to update counter for alert {alert_id}/{timeframe}")]
    CounterUpdate { alert_id: String, timeframe: String },
}

/// Dispatch fabric failures.
#[derive(Debug, Display, Error)]
pub enum DispatchError {
    #[display("failed to publish to shared {topic} channel")]
    Publish { topic: String },
    #[display("failed to subscribe to shared {topic} channel")]
    Subscribe { topic: String },
}

/// Supervisor failures: anything that prevents the dependency-ordered
/// startup sequence from reaching a running state.
#[derive(Debug, Display, Error)]
pub enum SupervisorError {
    #[display("failed to open durable store")]
    Storage,
    #[display("no exchange configured")]
    NoExchange,
    #[display("failed to bind websocket listener")]
    Listen,
}

/// Durable store failures: cold-start rebuild, trigger writes, sync resync.
#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to insert data")]
    Insert,
    #[display("failed to query data")]
    Query,
    #[display("failed to open database at {path}")]
    Open { path: String },
}
