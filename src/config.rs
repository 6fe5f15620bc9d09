use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::Timeframe;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_true() -> bool {
    true
}

fn default_evaluator_workers() -> usize {
    8
}

fn default_writer_workers() -> usize {
    2
}

fn default_max_streams_per_connection() -> usize {
    200
}

fn default_prices_buffer() -> usize {
    1000
}

fn default_alerts_buffer() -> usize {
    1024
}

fn default_sqlite_path() -> String {
    "./data/alerts.db".into()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    pub symbols: Vec<SymbolConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub notifiers: Vec<NotifierConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_evaluator_workers")]
    pub evaluator_workers: usize,
    #[serde(default = "default_writer_workers")]
    pub writer_workers: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            data_dir: default_data_dir(),
            evaluator_workers: default_evaluator_workers(),
            writer_workers: default_writer_workers(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub base_url: String,
    pub ws_url: String,
    #[serde(default = "default_max_streams_per_connection")]
    pub max_streams_per_connection: usize,
}

#[derive(Debug, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub timeframes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            redis_url: default_redis_url(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_prices_buffer")]
    pub prices_buffer: usize,
    #[serde(default = "default_alerts_buffer")]
    pub alerts_buffer: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            prices_buffer: default_prices_buffer(),
            alerts_buffer: default_alerts_buffer(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotifierConfig {
    pub kind: String,
    pub target: Option<String>,
}

pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;
    Ok(config)
}

const VALID_NOTIFIER_KINDS: &[&str] = &["log", "email", "chat"];

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_timeframes(config)?;
    validate_symbols_unique(config)?;
    validate_exchange_names_unique(config)?;
    validate_notifier_kinds(config)?;
    validate_buffers(config)?;
    Ok(())
}

fn validate_timeframes(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    for symbol in &config.symbols {
        for tf in &symbol.timeframes {
            if Timeframe::from_str(tf).is_none() {
                return Err(Report::new(ConfigError::Validation {
                    field: format!(
                        "symbols[symbol={}].timeframes: unknown timeframe \"{}\"",
                        symbol.symbol, tf
                    ),
                }));
            }
        }
    }
    Ok(())
}

fn validate_symbols_unique(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let mut seen = HashSet::new();
    for symbol in &config.symbols {
        if !seen.insert(symbol.symbol.as_str()) {
            return Err(Report::new(ConfigError::Validation {
                field: format!("symbols: duplicate symbol \"{}\"", symbol.symbol),
            }));
        }
    }
    Ok(())
}

fn validate_exchange_names_unique(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let mut seen = HashSet::new();
    for exchange in &config.exchanges {
        if !seen.insert(exchange.name.as_str()) {
            return Err(Report::new(ConfigError::Validation {
                field: format!("exchanges: duplicate name \"{}\"", exchange.name),
            }));
        }
    }
    Ok(())
}

fn validate_notifier_kinds(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    for notifier in &config.notifiers {
        if !VALID_NOTIFIER_KINDS.contains(&notifier.kind.as_str()) {
            return Err(Report::new(ConfigError::Validation {
                field: format!("notifiers: unknown kind \"{}\"", notifier.kind),
            }));
        }
        if notifier.kind != "log" && notifier.target.is_none() {
            return Err(Report::new(ConfigError::Validation {
                field: format!("notifiers[kind={}].target is required", notifier.kind),
            }));
        }
    }
    Ok(())
}

fn validate_buffers(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.dispatch.prices_buffer == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "dispatch.prices_buffer must be > 0".into(),
        }));
    }
    if config.dispatch.alerts_buffer == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "dispatch.alerts_buffer must be > 0".into(),
        }));
    }
    Ok(())
}

/// Durable-write retry policy derived from config.
pub fn durable_write_retry(_config: &AppConfig) -> crate::retry::RetryPolicy {
    crate::retry::RetryPolicy {
        base: Duration::from_millis(200),
        cap: Duration::from_secs(5),
        jitter_pct: 0.1,
        max_attempts: Some(3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        toml::from_str(toml).expect("parse failed")
    }

    #[test]
    fn defaults_applied_when_sections_omitted() {
        let config = parse("");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "text");
        assert_eq!(config.general.data_dir, "./data");
        assert_eq!(config.general.evaluator_workers, 8);
        assert_eq!(config.store.sqlite_path, "./data/alerts.db");
        assert_eq!(config.dispatch.prices_buffer, 1000);
        assert_eq!(config.dispatch.alerts_buffer, 1024);
        assert!(config.exchanges.is_empty());
        assert!(config.symbols.is_empty());
        assert!(config.notifiers.is_empty());
    }

    #[test]
    fn invalid_timeframe_string_rejected() {
        let toml = r#"
[[symbols]]
symbol = "BTCUSDT"
timeframes = ["2m"]
"#;
        let config = parse(toml);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn duplicate_symbol_rejected() {
        let toml = r#"
[[symbols]]
symbol = "BTCUSDT"
timeframes = ["1m"]

[[symbols]]
symbol = "BTCUSDT"
timeframes = ["5m"]
"#;
        let config = parse(toml);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn duplicate_exchange_name_rejected() {
        let toml = r#"
[[exchanges]]
name = "binance"
base_url = "https://api.binance.com"
ws_url = "wss://stream.binance.com:9443"

[[exchanges]]
name = "binance"
base_url = "https://api.binance.com"
ws_url = "wss://stream.binance.com:9443"
"#;
        let config = parse(toml);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn unknown_notifier_kind_rejected() {
        let toml = r#"
[[notifiers]]
kind = "webhook"
"#;
        let config = parse(toml);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn non_log_notifier_requires_target() {
        let toml = r#"
[[notifiers]]
kind = "email"
"#;
        let config = parse(toml);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn log_notifier_needs_no_target() {
        let toml = r#"
[[notifiers]]
kind = "log"
"#;
        let config = parse(toml);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn zero_prices_buffer_rejected() {
        let toml = r#"
[dispatch]
prices_buffer = 0
"#;
        let config = parse(toml);
        assert!(validate(&config).is_err());
    }
}
