use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::alert_index::AlertIndex;
use crate::bus::Bus;
use crate::cache::PriceCache;
use crate::candle_fetcher::CandleFetcher;
use crate::config::AppConfig;
use crate::counter_store::CounterStore;
use crate::dispatch::{NotificationDispatcher, SessionRegistry};
use crate::error::SupervisorError;
use crate::evaluator::Evaluator;
use crate::exchange::binance::BinanceStream;
use crate::exchange::ExchangeStream;
use crate::notifier::log::LogNotifier;
use crate::notifier::Notifier;
use crate::recorder::Recorder;
use crate::sharedbus::SharedBus;
use crate::stats::Stats;
use crate::storage::sqlite::SqliteStorage;
use crate::storage::Storage;
use crate::sync_bridge::SyncBridge;
use crate::volume_cache::VolumeCache;
use crate::ws_server::WsState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Constructs every component via explicit dependency injection, in
/// dependency order, and owns the shutdown sequence and signal handling.
pub struct Supervisor {
    config: AppConfig,
}

impl Supervisor {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<(), Report<SupervisorError>> {
        let cancel = CancellationToken::new();

        // Price cache + in-process bus.
        let bus = Arc::new(Bus::new(
            self.config.dispatch.prices_buffer,
            self.config.dispatch.alerts_buffer,
        ));
        let cache = Arc::new(PriceCache::new());

        // Exchanges + candle fetcher + volume side-channel.
        let exchanges = build_exchanges(&self.config);
        let primary_exchange = exchanges
            .first()
            .cloned()
            .ok_or_else(|| Report::new(SupervisorError::NoExchange))?;
        let candle_fetcher = Arc::new(CandleFetcher::new(primary_exchange.clone()));
        let volume_cache = Arc::new(VolumeCache::new(primary_exchange.clone()));

        // Alert index + storage + sync bridge.
        let storage: Arc<dyn Storage> = Arc::new(
            SqliteStorage::open(std::path::Path::new(&self.config.store.sqlite_path))
                .await
                .change_context(SupervisorError::Storage)?,
        );
        let alert_index = Arc::new(AlertIndex::new());
        let sync_bridge = Arc::new(SyncBridge::new(storage.clone(), alert_index.clone()));
        sync_bridge.resync().await;

        // Counter store, recorder, evaluator.
        let counter_store = Arc::new(CounterStore::new());
        let stats = Arc::new(Stats::new());
        let recorder = Arc::new(Recorder::new(storage.clone(), counter_store.clone(), stats.clone()));
        let evaluator = Arc::new(Evaluator::new(
            cache.clone(),
            alert_index.clone(),
            candle_fetcher.clone(),
            counter_store.clone(),
            recorder.clone(),
            bus.clone(),
            stats.clone(),
            volume_cache.clone(),
        ));

        // Session registry, notifiers, WS server.
        let sessions = Arc::new(SessionRegistry::new());
        let notifiers = build_notifiers(&self.config);
        let dispatcher = Arc::new(NotificationDispatcher::new(storage.clone(), notifiers, stats.clone()));

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn({
            let dispatcher = dispatcher.clone();
            let rx = bus.subscribe_alerts();
            async move { dispatcher.run(rx).await }
        }));

        let ws_state = WsState {
            bus: bus.clone(),
            sessions: sessions.clone(),
        };
        let app = crate::ws_server::router(ws_state);
        let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
            .await
            .change_context(SupervisorError::Listen)?;
        tasks.push(tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let _ = axum::serve(listener, app)
                    .with_graceful_shutdown(cancel.cancelled_owned())
                    .await;
            }
        }));

        // Shared-bus alert-updates subscriber feeding the sync bridge.
        if let Ok(shared_bus) = SharedBus::connect(&self.config.store.redis_url).await {
            let (tx, rx) = mpsc::channel(256);
            let shared_bus = Arc::new(shared_bus);
            tasks.push(tokio::spawn({
                let shared_bus = shared_bus.clone();
                async move {
                    if let Err(err) = shared_bus.subscribe_alert_updates(tx).await {
                        warn!(error = ?err, "alert-updates subscription ended");
                    }
                }
            }));
            tasks.push(tokio::spawn({
                let sync_bridge = sync_bridge.clone();
                async move { sync_bridge.run(rx).await }
            }));
        } else {
            warn!("shared bus unavailable, running without cross-process alert-updates");
        }

        // Per-exchange tick ingestion feeding the cache and the evaluator.
        for exchange in &exchanges {
            let symbols: Vec<String> = self.config.symbols.iter().filter(|s| s.active).map(|s| s.symbol.clone()).collect();
            let max_streams = self
                .config
                .exchanges
                .iter()
                .find(|e| e.name == exchange.name())
                .map(|e| e.max_streams_per_connection)
                .unwrap_or(200);

            let (tx, mut rx) = mpsc::channel(1024);
            let exchange = exchange.clone();
            let cancel_ingest = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = exchange
                    .subscribe_ticks(&symbols, max_streams, tx, cancel_ingest)
                    .await
                {
                    warn!(error = ?err, "exchange tick subscription ended");
                }
            }));

            tasks.push(tokio::spawn({
                let cache = cache.clone();
                let bus = bus.clone();
                let evaluator = evaluator.clone();
                async move {
                    while let Some(tick) = rx.recv().await {
                        crate::cache::put_and_publish(&cache, &bus, tick.clone());
                        evaluator.on_tick(tick).await;
                    }
                }
            }));
        }

        // Periodic stats snapshot.
        tasks.push(tokio::spawn({
            let stats = stats.clone();
            let cancel = cancel.clone();
            async move {
                let mut interval = tokio::time::interval(STATS_LOG_INTERVAL);
                loop {
                    tokio::select! {
                        _ = interval.tick() => stats.log_snapshot(),
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }));

        self.wait_for_shutdown_signal(&cancel, &sync_bridge).await;

        for task in tasks {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
        }

        Ok(())
    }

    async fn wait_for_shutdown_signal(&self, cancel: &CancellationToken, sync_bridge: &Arc<SyncBridge>) {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT, shutting down");
                    cancel.cancel();
                    break;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    cancel.cancel();
                    break;
                }
                _ = sighup.recv() => {
                    info!("received SIGHUP, triggering alert index resync");
                    sync_bridge.resync().await;
                }
            }
        }
    }
}

fn build_exchanges(config: &AppConfig) -> Vec<Arc<dyn ExchangeStream>> {
    let mut exchanges: Vec<Arc<dyn ExchangeStream>> = Vec::new();
    for exchange_config in &config.exchanges {
        if !exchange_config.enabled {
            continue;
        }
        match exchange_config.name.as_str() {
            "binance" => exchanges.push(Arc::new(BinanceStream::new())),
            other => warn!(exchange = other, "unknown exchange in config, skipping"),
        }
    }
    if exchanges.is_empty() {
        exchanges.push(Arc::new(BinanceStream::new()));
    }
    exchanges
}

fn build_notifiers(config: &AppConfig) -> Vec<Arc<dyn Notifier>> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    for notifier_config in &config.notifiers {
        if notifier_config.kind == "log" {
            notifiers.push(Arc::new(LogNotifier));
        }
    }
    if notifiers.is_empty() {
        notifiers.push(Arc::new(LogNotifier));
    }
    notifiers
}
