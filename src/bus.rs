use tokio::sync::broadcast;

use crate::model::{PriceTick, TriggeredAlert};

/// In-process fan-out for the `prices` and `alerts` topics.
///
/// Each topic is a `tokio::sync::broadcast` channel: publishers never
/// block, slow subscribers fall behind and see `Lagged` rather than
/// stalling the publisher.
pub struct Bus {
    prices: broadcast::Sender<PriceTick>,
    alerts: broadcast::Sender<TriggeredAlert>,
}

impl Bus {
    pub fn new(prices_buffer: usize, alerts_buffer: usize) -> Self {
        let (prices, _) = broadcast::channel(prices_buffer);
        let (alerts, _) = broadcast::channel(alerts_buffer);
        Self { prices, alerts }
    }

    /// Publish a tick. Returns the number of receivers it was delivered to;
    /// `0` just means nobody is currently subscribed, not an error.
    pub fn publish_price(&self, tick: PriceTick) -> usize {
        self.prices.send(tick).unwrap_or(0)
    }

    pub fn subscribe_prices(&self) -> broadcast::Receiver<PriceTick> {
        self.prices.subscribe()
    }

    pub fn publish_alert(&self, alert: TriggeredAlert) -> usize {
        self.alerts.send(alert).unwrap_or(0)
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<TriggeredAlert> {
        self.alerts.subscribe()
    }
}
