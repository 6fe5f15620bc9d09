use crate::model::{Alert, TriggeredAlert};
use crate::notifier::Notifier;

/// Logging/no-op notifier, the only delivery adapter this crate implements.
/// `email`/`chat` targets named in `NotifierConfig` are expected to be wired
/// externally.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn kind(&self) -> &'static str {
        "log"
    }

    fn notify(&self, alert: &Alert, triggered: &TriggeredAlert) {
        tracing::warn!(
            alert_id = %alert.alert_id,
            symbol = %triggered.symbol,
            direction = ?alert.direction,
            price = triggered.price,
            pct_change = triggered.pct_change,
            base_price = triggered.base_price_used,
            "ALERT: {} crossed threshold ({:+.2}%)",
            triggered.symbol,
            triggered.pct_change,
        );
    }
}
