pub mod log;

use crate::model::{Alert, TriggeredAlert};

/// Sink for alert notifications. Real SMTP/chat wiring is external to this
/// crate; this trait plus `log::LogNotifier` is the only implementation
/// shipped here.
pub trait Notifier: Send + Sync {
    fn kind(&self) -> &'static str;

    fn notify(&self, alert: &Alert, triggered: &TriggeredAlert);
}
