use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// A single named counter. `Relaxed` ordering is enough here: these are
/// monitoring counters, not synchronization points.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set(&self, n: u64) {
        self.0.store(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Process-wide counters, logged periodically by the supervisor.
#[derive(Debug, Default)]
pub struct Stats {
    pub price_updates_received: Counter,
    pub alerts_evaluated: Counter,
    pub gates_failed_a: Counter,
    pub gates_failed_b: Counter,
    pub gates_failed_c: Counter,
    pub alerts_triggered: Counter,
    pub notifications_sent: Counter,
    pub notifications_failed: Counter,
    pub candle_fetch_failures: Counter,
    pub malformed_messages_dropped: Counter,
    pub dropped_triggers: Counter,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit one structured log line with a snapshot of every counter.
    pub fn log_snapshot(&self) {
        info!(
            price_updates_received = self.price_updates_received.get(),
            alerts_evaluated = self.alerts_evaluated.get(),
            gates_failed_a = self.gates_failed_a.get(),
            gates_failed_b = self.gates_failed_b.get(),
            gates_failed_c = self.gates_failed_c.get(),
            alerts_triggered = self.alerts_triggered.get(),
            notifications_sent = self.notifications_sent.get(),
            notifications_failed = self.notifications_failed.get(),
            candle_fetch_failures = self.candle_fetch_failures.get(),
            malformed_messages_dropped = self.malformed_messages_dropped.get(),
            dropped_triggers = self.dropped_triggers.get(),
            "stats snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_starts_at_zero() {
        let c = Counter::default();
        assert_eq!(c.get(), 0);
    }

    #[test]
    fn counter_increments() {
        let c = Counter::default();
        c.inc();
        c.inc();
        assert_eq!(c.get(), 2);
    }

    #[test]
    fn counter_add_accumulates() {
        let c = Counter::default();
        c.add(5);
        c.add(3);
        assert_eq!(c.get(), 8);
    }

    #[test]
    fn stats_counters_are_independent() {
        let stats = Stats::new();
        stats.alerts_evaluated.inc();
        stats.gates_failed_a.inc();
        stats.gates_failed_a.inc();

        assert_eq!(stats.alerts_evaluated.get(), 1);
        assert_eq!(stats.gates_failed_a.get(), 2);
        assert_eq!(stats.gates_failed_b.get(), 0);
    }
}
