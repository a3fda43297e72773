use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global runtime metrics for both roles.
///
/// Purpose:
/// - Track worker connections on the mothership
/// - Track decode / timeout failures per connection
/// - Track worker crawl and delivery throughput
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Mothership: connections
    pub connections_accepted: AtomicUsize,
    pub connections_active: AtomicUsize,

    // Mothership: traffic
    pub messages_decoded: AtomicUsize,
    pub protocol_errors: AtomicUsize,
    pub idle_timeouts: AtomicUsize,

    // Worker: crawl
    pub pages_fetched: AtomicUsize,
    pub fetch_failures: AtomicUsize,
    pub records_extracted: AtomicUsize,

    // Worker: delivery
    pub messages_sent: AtomicUsize,
    pub send_errors: AtomicUsize,
}

impl RuntimeMetrics {
    /// One-line summary for periodic logging.
    pub fn summary(&self) -> String {
        format!(
            "conn={}/{} decoded={} proto_err={} idle={} pages={} fetch_err={} records={} sent={} send_err={}",
            self.connections_active.load(Ordering::Relaxed),
            self.connections_accepted.load(Ordering::Relaxed),
            self.messages_decoded.load(Ordering::Relaxed),
            self.protocol_errors.load(Ordering::Relaxed),
            self.idle_timeouts.load(Ordering::Relaxed),
            self.pages_fetched.load(Ordering::Relaxed),
            self.fetch_failures.load(Ordering::Relaxed),
            self.records_extracted.load(Ordering::Relaxed),
            self.messages_sent.load(Ordering::Relaxed),
            self.send_errors.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));

/// Increment a counter by one.
pub(crate) fn incr(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}
