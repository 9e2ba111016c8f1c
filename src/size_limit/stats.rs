use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter shared by every request of one guard configuration.
///
/// Increments go to the `metrics` facade under `name` and to a local atomic
/// total that can be read back with [`RejectionCounter::value`].
#[derive(Clone)]
pub struct RejectionCounter {
    name: Arc<str>,
    total: Arc<AtomicU64>,
    sink: metrics::Counter,
}

impl RejectionCounter {
    /// Registers the counter with whatever `metrics` recorder is installed.
    pub fn register(name: String) -> Self {
        let sink = metrics::counter!(name.clone());
        Self {
            name: name.into(),
            total: Arc::new(AtomicU64::new(0)),
            sink,
        }
    }

    pub fn increment(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.sink.increment(1);
    }

    pub fn value(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for RejectionCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectionCounter")
            .field("name", &self.name)
            .field("value", &self.value())
            .finish()
    }
}

/// Stats emitted by the size guard.
#[derive(Debug, Clone)]
pub struct SizeGuardStats {
    /// Requests rejected for exceeding their size limit.
    pub rq_timeout: RejectionCounter,
}

impl SizeGuardStats {
    pub fn generate(prefix: &str) -> Self {
        Self {
            rq_timeout: RejectionCounter::register(format!("{prefix}header_size.rq_timeout")),
        }
    }
}
