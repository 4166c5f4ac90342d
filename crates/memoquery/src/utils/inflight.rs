use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tracks one running computation for the `queries.inflight` gauge.
///
/// The shared counter is incremented on [`enter`](Self::enter), and decremented again when the
/// guard is dropped, which also happens if the computation is dropped without ever running.
#[derive(Debug)]
pub struct InflightGuard {
    counter: Arc<AtomicU64>,
    cache: Arc<str>,
}

impl InflightGuard {
    pub fn enter(counter: &Arc<AtomicU64>, cache: &Arc<str>) -> Self {
        let current = counter.fetch_add(1, Ordering::Relaxed) + 1;
        metric!(gauge("queries.inflight") = current, "cache" => cache);

        Self {
            counter: Arc::clone(counter),
            cache: Arc::clone(cache),
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let current = self.counter.fetch_sub(1, Ordering::Relaxed) - 1;
        metric!(gauge("queries.inflight") = current, "cache" => &self.cache);
    }
}
