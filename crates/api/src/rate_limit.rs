use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Sliding-window request counter keyed by client address.
#[derive(Debug, Clone)]
pub struct IpRateLimiter {
    inner: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    max_requests: usize,
}

impl IpRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_requests,
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut guard = self.inner.lock();
        let queue = guard.entry(key.to_string()).or_default();
        evict_expired(queue, now, self.window);

        if queue.len() >= self.max_requests {
            return false;
        }

        queue.push_back(now);
        true
    }

    /// Forgets clients with no request inside the window.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let before = guard.len();
        guard.retain(|_, queue| {
            evict_expired(queue, now, self.window);
            !queue.is_empty()
        });
        before - guard.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.inner.lock().len()
    }
}

fn evict_expired(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = queue.front() {
        if now.duration_since(*front) > window {
            queue.pop_front();
        } else {
            break;
        }
    }
}
