use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window limiter for question submissions, keyed by student id.
///
/// Shared between request handlers, so the window state sits behind a mutex and
/// `check` takes `&self`.
pub struct RateLimiter {
    requests: Mutex<HashMap<String, Vec<Instant>>>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    /// Allows `limit` submissions per `window` for every key.
    pub fn new(limit: usize, window: Duration) -> Self {
        RateLimiter {
            requests: Mutex::new(HashMap::new()),
            limit,
            window,
        }
    }

    /// Records a submission for `id` and returns whether it is within the limit.
    ///
    /// A limit of zero disables limiting.
    pub fn check(&self, id: &str) -> bool {
        if self.limit == 0 {
            return true;
        }

        let now = Instant::now();
        let mut requests = match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let client_requests = requests.entry(id.to_string()).or_default();
        client_requests.retain(|&timestamp| now.duration_since(timestamp) < self.window);

        if client_requests.len() < self.limit {
            client_requests.push(now);
            true
        } else {
            false
        }
    }

    /// Drops keys with no submission inside the current window.
    pub fn prune(&self) {
        let now = Instant::now();
        if let Ok(mut requests) = self.requests.lock() {
            requests.retain(|_, stamps| {
                stamps
                    .last()
                    .is_some_and(|last| now.duration_since(*last) < self.window)
            });
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}
