use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Timing gate between outbound requests to one upstream source.
///
/// The lock on the last-request timestamp is held across the sleep, so
/// concurrent page fetches on the same adapter instance are serialized and
/// parallelism cannot defeat per-source throttling. Separate adapter
/// instances throttle independently.
pub struct RateLimiter {
    delay: (Duration, Duration),
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            delay: (min_delay, max_delay),
            last_request: Mutex::new(None),
        }
    }

    /// Suspends until a randomly chosen delay has elapsed since the previous
    /// call returned. Updates the timestamp on every call, including the
    /// first.
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        let delay = rand::thread_rng().gen_range(self.delay.0..=self.delay.1);

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < delay {
                tokio::time::sleep(delay - elapsed).await;
            }
        }

        *last = Some(Instant::now());
    }
}
