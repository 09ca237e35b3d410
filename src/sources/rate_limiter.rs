use std::time::Duration;
use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

/// Process-wide minimum-interval gate in front of every extraction call.
///
/// One caller passes per window. The tokio mutex is fair, so waiters go
/// through in arrival order; it stays held while sleeping so the next
/// caller measures its window from this one's release.
#[derive(Debug)]
pub struct RateLimiter {
    delay: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;

        if let Some(prev) = *last {
            let ready_at = prev + self.delay;
            if Instant::now() < ready_at {
                debug!(
                    "⏳ Rate limiter: waiting {}ms",
                    (ready_at - Instant::now()).as_millis()
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_millis(300));
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquires_are_spaced_across_tasks() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(300)));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();

        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_quiet_period() {
        let limiter = RateLimiter::new(Duration::from_millis(300));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(1)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
