use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::debug;

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_WINDOW_SECONDS: i64 = 60;

type RateLimitMap = HashMap<String, Vec<DateTime<Utc>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after_seconds: u64,
}

/// Sliding-window request counter keyed by client address.
///
/// Clones share the same underlying map, so one limiter can be handed to
/// every request through the application state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    entries: Arc<Mutex<RateLimitMap>>,
    limit: usize,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, Duration::seconds(DEFAULT_WINDOW_SECONDS))
    }
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            limit,
            window,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn check(&self, key: &str) -> Result<(), RateLimited> {
        self.check_at(key, Utc::now()).await
    }

    pub async fn check_at(&self, key: &str, now: DateTime<Utc>) -> Result<(), RateLimited> {
        let window_start = now - self.window;

        let mut entries = self.entries.lock().await;
        let timestamps = entries.entry(key.to_string()).or_default();
        timestamps.retain(|timestamp| *timestamp > window_start);

        if timestamps.len() >= self.limit {
            let reset_at = timestamps
                .iter()
                .min()
                .map(|oldest| *oldest + self.window)
                .unwrap_or(now + self.window);
            let retry_after_seconds = (reset_at - now).num_seconds().max(1) as u64;
            debug!("Rate limit reached for {key}, retry in {retry_after_seconds}s");
            return Err(RateLimited {
                retry_after_seconds,
            });
        }

        timestamps.push(now);
        Ok(())
    }

    /// Drops every key whose requests have all left the window.
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        let window_start = now - self.window;
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, timestamps| {
            timestamps.retain(|timestamp| *timestamp > window_start);
            !timestamps.is_empty()
        });
        before - entries.len()
    }

    pub async fn tracked_keys(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Periodically evicts idle client keys so the map does not grow with every
/// address ever seen.
pub fn spawn_pruner(limiter: RateLimiter) -> JoinHandle<()> {
    let period = limiter
        .window()
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(DEFAULT_WINDOW_SECONDS as u64));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = limiter.prune(Utc::now()).await;
            if removed > 0 {
                debug!("Pruned {removed} idle rate-limit key(s)");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    #[tokio::test]
    async fn eleventh_request_in_window_is_denied() {
        let limiter = RateLimiter::default();

        for second in 0..10 {
            assert_eq!(limiter.check_at("1.2.3.4", at(second)).await, Ok(()));
        }

        let denied = limiter.check_at("1.2.3.4", at(30)).await.unwrap_err();
        assert_eq!(denied.retry_after_seconds, 30);
    }

    #[tokio::test]
    async fn requests_are_allowed_again_after_window() {
        let limiter = RateLimiter::new(2, Duration::seconds(60));

        assert!(limiter.check_at("client", at(0)).await.is_ok());
        assert!(limiter.check_at("client", at(1)).await.is_ok());
        assert!(limiter.check_at("client", at(59)).await.is_err());

        assert!(limiter.check_at("client", at(60)).await.is_ok());
        assert!(limiter.check_at("client", at(61)).await.is_ok());
        assert!(limiter.check_at("client", at(62)).await.is_err());
    }

    #[tokio::test]
    async fn denied_requests_do_not_extend_the_window() {
        let limiter = RateLimiter::new(1, Duration::seconds(10));

        assert!(limiter.check_at("client", at(0)).await.is_ok());
        for second in 1..10 {
            assert!(limiter.check_at("client", at(second)).await.is_err());
        }
        assert!(limiter.check_at("client", at(10)).await.is_ok());
    }

    #[tokio::test]
    async fn clients_are_counted_independently() {
        let limiter = RateLimiter::new(1, Duration::seconds(60));

        assert!(limiter.check_at("a", at(0)).await.is_ok());
        assert!(limiter.check_at("b", at(0)).await.is_ok());
        assert!(limiter.check_at("a", at(1)).await.is_err());
    }

    #[tokio::test]
    async fn keys_accumulate_until_pruned() {
        let limiter = RateLimiter::default();

        for client in 0..50 {
            limiter
                .check_at(&format!("10.0.0.{client}"), at(0))
                .await
                .unwrap();
        }
        limiter.check_at("10.0.1.1", at(50)).await.unwrap();
        assert_eq!(limiter.tracked_keys().await, 51);

        assert_eq!(limiter.prune(at(30)).await, 0);
        assert_eq!(limiter.prune(at(61)).await, 50);
        assert_eq!(limiter.tracked_keys().await, 1);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let limiter = RateLimiter::new(1, Duration::seconds(60));
        let clone = limiter.clone();

        assert!(limiter.check_at("client", at(0)).await.is_ok());
        assert!(clone.check_at("client", at(1)).await.is_err());
    }
}
