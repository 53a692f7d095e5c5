//! Per-IP token bucket.
//!
//! Throttling happens before routing, so it treats live and dead links the
//! same way.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tokio::sync::Mutex;

use crate::{ApiError, AppState};

/// Buckets idle this long are dropped by [`RateLimiter::cleanup`].
const IDLE_BUCKET_TTL: Duration = Duration::from_secs(300);

/// Longest `Retry-After` ever advertised.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

pub struct RateLimiter {
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
    refill_per_sec: f64,
    capacity: f64,
}

struct Bucket {
    tokens: f64,
    updated: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.updated).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.updated = now;
    }
}

impl RateLimiter {
    pub fn new(rps: f64, burst: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            refill_per_sec: rps.max(0.0),
            capacity: f64::from(burst),
        }
    }

    pub async fn check(&self, ip: IpAddr) -> RateDecision {
        self.check_at(ip, Instant::now()).await
    }

    /// Take one token for `ip` as of `now`.
    pub async fn check_at(&self, ip: IpAddr, now: Instant) -> RateDecision {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(ip).or_insert(Bucket {
            tokens: self.capacity,
            updated: now,
        });
        bucket.refill(now, self.refill_per_sec, self.capacity);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return RateDecision::Allowed;
        }
        RateDecision::Limited {
            retry_after: self.time_to_next_token(bucket.tokens),
        }
    }

    fn time_to_next_token(&self, tokens: f64) -> Duration {
        if self.refill_per_sec <= 0.0 {
            return MAX_RETRY_AFTER;
        }
        let secs = ((1.0 - tokens) / self.refill_per_sec).ceil().max(1.0);
        Duration::from_secs_f64(secs).min(MAX_RETRY_AFTER)
    }

    pub async fn cleanup(&self) {
        self.cleanup_at(Instant::now()).await
    }

    pub async fn cleanup_at(&self, now: Instant) {
        self.buckets
            .lock()
            .await
            .retain(|_, b| now.saturating_duration_since(b.updated) < IDLE_BUCKET_TTL);
    }

    pub async fn tracked(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    match state.rate_limiter.check(addr.ip()).await {
        RateDecision::Allowed => next.run(req).await,
        RateDecision::Limited { retry_after } => {
            tracing::warn!(ip = %addr.ip(), method = %req.method(), "rate limit exceeded");
            let retry_after = HeaderValue::from(retry_after.as_secs());
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after)],
                Json(ApiError::new("rate limit exceeded")),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn burst_then_throttle() {
        let limiter = RateLimiter::new(0.0, 3);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at(ip("10.0.0.1"), now).await.is_allowed());
        }
        assert_eq!(
            limiter.check_at(ip("10.0.0.1"), now).await,
            RateDecision::Limited {
                retry_after: MAX_RETRY_AFTER
            }
        );

        // other clients have their own bucket
        assert!(limiter.check_at(ip("10.0.0.2"), now).await.is_allowed());
        assert_eq!(limiter.tracked().await, 2);
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(2.0, 2);
        let start = Instant::now();
        let client = ip("10.0.0.1");
        assert!(limiter.check_at(client, start).await.is_allowed());
        assert!(limiter.check_at(client, start).await.is_allowed());
        assert!(!limiter.check_at(client, start).await.is_allowed());

        // half a second at 2 rps buys exactly one token
        let later = start + Duration::from_millis(500);
        assert!(limiter.check_at(client, later).await.is_allowed());
        assert!(!limiter.check_at(client, later).await.is_allowed());

        // a long idle period never overfills the bucket
        let much_later = start + Duration::from_secs(3600);
        for _ in 0..2 {
            assert!(limiter.check_at(client, much_later).await.is_allowed());
        }
        assert!(!limiter.check_at(client, much_later).await.is_allowed());
    }

    #[tokio::test]
    async fn retry_after_tracks_refill_rate() {
        let limiter = RateLimiter::new(0.25, 1);
        let now = Instant::now();
        assert!(limiter.check_at(ip("10.0.0.1"), now).await.is_allowed());
        assert_eq!(
            limiter.check_at(ip("10.0.0.1"), now).await,
            RateDecision::Limited {
                retry_after: Duration::from_secs(4)
            }
        );

        let fast = RateLimiter::new(50.0, 1);
        fast.check_at(ip("10.0.0.1"), now).await;
        assert_eq!(
            fast.check_at(ip("10.0.0.1"), now).await,
            RateDecision::Limited {
                retry_after: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test]
    async fn cleanup_drops_only_idle_buckets() {
        let limiter = RateLimiter::new(1.0, 1);
        let start = Instant::now();
        limiter.check_at(ip("10.0.0.1"), start).await;
        limiter
            .check_at(ip("10.0.0.2"), start + Duration::from_secs(200))
            .await;

        limiter.cleanup_at(start + Duration::from_secs(250)).await;
        assert_eq!(limiter.tracked().await, 2);

        limiter.cleanup_at(start + IDLE_BUCKET_TTL).await;
        assert_eq!(limiter.tracked().await, 1);
    }
}
