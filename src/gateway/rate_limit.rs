//! Per-IP token bucket rate limiting.
//!
//! Process-local: every server instance keeps its own quota map. The map
//! lives behind a mutex for the lifetime of the router.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::handlers::ErrorBody;
use crate::config::RateLimitConfig;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(burst: u32) -> Self {
        Self {
            tokens: burst as f64,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, refill_rate: f64, max_tokens: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct IpRateLimiter {
    rps: f64,
    burst: u32,
    buckets: Arc<Mutex<HashMap<IpAddr, TokenBucket>>>,
}

impl IpRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            rps: config.rps as f64,
            burst: config.burst,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn allow(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_consume(self.rps, self.burst as f64)
    }
}

pub async fn rate_limit(
    State(limiter): State<IpRateLimiter>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.allow(addr.ip()) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorBody {
                error: "rate limit exceeded".to_string(),
            }),
        )
            .into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn test_burst_then_reject() {
        let limiter = IpRateLimiter::new(&RateLimitConfig { rps: 1, burst: 3 });

        for i in 0..3 {
            assert!(limiter.allow(test_ip(1)), "request {} within burst", i);
        }
        assert!(!limiter.allow(test_ip(1)), "burst exhausted");
    }

    #[test]
    fn test_quotas_are_per_ip() {
        let limiter = IpRateLimiter::new(&RateLimitConfig { rps: 1, burst: 1 });

        assert!(limiter.allow(test_ip(1)));
        assert!(!limiter.allow(test_ip(1)));
        assert!(limiter.allow(test_ip(2)), "second ip has its own bucket");
    }
}
