use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::shared::domain::errors::AppError;
use crate::shared::infrastructure::app_state::AppState;

/// Token-bucket limiter keyed on the minimal scope: the authenticated DID
/// when a bearer token is present, the client IP otherwise. Buckets refill
/// steadily at `window / capacity` per token.
pub struct RateLimiter {
    capacity: f64,
    window: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_window: u32, window: Duration) -> Self {
        Self {
            capacity: f64::from(requests_per_window.max(1)),
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `key`, or report how long until one is available.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let refill_per_sec = self.capacity / self.window.as_secs_f64();

        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        // Opportunistic cleanup keeps the map bounded by active clients.
        if buckets.len() > 10_000 {
            let window = self.window;
            buckets.retain(|_, b| now.duration_since(b.last_refill) < window * 2);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let wait = (1.0 - bucket.tokens) / refill_per_sec;
            Err(wait.ceil() as u64)
        }
    }
}

/// Axum middleware applying the limiter to every request it wraps.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = limiter_key(&request);
    match state.rate_limiter.check(&key) {
        Ok(()) => Ok(next.run(request).await),
        Err(retry_after_secs) => {
            tracing::debug!(key = %key, retry_after_secs, "rate limited");
            Err(AppError::RateLimited { retry_after_secs })
        }
    }
}

fn limiter_key(request: &Request) -> String {
    // Prefer the authenticated identity; tokens are validated downstream, the
    // raw value is only a bucket key here.
    if let Some(auth) = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return format!("tok:{token}");
        }
    }
    let ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("unknown");
    format!("ip:{ip}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check("ip:1.2.3.4").is_ok());
        assert!(limiter.check("ip:1.2.3.4").is_ok());
        assert!(limiter.check("ip:1.2.3.4").is_ok());
        assert!(limiter.check("ip:1.2.3.4").is_err());
    }

    #[test]
    fn buckets_are_per_key() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("ip:1.1.1.1").is_ok());
        assert!(limiter.check("ip:2.2.2.2").is_ok());
        assert!(limiter.check("ip:1.1.1.1").is_err());
    }

    #[test]
    fn rejection_reports_wait_time() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.check("k").unwrap();
        let wait = limiter.check("k").unwrap_err();
        assert!(wait >= 1 && wait <= 60, "wait was {wait}");
    }
}
