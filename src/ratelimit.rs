//! Fixed-window rate limiting for write routes.
//!
//! The limiter is an ordinary value owned by the application state, so every
//! test and every server instance gets its own counters.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::RwLock;

use crate::api::error::ApiError;

#[derive(Debug)]
pub struct RateLimiter {
    /// key -> (requests in window, window start)
    windows: RwLock<HashMap<String, (u32, Instant)>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    /// Count a request against `key`.
    ///
    /// Returns `Ok(remaining)` when allowed, or `Err(retry_after_secs)`.
    pub async fn check(&self, key: &str) -> Result<u32, u64> {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        let entry = windows.entry(key.to_string()).or_insert((0, now));

        if now.duration_since(entry.1) >= self.window {
            *entry = (1, now);
            return Ok(self.max_requests.saturating_sub(1));
        }

        if entry.0 >= self.max_requests {
            let elapsed = now.duration_since(entry.1);
            let retry_after = self.window.saturating_sub(elapsed).as_secs();
            return Err(retry_after.max(1));
        }

        entry.0 += 1;
        Ok(self.max_requests.saturating_sub(entry.0))
    }

    /// Drop windows that have expired. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, (_, start)| now.duration_since(*start) < self.window);
        before - windows.len()
    }

    pub async fn tracked_keys(&self) -> usize {
        self.windows.read().await.len()
    }
}

/// Periodically purge expired windows for the life of the process.
pub fn spawn_cleanup(limiter: Arc<RateLimiter>) {
    let period = limiter.window.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let removed = limiter.cleanup_expired().await;
            if removed > 0 {
                tracing::debug!("Rate limiter dropped {} expired windows", removed);
            }
        }
    });
}

/// Middleware keyed on the peer IP address.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);
    match limiter.check(&key).await {
        Ok(_) => next.run(request).await,
        Err(retry_after_secs) => {
            tracing::warn!("Rate limit exceeded for {}", key);
            ApiError::RateLimited { retry_after_secs }.into_response()
        }
    }
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| format!("ip:{}", info.0.ip()))
        .unwrap_or_else(|| "ip:unknown".to_string())
}
