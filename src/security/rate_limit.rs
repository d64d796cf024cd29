//! Per-client token-bucket rate limiting.
//!
//! Client keys can come from `x-forwarded-for`, so the bucket map is bounded
//! two ways: buckets idle longer than `idle_secs` are swept, and once
//! `max_clients` keys are tracked, new clients share a single overflow bucket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::config::RateLimitConfig;
use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};
use crate::http::error::ApiError;
use crate::observability::metrics;

/// Paths never limited.
const EXEMPT_PATHS: &[&str] = &["/system/health"];

/// Bucket shared by clients that arrive while the map is full.
const OVERFLOW_KEY: &str = "overflow";

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Buckets keyed by client address.
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    rps: f64,
    burst: f64,
    trust_proxy: bool,
    idle: Duration,
    max_clients: usize,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, trust_proxy: bool) -> Self {
        Self {
            buckets: DashMap::new(),
            rps: config.requests_per_second as f64,
            burst: config.burst_size as f64,
            trust_proxy,
            idle: Duration::from_secs(config.idle_secs),
            max_clients: config.max_clients,
        }
    }

    /// Take one token for `key`. Returns false when the bucket is empty.
    pub fn check(&self, key: &str) -> bool {
        let key = if self.buckets.contains_key(key) || self.has_room() {
            key
        } else {
            OVERFLOW_KEY
        };
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.rps)
    }

    fn has_room(&self) -> bool {
        if self.buckets.len() < self.max_clients {
            return true;
        }
        self.evict_idle(Instant::now());
        self.buckets.len() < self.max_clients
    }

    /// Drop buckets untouched for the idle window as of `now`. Returns the
    /// number removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_update) < self.idle);
        before.saturating_sub(self.buckets.len())
    }

    pub fn idle_window(&self) -> Duration {
        self.idle
    }

    /// Client key: first `x-forwarded-for` hop when the proxy is trusted,
    /// else the peer IP.
    pub fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.trust_proxy {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(client) = forwarded {
                return client.to_string();
            }
        }
        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Sweep idle buckets once per idle window until shutdown is signalled.
pub async fn sweep_periodically(limiter: Arc<RateLimiter>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(limiter.idle_window());
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = limiter.evict_idle(Instant::now());
                if evicted > 0 {
                    tracing::debug!(service = "server", evicted, tracked = limiter.tracked_clients(), "Idle rate-limit buckets swept");
                }
            }
            _ = shutdown.recv() => return,
        }
    }
}

async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if EXEMPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = limiter.client_key(request.headers(), peer);

    if limiter.check(&key) {
        next.run(request).await
    } else {
        tracing::warn!(service = "server", client = %key, "Rate limit exceeded");
        metrics::record_rate_limited();
        ApiError::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED", "Too many requests")
            .into_response()
    }
}

/// Step 5: rate limiting.
pub struct RateLimit;

impl Capability for RateLimit {
    fn step(&self) -> CompositionStep {
        CompositionStep::RateLimit
    }

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        let config = app.state().config.clone();
        if !config.rate_limit.enabled {
            tracing::info!(service = "server", "Rate limiting disabled");
            return Ok(());
        }

        let limiter = Arc::new(RateLimiter::new(
            &config.rate_limit,
            config.listener.trusts_proxy(),
        ));
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(sweep_periodically(
                    limiter.clone(),
                    app.state().coordinator.subscribe(),
                ));
            }
            Err(_) => {
                tracing::debug!(service = "server", "No runtime; idle buckets are swept only when the client map fills")
            }
        }
        app.wrap(move |router| {
            router.layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware))
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rps: u32, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_second: rps,
            burst_size: burst,
            ..RateLimitConfig::default()
        }
    }

    fn limiter(rps: u32, burst: u32, trust_proxy: bool) -> RateLimiter {
        RateLimiter::new(&config(rps, burst), trust_proxy)
    }

    #[test]
    fn burst_then_reject() {
        let limiter = limiter(1, 3, false);
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        // Separate bucket per client.
        assert!(limiter.check("10.0.0.2"));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn forwarded_header_only_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        assert_eq!(limiter(1, 1, true).client_key(&headers, Some(peer)), "203.0.113.7");
        assert_eq!(limiter(1, 1, false).client_key(&headers, Some(peer)), "127.0.0.1");
        assert_eq!(limiter(1, 1, false).client_key(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn idle_buckets_are_evicted() {
        let limiter = limiter(10, 10, true);
        for i in 0..1_000 {
            let mut headers = HeaderMap::new();
            headers.insert("x-forwarded-for", format!("client-{i}, 10.0.0.1").parse().unwrap());
            let key = limiter.client_key(&headers, None);
            assert!(limiter.check(&key));
        }
        assert_eq!(limiter.tracked_clients(), 1_000);

        // Nothing is idle yet.
        assert_eq!(limiter.evict_idle(Instant::now()), 0);

        let later = Instant::now() + limiter.idle_window() + Duration::from_secs(1);
        assert_eq!(limiter.evict_idle(later), 1_000);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn active_clients_survive_eviction() {
        let limiter = limiter(10, 10, false);
        assert!(limiter.check("stale"));
        std::thread::sleep(Duration::from_millis(10));
        let checkpoint = Instant::now();
        std::thread::sleep(Duration::from_millis(10));
        assert!(limiter.check("fresh"));

        // Only buckets last touched before `checkpoint` are past the window.
        let cutoff = checkpoint + limiter.idle_window();
        limiter.evict_idle(cutoff);
        assert_eq!(limiter.tracked_clients(), 1);
        assert!(limiter.buckets.contains_key("fresh"));
    }

    #[test]
    fn clients_beyond_the_cap_share_the_overflow_bucket() {
        let limiter = RateLimiter::new(
            &RateLimitConfig {
                max_clients: 3,
                ..config(1, 2)
            },
            true,
        );
        for i in 0..50 {
            limiter.check(&format!("203.0.113.{i}"));
        }
        // Three real clients plus the shared overflow bucket.
        assert_eq!(limiter.tracked_clients(), 4);
        assert!(limiter.buckets.contains_key(OVERFLOW_KEY));

        // The overflow bucket drained long ago.
        assert!(!limiter.check("203.0.113.200"));
        // Known clients keep their own buckets.
        assert!(limiter.check("203.0.113.0"));
    }

    #[tokio::test]
    async fn sweep_stops_on_shutdown() {
        let limiter = Arc::new(limiter(1, 1, false));
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(sweep_periodically(limiter, rx));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
