//! Per-client admission control for rate-limited routes.
//!
//! The default algorithm is an exact sliding-window log: for every client address the limiter
//! keeps the timestamps of admitted requests that are still inside the trailing window. Old
//! timestamps are pruned lazily when that client shows up again. A request is rejected, and
//! not recorded, once the pruned log already holds `requests` entries. At most once per window
//! a sweep drops every client whose newest timestamp has left the window, so addresses that
//! never return do not accumulate.
//!
//! `token_bucket` swaps in `governor`'s keyed GCRA limiter for smoother replenishment. Its
//! keyed store is trimmed on the same schedule.
use std::{
    collections::{HashMap as StdHashMap, VecDeque},
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use axum::extract::ConnectInfo;
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
};
use http::{HeaderMap, Request, StatusCode};
use tokio::time::Instant;

use crate::{
    config::models::{MissingKeyPolicy, RateLimitAlgorithm, RateLimitConfig},
    core::{error::GatewayError, registry::normalize_service_name},
};

pub type KeyedRateLimiterImpl<K> = RateLimiter<K, DefaultKeyedStateStore<K>, DefaultClock>;

#[derive(Debug)]
struct WindowLog {
    clients: StdHashMap<IpAddr, VecDeque<Instant>>,
    last_sweep: Instant,
}

impl WindowLog {
    /// Drop clients with nothing left inside the window; runs at most once per window.
    fn sweep(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.last_sweep) < window {
            return;
        }
        self.clients.retain(|_, log| {
            log.back()
                .is_some_and(|newest| now.duration_since(*newest) < window)
        });
        self.last_sweep = now;
    }
}

/// Trailing-window request log keyed by client address, under a single lock.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    requests: Mutex<WindowLog>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit as usize,
            window,
            requests: Mutex::new(WindowLog {
                clients: StdHashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Admit and record a request from `key`, or return how long until a slot frees up.
    pub fn check(&self, key: IpAddr) -> Result<(), Duration> {
        let now = Instant::now();
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        requests.sweep(now, self.window);
        let log = requests.clients.entry(key).or_default();

        while let Some(oldest) = log.front() {
            if now.duration_since(*oldest) < self.window {
                break;
            }
            log.pop_front();
        }

        if log.len() >= self.limit {
            let retry_after = log
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(retry_after);
        }

        log.push_back(now);
        Ok(())
    }

    /// Number of timestamps currently held for `key`, without pruning.
    pub fn tracked(&self, key: IpAddr) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clients
            .get(&key)
            .map_or(0, VecDeque::len)
    }

    /// Number of client addresses currently held.
    pub fn clients(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clients
            .len()
    }
}

enum Algorithm {
    SlidingWindow(SlidingWindowLimiter),
    TokenBucket(KeyedRateLimiterImpl<IpAddr>),
}

/// One limiter instance plus the response it produces on violation.
pub struct RouteRateLimiter {
    algorithm: Algorithm,
    status_code: StatusCode,
    message: String,
    on_missing_key: MissingKeyPolicy,
    trust_forwarded_headers: bool,
    period: Duration,
    last_purge: Mutex<Instant>,
}

impl RouteRateLimiter {
    /// Build a limiter from a `RateLimitConfig` definition.
    pub fn new(config: &RateLimitConfig) -> Result<Self, String> {
        let period = config.period()?;
        if period.is_zero() {
            return Err("Rate limit 'period' must be greater than 0".to_string());
        }
        let requests = NonZeroU32::new(config.requests)
            .ok_or_else(|| "Rate limit 'requests' must be greater than 0".to_string())?;

        let algorithm = match config.algorithm {
            RateLimitAlgorithm::SlidingWindow => {
                Algorithm::SlidingWindow(SlidingWindowLimiter::new(requests.get(), period))
            }
            RateLimitAlgorithm::TokenBucket => {
                // A full bucket of `requests`, refilled evenly across one period.
                let replenish = period / requests.get();
                let quota = Quota::with_period(replenish)
                    .ok_or_else(|| format!("Invalid replenish interval {replenish:?}"))?
                    .allow_burst(requests);
                Algorithm::TokenBucket(RateLimiter::keyed(quota))
            }
        };

        let status_code = StatusCode::from_u16(config.status_code)
            .map_err(|_| format!("Invalid status code: {}", config.status_code))?;

        tracing::info!(
            "Creating rate limiter: algorithm={:?}, requests={}, period={}, status_code={}, on_missing_key={:?}",
            config.algorithm,
            config.requests,
            config.period,
            config.status_code,
            config.on_missing_key
        );

        Ok(Self {
            algorithm,
            status_code,
            message: config.message.clone(),
            on_missing_key: config.on_missing_key,
            trust_forwarded_headers: config.trust_forwarded_headers,
            period,
            last_purge: Mutex::new(Instant::now()),
        })
    }

    /// Number of client addresses the limiter currently keeps state for.
    pub fn tracked_clients(&self) -> usize {
        match &self.algorithm {
            Algorithm::SlidingWindow(limiter) => limiter.clients(),
            Algorithm::TokenBucket(limiter) => limiter.len(),
        }
    }

    /// Forget token-bucket clients whose bucket has refilled completely.
    pub fn purge_stale(&self) {
        if let Algorithm::TokenBucket(limiter) = &self.algorithm {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    fn purge_if_due(&self) {
        let now = Instant::now();
        let mut last_purge = self.last_purge.lock().unwrap_or_else(PoisonError::into_inner);
        if now.duration_since(*last_purge) >= self.period {
            *last_purge = now;
            drop(last_purge);
            self.purge_stale();
        }
    }

    fn rejected(&self, retry_after: Option<Duration>) -> GatewayError {
        GatewayError::RateLimited {
            status: self.status_code,
            message: self.message.clone(),
            retry_after,
        }
    }

    /// Enforce the limit for one client address.
    pub fn check_key(&self, key: IpAddr) -> Result<(), GatewayError> {
        match &self.algorithm {
            Algorithm::SlidingWindow(limiter) => limiter
                .check(key)
                .map_err(|retry_after| self.rejected(Some(retry_after))),
            Algorithm::TokenBucket(limiter) => {
                self.purge_if_due();
                limiter.check_key(&key).map_err(|not_until| {
                    let wait = not_until.wait_time_from(DefaultClock::default().now());
                    self.rejected(Some(wait))
                })
            }
        }
    }

    /// Enforce this limiter against an HTTP request, keyed by client address.
    pub fn check<T>(&self, req: &Request<T>) -> Result<(), GatewayError> {
        match client_ip(req, self.trust_forwarded_headers) {
            Some(ip) => self.check_key(ip),
            None => match self.on_missing_key {
                MissingKeyPolicy::Allow => Ok(()),
                MissingKeyPolicy::Deny => Err(GatewayError::RateLimited {
                    status: self.status_code,
                    message: "No client IP available".to_string(),
                    retry_after: None,
                }),
            },
        }
    }
}

/// Client address of a request: forwarded headers first when trusted, else the peer address.
pub fn client_ip<T>(req: &Request<T>, trust_forwarded_headers: bool) -> Option<IpAddr> {
    trust_forwarded_headers
        .then(|| forwarded_ip(req.headers()))
        .flatten()
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|connect_info| connect_info.0.ip())
        })
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let first_forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());

    first_forwarded.or_else(|| {
        headers
            .get("X-Real-IP")
            .and_then(|value| value.to_str().ok())
            .and_then(|ip| ip.trim().parse().ok())
    })
}

/// The shared default limiter plus limiters for services with their own settings.
///
/// Services without an override share one window, so a client's budget spans all of them.
pub struct RateLimiterTable {
    default: Arc<RouteRateLimiter>,
    per_service: StdHashMap<String, Arc<RouteRateLimiter>>,
}

impl RateLimiterTable {
    pub fn new(
        default: &RateLimitConfig,
        overrides: &StdHashMap<String, RateLimitConfig>,
    ) -> Result<Self, String> {
        let mut per_service = StdHashMap::new();
        for (service, config) in overrides {
            let limiter = RouteRateLimiter::new(config)
                .map_err(|e| format!("rate limit for service '{service}': {e}"))?;
            per_service.insert(normalize_service_name(service), Arc::new(limiter));
        }
        Ok(Self {
            default: Arc::new(RouteRateLimiter::new(default)?),
            per_service,
        })
    }

    pub fn for_service(&self, service: &str) -> &RouteRateLimiter {
        self.per_service
            .get(&normalize_service_name(service))
            .unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use http::Method;

    use super::*;

    fn sliding_config(requests: u32, period: &str) -> RateLimitConfig {
        RateLimitConfig {
            requests,
            period: period.to_string(),
            ..RateLimitConfig::default()
        }
    }

    fn request_from(ip: [u8; 4]) -> Request<()> {
        let mut req = Request::builder()
            .method(Method::GET)
            .uri("/api/courses")
            .body(())
            .unwrap();
        req.extensions_mut().insert(ConnectInfo(SocketAddr::from((ip, 40_000))));
        req
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_limit_and_recovery() {
        let limiter = RouteRateLimiter::new(&sliding_config(100, "60s")).unwrap();
        let req = request_from([10, 0, 0, 1]);

        for _ in 0..100 {
            assert!(limiter.check(&req).is_ok());
        }

        let err = limiter.check(&req).unwrap_err();
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.check(&req).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_requests_are_not_recorded() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10));
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

        assert!(limiter.check(ip).is_ok());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.check(ip).is_ok());

        for _ in 0..10 {
            assert!(limiter.check(ip).is_err());
        }
        assert_eq!(limiter.tracked(ip), 2);

        // Only the first timestamp has left the window.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.check(ip).is_ok());
        assert!(limiter.check(ip).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_reflects_oldest_entry() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5));

        limiter.check(ip).unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(limiter.check(ip).unwrap_err(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_isolated() {
        let limiter = RouteRateLimiter::new(&sliding_config(1, "60s")).unwrap();

        assert!(limiter.check(&request_from([10, 0, 0, 1])).is_ok());
        assert!(limiter.check(&request_from([10, 0, 0, 1])).is_err());
        assert!(limiter.check(&request_from([10, 0, 0, 2])).is_ok());
    }

    #[test]
    fn test_missing_client_address_policy() {
        let req = Request::builder().uri("/api/courses").body(()).unwrap();

        let allow = RouteRateLimiter::new(&sliding_config(1, "60s")).unwrap();
        assert!(allow.check(&req).is_ok());
        assert!(allow.check(&req).is_ok());

        let mut config = sliding_config(1, "60s");
        config.on_missing_key = MissingKeyPolicy::Deny;
        let deny = RouteRateLimiter::new(&config).unwrap();
        assert!(deny.check(&req).is_err());
    }

    #[test]
    fn test_forwarded_headers_only_when_trusted() {
        let mut req = request_from([127, 0, 0, 1]);
        req.headers_mut()
            .insert("X-Forwarded-For", "203.0.113.7, 10.0.0.1".parse().unwrap());

        assert_eq!(
            client_ip(&req, true),
            Some("203.0.113.7".parse::<IpAddr>().unwrap())
        );
        assert_eq!(client_ip(&req, false), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn test_token_bucket_allows_burst() {
        let mut config = sliding_config(5, "1s");
        config.algorithm = RateLimitAlgorithm::TokenBucket;
        let limiter = RouteRateLimiter::new(&config).unwrap();
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

        for _ in 0..5 {
            assert!(limiter.check_key(ip).is_ok());
        }
        assert!(limiter.check_key(ip).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_clients_are_forgotten() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(1));
        for i in 0..10_000u32 {
            let ip = IpAddr::V6(Ipv6Addr::from((0x2001_0db8_u128 << 96) | u128::from(i)));
            assert!(limiter.check(ip).is_ok());
        }
        assert_eq!(limiter.clients(), 10_000);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(limiter.check(IpAddr::V4(Ipv4Addr::LOCALHOST)).is_ok());
        assert_eq!(limiter.clients(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_clients_inside_window() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(10));
        let early = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let recent = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        limiter.check(early).unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        limiter.check(recent).unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(limiter.check(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3))).is_ok());
        assert_eq!(limiter.clients(), 2);
        // The surviving entry still counts against its client.
        assert!(limiter.check(recent).is_err());
    }

    #[test]
    fn test_token_bucket_purges_refilled_clients() {
        let mut config = sliding_config(1, "20ms");
        config.algorithm = RateLimitAlgorithm::TokenBucket;
        let limiter = RouteRateLimiter::new(&config).unwrap();

        for last in 1..=3 {
            assert!(limiter.check_key(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))).is_ok());
        }
        assert_eq!(limiter.tracked_clients(), 3);

        std::thread::sleep(Duration::from_millis(80));
        limiter.purge_stale();
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(RouteRateLimiter::new(&sliding_config(0, "60s")).is_err());
        assert!(RouteRateLimiter::new(&sliding_config(10, "soon")).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_uses_override_for_service() {
        let overrides =
            StdHashMap::from([("executor-svc".to_string(), sliding_config(1, "60s"))]);
        let table = RateLimiterTable::new(&sliding_config(3, "60s"), &overrides).unwrap();
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

        assert!(table.for_service("EXECUTOR-SVC").check_key(ip).is_ok());
        assert!(table.for_service("EXECUTOR-SVC").check_key(ip).is_err());
        assert!(table.for_service("BACKEND-SERVICE").check_key(ip).is_ok());
    }
}
