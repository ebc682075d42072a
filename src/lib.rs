//! LMS Gateway - the traffic core in front of the LMS backend services.
//!
//! The gateway discovers live instances of each logical service from a Eureka registry, picks
//! one per request, and forwards the request under per-service circuit breaking and
//! per-client rate limiting, keeping a per-period window of request, error and latency figures
//! per backend.
//!
//! # Features
//! - Static route table mapping public paths and methods to logical services
//! - Registry snapshot refreshed in the background, with static fallback URLs
//! - Round-robin or random instance selection
//! - Per-service circuit breakers (closed / open / half-open)
//! - Sliding-window (or token-bucket) rate limiting per client address
//! - Per-service metrics window plus `metrics` facade counters and histograms
//! - Optional self-registration and heartbeats against the registry
//! - Graceful shutdown of the server and every background task
//!
//! # Quick Example
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use lms_gateway::{GatewayService, HttpClientAdapter, HttpHandler, config, router};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = Arc::new(config::load_config("config.toml").await?);
//! let gateway = Arc::new(GatewayService::new(cfg, None)?);
//! let client = Arc::new(HttpClientAdapter::new(Duration::from_secs(30))?);
//! let app = router(Arc::new(HttpHandler::new(gateway, client)));
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! **ports** hold the traits the core depends on (outbound HTTP, registry source and
//! registrar), **adapters** implement them (hyper client, Eureka REST client) and expose the
//! axum surface, and **core** keeps the policy: breakers, limiters, selection, routing and
//! metrics. Per-request failures are typed as [`GatewayError`] and rendered as JSON.
//!
//! # Concurrency & Data Structures
//! The registry view is an `ArcSwap` snapshot replaced wholesale on every poll. Breakers live
//! in an `scc::HashMap` with atomic get-or-create. Breaker, limiter and metrics state is per
//! process and is not shared between gateway replicas.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{EurekaClient, HttpClientAdapter, HttpHandler, router},
    core::{GatewayError, GatewayService, SelfRegistration},
    ports::http_client::HttpClient,
    utils::{GracefulShutdown, ShutdownReason},
};
