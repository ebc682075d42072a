pub mod circuit_breaker;
pub mod error;
pub mod gateway;
pub mod load_balancer;
pub mod path_rewrite;
pub mod rate_limiter;
pub mod registration;
pub mod registry;
pub mod router;
pub mod service_metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerTable, CircuitState};
pub use error::GatewayError;
pub use gateway::GatewayService;
pub use load_balancer::LoadBalancerFactory;
pub use rate_limiter::RouteRateLimiter;
pub use registration::SelfRegistration;
pub use registry::ServiceRegistry;
pub use service_metrics::ServiceMetrics;
