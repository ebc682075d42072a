//! Configuration data structures for the gateway.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. Every section
//! carries defaults so a minimal file only needs routes and the fallback table. Durations are
//! humantime strings (`"30s"`, `"1m"`) and are parsed into [`Duration`] through the accessor
//! methods so that validation can report the offending field.
use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::core::circuit_breaker::CircuitBreakerSettings;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Parse a humantime duration, naming the field on failure.
pub fn parse_duration(field: &str, value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value)
        .map_err(|e| format!("invalid duration '{value}' for '{field}': {e}"))
}

/// Output format for structured logs.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Instance selection policy used when the registry knows several instances of a service.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    Random,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_true")]
    pub security_headers: bool,
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// `host:port` string the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Breaker settings for a service: per-service override, else the global section.
    pub fn breaker_config_for(&self, service: &str) -> &CircuitBreakerConfig {
        self.service_config(service)
            .and_then(|svc| svc.circuit_breaker.as_ref())
            .unwrap_or(&self.circuit_breaker)
    }

    /// Look up a service section by logical name, ignoring case.
    pub fn service_config(&self, service: &str) -> Option<&ServiceConfig> {
        self.services
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(service))
            .map(|(_, cfg)| cfg)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            security_headers: true,
            registry: None,
            proxy: ProxyConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            metrics: MetricsConfig::default(),
            admin: AdminConfig::default(),
            services: HashMap::new(),
            routes: Vec::new(),
        }
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.config.registry = Some(registry);
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = proxy;
        self
    }

    pub fn circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = breaker;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    pub fn security_headers(mut self, enabled: bool) -> Self {
        self.config.security_headers = enabled;
        self
    }

    /// Add (or replace) a logical service section.
    pub fn service(mut self, name: impl Into<String>, service: ServiceConfig) -> Self {
        self.config.services.insert(name.into(), service);
        self
    }

    /// Append a route to the route table.
    pub fn route(mut self, route: RouteConfig) -> Self {
        self.config.routes.push(route);
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

/// External service registry (Eureka REST API) settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Base URL of the registry, e.g. `http://eureka:8761/eureka`.
    pub url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    #[serde(default = "default_registry_timeout")]
    pub timeout: String,
    /// When present the gateway registers itself and heartbeats.
    #[serde(default)]
    pub instance: Option<SelfRegistrationConfig>,
}

fn default_poll_interval() -> String {
    "30s".to_string()
}

fn default_registry_timeout() -> String {
    "10s".to_string()
}

impl RegistryConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            poll_interval: default_poll_interval(),
            timeout: default_registry_timeout(),
            instance: None,
        }
    }

    pub fn poll_interval(&self) -> Result<Duration, String> {
        parse_duration("registry.poll_interval", &self.poll_interval)
    }

    pub fn timeout(&self) -> Result<Duration, String> {
        parse_duration("registry.timeout", &self.timeout)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SelfRegistrationConfig {
    pub app_name: String,
    pub instance_ip: String,
    /// Advertised port; defaults to the listen port.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_poll_interval")]
    pub heartbeat_interval: String,
}

impl SelfRegistrationConfig {
    pub fn heartbeat_interval(&self) -> Result<Duration, String> {
        parse_duration("registry.instance.heartbeat_interval", &self.heartbeat_interval)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    /// Client-side timeout for one forwarded request.
    pub timeout: String,
    pub selection: SelectionStrategy,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout: "30s".to_string(),
            selection: SelectionStrategy::RoundRobin,
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Result<Duration, String> {
        parse_duration("proxy.timeout", &self.timeout)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: String,
    /// Lowest response status counted as a failure (500, or 400 for the strict variant).
    pub failure_status: u16,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: "30s".to_string(),
            failure_status: 500,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Result<Duration, String> {
        parse_duration("circuit_breaker.reset_timeout", &self.reset_timeout)
    }

    pub fn settings(&self) -> Result<CircuitBreakerSettings, String> {
        Ok(CircuitBreakerSettings {
            failure_threshold: self.failure_threshold,
            reset_timeout: self.reset_timeout()?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    /// Exact trailing-window log of request timestamps.
    #[default]
    SlidingWindow,
    /// GCRA token bucket (smooth replenishment, burst of `requests`).
    TokenBucket,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    #[default]
    Allow,
    Deny,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    pub algorithm: RateLimitAlgorithm,
    pub requests: u32,
    pub period: String,
    pub status_code: u16,
    pub message: String,
    pub on_missing_key: MissingKeyPolicy,
    /// Key on `X-Forwarded-For` / `X-Real-IP` before the socket address.
    pub trust_forwarded_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            requests: 100,
            period: "60s".to_string(),
            status_code: 429,
            message: "Too many requests".to_string(),
            on_missing_key: MissingKeyPolicy::Allow,
            trust_forwarded_headers: false,
        }
    }
}

impl RateLimitConfig {
    pub fn period(&self) -> Result<Duration, String> {
        parse_duration("rate_limit.period", &self.period)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    /// Length of one reporting window; all counters are cleared at each boundary.
    pub reporting_period: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            reporting_period: "1m".to_string(),
        }
    }
}

impl MetricsConfig {
    pub fn reporting_period(&self) -> Result<Duration, String> {
        parse_duration("metrics.reporting_period", &self.reporting_period)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub prefix: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "/admin/scaling".to_string(),
        }
    }
}

/// How the inbound path is turned into the path sent to a backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathRewrite {
    /// Forward the inbound path unchanged.
    #[default]
    Passthrough,
    /// Keep only the last segment, or the last two when the parent is listed in `keep_parent`.
    LastSegment {
        #[serde(default)]
        keep_parent: Vec<String>,
    },
}

/// Per logical service settings.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Static base URL used when the registry has no live instance.
    pub fallback_url: Option<String>,
    /// Other logical names that resolve to the same fallback URL.
    pub aliases: Vec<String>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub rate_limit: Option<RateLimitConfig>,
    pub path_rewrite: PathRewrite,
}

impl ServiceConfig {
    pub fn with_fallback(url: impl Into<String>) -> Self {
        Self {
            fallback_url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// One entry of the static route table.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RouteConfig {
    /// Path pattern, `{name}` for one segment and `{*name}` for the remainder.
    pub path: String,
    /// Logical target service name.
    pub service: String,
    /// Allowed methods; empty means any.
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub rate_limited: bool,
}

impl RouteConfig {
    pub fn new(path: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            service: service.into(),
            methods: Vec::new(),
            rate_limited: false,
        }
    }

    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn rate_limited(mut self) -> Self {
        self.rate_limited = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_gateway_constants() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(
            config.circuit_breaker.reset_timeout().unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(config.rate_limit.requests, 100);
        assert_eq!(config.rate_limit.period().unwrap(), Duration::from_secs(60));
        assert_eq!(
            config.metrics.reporting_period().unwrap(),
            Duration::from_secs(60)
        );
        assert_eq!(config.proxy.timeout().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_breaker_override_lookup_ignores_case() {
        let strict = CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: "5s".to_string(),
            failure_status: 400,
        };
        let config = ServerConfig::builder()
            .service(
                "EXECUTOR-SVC",
                ServiceConfig {
                    circuit_breaker: Some(strict),
                    ..ServiceConfig::default()
                },
            )
            .build();

        assert_eq!(config.breaker_config_for("executor-svc").failure_threshold, 2);
        assert_eq!(config.breaker_config_for("BACKEND-SERVICE").failure_threshold, 5);
    }

    #[test]
    fn test_path_rewrite_deserialize() {
        let rewrite: PathRewrite =
            serde_json::from_str(r#"{"type":"last_segment","keep_parent":["result","cleanup"]}"#)
                .unwrap();
        assert_eq!(
            rewrite,
            PathRewrite::LastSegment {
                keep_parent: vec!["result".to_string(), "cleanup".to_string()]
            }
        );
    }
}
