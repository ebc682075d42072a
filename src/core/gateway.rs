//! Core gateway state.
//!
//! `GatewayService` ties together everything the request path consults: the route table, the
//! registry view, circuit breakers, rate limiters and the metrics window. It performs no I/O
//! of its own apart from the background loops it exposes, so it can be built and exercised in
//! tests without a network.
use std::{collections::HashMap as StdHashMap, sync::Arc};

use eyre::{Result, eyre};

use crate::{
    config::{PathRewrite, ServerConfig},
    core::{
        circuit_breaker::CircuitBreakerTable,
        rate_limiter::RateLimiterTable,
        registry::{ServiceRegistry, normalize_service_name},
        router::RouteTable,
        service_metrics::ServiceMetrics,
    },
    ports::registry::RegistrySource,
};

/// How responses and paths are treated for one service.
#[derive(Debug, Clone)]
pub struct ServicePolicy {
    pub path_rewrite: PathRewrite,
    /// Lowest backend status counted as a breaker failure.
    pub failure_status: u16,
}

pub struct GatewayService {
    config: Arc<ServerConfig>,
    routes: RouteTable,
    registry: Arc<ServiceRegistry>,
    breakers: CircuitBreakerTable,
    rate_limiters: RateLimiterTable,
    metrics: Arc<ServiceMetrics>,
    policies: StdHashMap<String, ServicePolicy>,
    default_policy: ServicePolicy,
}

impl GatewayService {
    /// Build the gateway state from a validated configuration.
    ///
    /// `source` is the registry to poll; `None` serves from the fallback table only.
    pub fn new(config: Arc<ServerConfig>, source: Option<Arc<dyn RegistrySource>>) -> Result<Self> {
        let routes = RouteTable::from_config(&config.routes)?;
        let registry = ServiceRegistry::from_config(&config, source).map_err(|e| eyre!(e))?;

        let defaults = config.circuit_breaker.settings().map_err(|e| eyre!(e))?;
        let mut breaker_overrides = StdHashMap::new();
        let mut limiter_overrides = StdHashMap::new();
        let mut policies = StdHashMap::new();

        for (name, service) in &config.services {
            let breaker = config.breaker_config_for(name);
            if let Some(override_cfg) = &service.circuit_breaker {
                breaker_overrides.insert(
                    name.clone(),
                    override_cfg
                        .settings()
                        .map_err(|e| eyre!("circuit breaker for '{name}': {e}"))?,
                );
            }
            if let Some(limit) = &service.rate_limit {
                limiter_overrides.insert(name.clone(), limit.clone());
            }
            policies.insert(
                normalize_service_name(name),
                ServicePolicy {
                    path_rewrite: service.path_rewrite.clone(),
                    failure_status: breaker.failure_status,
                },
            );
        }

        let rate_limiters =
            RateLimiterTable::new(&config.rate_limit, &limiter_overrides).map_err(|e| eyre!(e))?;
        let reporting_period = config.metrics.reporting_period().map_err(|e| eyre!(e))?;

        tracing::info!(
            routes = routes.len(),
            services = config.services.len(),
            "Gateway service initialized"
        );

        Ok(Self {
            routes,
            registry: Arc::new(registry),
            breakers: CircuitBreakerTable::with_overrides(defaults, breaker_overrides),
            rate_limiters,
            metrics: Arc::new(ServiceMetrics::new(reporting_period)),
            policies,
            default_policy: ServicePolicy {
                path_rewrite: PathRewrite::Passthrough,
                failure_status: config.circuit_breaker.failure_status,
            },
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Shared so the refresh loop can run on its own task.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &CircuitBreakerTable {
        &self.breakers
    }

    pub fn rate_limiters(&self) -> &RateLimiterTable {
        &self.rate_limiters
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    pub fn policy(&self, service: &str) -> &ServicePolicy {
        self.policies
            .get(&normalize_service_name(service))
            .unwrap_or(&self.default_policy)
    }
}
