#![allow(clippy::collapsible_if)]

use std::{net::SocketAddr, time::Duration};

use eyre::Result;
use http::{Method, StatusCode};

use crate::{
    config::models::{
        CircuitBreakerConfig, PathRewrite, RateLimitConfig, RegistryConfig, ServerConfig,
        ServiceConfig,
    },
    core::router::RouteTable,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration, collecting every problem found.
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr()) {
            errors.push(e);
        }

        if let Some(registry) = &config.registry {
            errors.extend(Self::validate_registry(registry));
        }

        if let Err(message) = config.proxy.timeout() {
            errors.push(Self::invalid("proxy.timeout", message));
        }

        errors.extend(Self::validate_circuit_breaker(
            "circuit_breaker",
            &config.circuit_breaker,
        ));
        errors.extend(Self::validate_rate_limit("rate_limit", &config.rate_limit));

        match config.metrics.reporting_period() {
            Ok(period) if period.is_zero() => errors.push(Self::invalid(
                "metrics.reporting_period",
                "Reporting period must be greater than 0",
            )),
            Ok(_) => {}
            Err(message) => errors.push(Self::invalid("metrics.reporting_period", message)),
        }

        if config.admin.enabled && !config.admin.prefix.starts_with('/') {
            errors.push(Self::invalid("admin.prefix", "Admin prefix must start with '/'"));
        }

        for (name, service) in &config.services {
            errors.extend(Self::validate_service(name, service));
        }

        if config.routes.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "routes".to_string(),
            });
        } else {
            errors.extend(Self::validate_routes(config));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn invalid(field: impl Into<String>, message: impl Into<String>) -> ValidationError {
        ValidationError::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "host must be an IP address and port a valid u16 (e.g. '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_registry(registry: &RegistryConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_url(&registry.url, "registry.url") {
            errors.push(e);
        }
        if let Err(message) = Self::positive_duration(registry.poll_interval()) {
            errors.push(Self::invalid("registry.poll_interval", message));
        }
        if let Err(message) = registry.timeout() {
            errors.push(Self::invalid("registry.timeout", message));
        }

        if let Some(instance) = &registry.instance {
            if instance.app_name.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: "registry.instance.app_name".to_string(),
                });
            }
            if instance.instance_ip.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: "registry.instance.instance_ip".to_string(),
                });
            }
            if let Err(message) = Self::positive_duration(instance.heartbeat_interval()) {
                errors.push(Self::invalid("registry.instance.heartbeat_interval", message));
            }
        }

        errors
    }

    fn validate_circuit_breaker(scope: &str, config: &CircuitBreakerConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if config.failure_threshold == 0 {
            errors.push(Self::invalid(
                format!("{scope}.failure_threshold"),
                "Failure threshold must be greater than 0",
            ));
        }
        if let Err(message) = config.reset_timeout() {
            errors.push(Self::invalid(format!("{scope}.reset_timeout"), message));
        }
        if !(400..=599).contains(&config.failure_status) {
            errors.push(Self::invalid(
                format!("{scope}.failure_status"),
                format!(
                    "Failure status must be an error status (400-599), got {}",
                    config.failure_status
                ),
            ));
        }

        errors
    }

    /// Validate rate limit configuration
    fn validate_rate_limit(scope: &str, config: &RateLimitConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if config.requests == 0 {
            errors.push(Self::invalid(
                format!("{scope}.requests"),
                "Rate limit requests must be greater than 0",
            ));
        }
        if let Err(message) = Self::positive_duration(config.period()) {
            errors.push(Self::invalid(format!("{scope}.period"), message));
        }
        if StatusCode::from_u16(config.status_code).is_err() {
            errors.push(Self::invalid(
                format!("{scope}.status_code"),
                format!("Invalid status code: {}", config.status_code),
            ));
        }

        errors
    }

    fn validate_service(name: &str, service: &ServiceConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let scope = format!("services.{name}");

        if name.trim().is_empty() {
            errors.push(Self::invalid("services", "Service names cannot be empty"));
        }

        if let Some(url) = &service.fallback_url {
            if let Err(e) = Self::validate_url(url, &format!("{scope}.fallback_url")) {
                errors.push(e);
            }
        }

        if service.aliases.iter().any(|alias| alias.trim().is_empty()) {
            errors.push(Self::invalid(
                format!("{scope}.aliases"),
                "Aliases cannot be empty",
            ));
        }

        if let Some(breaker) = &service.circuit_breaker {
            errors.extend(Self::validate_circuit_breaker(
                &format!("{scope}.circuit_breaker"),
                breaker,
            ));
        }

        if let Some(rate_limit) = &service.rate_limit {
            errors.extend(Self::validate_rate_limit(
                &format!("{scope}.rate_limit"),
                rate_limit,
            ));
        }

        if let PathRewrite::LastSegment { keep_parent } = &service.path_rewrite {
            if keep_parent
                .iter()
                .any(|segment| segment.is_empty() || segment.contains('/'))
            {
                errors.push(Self::invalid(
                    format!("{scope}.path_rewrite.keep_parent"),
                    "Entries must be single, non-empty path segments",
                ));
            }
        }

        errors
    }

    fn validate_routes(config: &ServerConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for route in &config.routes {
            if !route.path.starts_with('/') {
                errors.push(Self::invalid(
                    format!("route path: {}", route.path),
                    "Route paths must start with '/'",
                ));
            }
            if route.service.trim().is_empty() {
                errors.push(Self::invalid(
                    format!("route '{}' service", route.path),
                    "Routes must name a target service",
                ));
            }
            for method in &route.methods {
                if Method::from_bytes(method.to_ascii_uppercase().as_bytes()).is_err() {
                    errors.push(Self::invalid(
                        format!("route '{}' methods", route.path),
                        format!("Invalid HTTP method '{method}'"),
                    ));
                }
            }
            if config.admin.enabled && route.path.starts_with(&config.admin.prefix) {
                errors.push(ValidationError::RouteConflict {
                    message: format!(
                        "route '{}' is shadowed by the admin prefix '{}'",
                        route.path, config.admin.prefix
                    ),
                });
            }
        }

        if errors.is_empty() {
            if let Err(e) = RouteTable::from_config(&config.routes) {
                errors.push(ValidationError::RouteConflict {
                    message: e.to_string(),
                });
            }
        }

        errors
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn positive_duration(parsed: Result<Duration, String>) -> Result<(), String> {
        match parsed {
            Ok(duration) if duration.is_zero() => Err("Duration must be greater than 0".to_string()),
            Ok(_) => Ok(()),
            Err(message) => Err(message),
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        let mut message = format!("Found {} configuration error(s):", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("\n  {}. {}", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{RouteConfig, ServiceConfig};

    fn valid_config() -> ServerConfig {
        ServerConfig::builder()
            .host("127.0.0.1")
            .port(8080)
            .service(
                "BACKEND-SERVICE",
                ServiceConfig::with_fallback("http://backend:8080"),
            )
            .route(RouteConfig::new("/api/login", "BACKEND-SERVICE"))
            .route(RouteConfig::new("/api/courses/{id}", "BACKEND-SERVICE").rate_limited())
            .build()
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(ServerConfigValidator::validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_routes() {
        let config = ServerConfig::default();
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("routes"));
    }

    #[test]
    fn test_invalid_fallback_url_and_threshold_reported_together() {
        let mut config = valid_config();
        config.services.insert(
            "EXECUTOR-SVC".to_string(),
            ServiceConfig::with_fallback("ftp://executor"),
        );
        config.circuit_breaker.failure_threshold = 0;

        let message = ServerConfigValidator::validate(&config)
            .unwrap_err()
            .to_string();
        assert!(message.contains("Found 2 configuration error(s)"));
        assert!(message.contains("fallback_url"));
        assert!(message.contains("failure_threshold"));
    }

    #[test]
    fn test_invalid_rate_limit_period() {
        let mut config = valid_config();
        config.rate_limit.period = "soon".to_string();
        let message = ServerConfigValidator::validate(&config)
            .unwrap_err()
            .to_string();
        assert!(message.contains("rate_limit.period"));
    }

    #[test]
    fn test_invalid_method_and_relative_path() {
        let mut config = valid_config();
        config
            .routes
            .push(RouteConfig::new("api/profile", "BACKEND-SERVICE").methods(["FETCH ME"]));
        let message = ServerConfigValidator::validate(&config)
            .unwrap_err()
            .to_string();
        assert!(message.contains("must start with '/'"));
        assert!(message.contains("Invalid HTTP method"));
    }

    #[test]
    fn test_route_shadowed_by_admin_prefix() {
        let mut config = valid_config();
        config
            .routes
            .push(RouteConfig::new("/admin/scaling/extra", "BACKEND-SERVICE"));
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("admin prefix"));
    }
}
