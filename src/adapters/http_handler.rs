//! Inbound HTTP surface of the gateway.
//!
//! [`HttpHandler`] runs the per-request proxy pipeline:
//!
//! 1. resolve the route table entry (404 / 405 when nothing matches);
//! 2. apply the service's rate limiter on limited routes;
//! 3. ask the service's circuit breaker for admission (503 when open);
//! 4. resolve a base URL from the registry view or the fallback table (500 when none);
//! 5. rewrite the path, forward, classify the outcome for the breaker and metrics window.
//!
//! [`router`] assembles the axum application around it: `/health`, `/metrics`, the admin
//! routes and the middleware stack.
use std::{sync::Arc, time::Instant};

use axum::{
    Json, Router,
    body::Body as AxumBody,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode, Uri, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::{
    adapters::{admin, middleware as gateway_middleware},
    core::{
        error::GatewayError, gateway::GatewayService, path_rewrite::rewrite_path,
        rate_limiter::client_ip, router::RouteMatch,
    },
    metrics,
    ports::http_client::HttpClient,
};

/// Connection-scoped headers that are never forwarded.
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

pub struct HttpHandler {
    gateway: Arc<GatewayService>,
    http_client: Arc<dyn HttpClient>,
}

impl HttpHandler {
    pub fn new(gateway: Arc<GatewayService>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            gateway,
            http_client,
        }
    }

    pub fn gateway(&self) -> &Arc<GatewayService> {
        &self.gateway
    }

    /// Route, admit and forward one inbound request.
    pub async fn handle_request(&self, req: Request) -> Result<Response, GatewayError> {
        let (service, rate_limited) = match self
            .gateway
            .routes()
            .resolve(req.method(), req.uri().path())
        {
            RouteMatch::Found(target) => (target.service.clone(), target.rate_limited),
            RouteMatch::MethodNotAllowed => {
                return Err(GatewayError::MethodNotAllowed {
                    method: req.method().to_string(),
                    path: req.uri().path().to_string(),
                });
            }
            RouteMatch::NotFound => {
                return Err(GatewayError::RouteNotFound {
                    path: req.uri().path().to_string(),
                });
            }
        };

        if rate_limited {
            let limiter = self.gateway.rate_limiters().for_service(&service);
            if let Err(e) = limiter.check(&req) {
                metrics::increment_rate_limited(&service);
                tracing::warn!(service = %service, path = %req.uri().path(), "Rate limit exceeded");
                return Err(e);
            }
        }

        self.proxy(&service, req).await
    }

    /// Forward `req` to one instance of `service` under its circuit breaker.
    pub async fn proxy(&self, service: &str, mut req: Request) -> Result<Response, GatewayError> {
        let breaker = self.gateway.breakers().get(service).await;
        let window = self.gateway.metrics();

        if !breaker.is_allowed() {
            window.record_rejection(service);
            metrics::increment_circuit_rejection(service);
            tracing::warn!(service = %service, "Circuit breaker open, rejecting request");
            return Err(GatewayError::CircuitOpen {
                service: service.to_string(),
            });
        }

        let Some(base_url) = self.gateway.registry().service_url(service) else {
            return Err(GatewayError::ServiceUnavailable {
                service: service.to_string(),
            });
        };
        window.record_request(service);

        let policy = self.gateway.policy(service);
        let inbound_path = req.uri().path().to_string();
        let outbound_path = rewrite_path(&policy.path_rewrite, &inbound_path);

        let target = match target_uri(&base_url, &outbound_path, req.uri().query()) {
            Ok(uri) => uri,
            Err(reason) => {
                window.record_error(service);
                metrics::increment_backend_error(service, "malformed_target");
                tracing::error!(service = %service, url = %base_url, %reason, "Invalid backend URL");
                return Err(GatewayError::MalformedTarget {
                    service: service.to_string(),
                    url: base_url,
                    reason,
                });
            }
        };

        tracing::info!(
            "{} {} -> {}{}",
            req.method(),
            inbound_path,
            base_url.trim_end_matches('/'),
            outbound_path
        );

        let forwarded_for = client_ip(&req, false);
        *req.uri_mut() = target;
        prepare_outbound_headers(&mut req, forwarded_for.map(|ip| ip.to_string()));

        let method = req.method().clone();
        let started = Instant::now();
        let result = self.http_client.send_request(req).await;
        let elapsed = started.elapsed();
        window.record_response_time(service, elapsed);
        metrics::record_backend_request_duration(service, method.as_str(), elapsed);

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                metrics::increment_backend_request_total(service, method.as_str(), status);
                if status >= policy.failure_status {
                    window.record_error(service);
                    metrics::increment_backend_error(service, "status");
                    breaker.failure();
                } else {
                    breaker.success();
                }
                Ok(response)
            }
            Err(source) => {
                window.record_error(service);
                metrics::increment_backend_error(service, "transport");
                breaker.failure();
                tracing::error!(service = %service, error = %source, "Proxy request failed");
                Err(GatewayError::ProxyTransport {
                    service: service.to_string(),
                    source,
                })
            }
        }
    }
}

/// Outbound URI: scheme and authority of `base`, then the rewritten path and raw query.
fn target_uri(base: &str, path: &str, query: Option<&str>) -> Result<Uri, String> {
    let base: Uri = base.parse().map_err(|e| format!("{e}"))?;
    let scheme = base
        .scheme()
        .cloned()
        .ok_or_else(|| "missing scheme".to_string())?;
    let authority = base
        .authority()
        .cloned()
        .ok_or_else(|| "missing host".to_string())?;
    let path_and_query = match query {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };

    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| e.to_string())
}

fn prepare_outbound_headers(req: &mut Request, client: Option<String>) {
    let headers = req.headers_mut();
    for name in HOP_BY_HOP {
        headers.remove(name);
    }

    let Some(client) = client else {
        return;
    };
    let forwarded = match headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
    {
        Some(prior) => format!("{prior}, {client}"),
        None => client,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded) {
        headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
    }
}

async fn proxy_handler(
    State(handler): State<Arc<HttpHandler>>,
    req: Request,
) -> Result<Response, GatewayError> {
    handler.handle_request(req).await
}

async fn health_handler(State(handler): State<Arc<HttpHandler>>) -> impl IntoResponse {
    let registry = handler.gateway.registry();
    Json(json!({
        "status": "healthy",
        "service": "api-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "registry": registry.has_source(),
        "services": registry.all_services(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn metrics_handler(State(handler): State<Arc<HttpHandler>>) -> impl IntoResponse {
    let report = handler.gateway.metrics().snapshot();
    let breakers = handler.gateway.breakers().snapshots().await;
    Json(json!({
        "window_started_at": report.window_started_at.to_rfc3339(),
        "reporting_period_secs": report.reporting_period_secs,
        "services": report.services,
        "circuit_breakers": breakers,
    }))
}

fn panic_response(_: Box<dyn std::any::Any + Send + 'static>) -> Response<AxumBody> {
    tracing::error!("Request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal Server Error", "type": "internal_error" })),
    )
        .into_response()
}

/// The complete gateway application.
pub fn router(handler: Arc<HttpHandler>) -> Router {
    let config = handler.gateway.config();
    let admin_prefix = config.admin.prefix.trim_end_matches('/').to_string();
    let admin_enabled = config.admin.enabled && !admin_prefix.is_empty();
    let security_headers = config.security_headers;

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    if admin_enabled {
        app = app.nest(
            &admin_prefix,
            admin::router(handler.gateway.registry().clone()),
        );
    }

    let mut app = app
        .fallback(proxy_handler)
        .with_state(handler)
        .layer(CatchPanicLayer::custom(panic_response));

    if security_headers {
        app = app.layer(middleware::from_fn(
            gateway_middleware::security_headers_middleware,
        ));
    }

    app.layer(middleware::from_fn(
            gateway_middleware::request_logging_middleware,
        ))
        .layer(middleware::from_fn(gateway_middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
}
