//! Axum middleware attached around every gateway route.
//!
//! Stateless layers: access logging with request metrics, request IDs, and the fixed set of
//! security and CORS response headers.
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use crate::metrics::{RequestTimer, increment_request_total};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const SECURITY_HEADERS: [(&str, &str); 8] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("content-security-policy", "default-src 'self'"),
    ("access-control-allow-origin", "*"),
    (
        "access-control-allow-methods",
        "GET, POST, PUT, DELETE, OPTIONS",
    ),
    ("access-control-allow-headers", "Authorization, Content-Type"),
    ("access-control-max-age", "86400"),
];

/// One access log line per request: method, path, client address, status and latency.
pub async fn request_logging_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string());
    let timer = RequestTimer::new(&path, method.as_str());

    let response = next.run(req).await;
    let status = response.status();
    let latency = timer.elapsed();
    increment_request_total(&path, method.as_str(), status.as_u16());

    if status.is_server_error() {
        tracing::warn!(%method, %path, %client, status = status.as_u16(), ?latency, "request completed");
    } else {
        tracing::info!(%method, %path, %client, status = status.as_u16(), ?latency, "request completed");
    }

    response
}

/// Tag the request with an `X-Request-ID`, reusing the caller's when present.
///
/// The ID is forwarded to the backend, recorded on the request span and echoed on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        req.headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value.clone());
    }

    let span = tracing::info_span!("request", request_id = %request_id);
    let mut response = next.run(req).instrument(span).await;

    if let Some(value) = header_value {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    response
}

/// Add hardening and permissive CORS headers to every response.
///
/// Values already present, e.g. set by a proxied backend, are left as they are.
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    for (name, value) in SECURITY_HEADERS {
        headers
            .entry(HeaderName::from_static(name))
            .or_insert(HeaderValue::from_static(value));
    }

    response
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::StatusCode, middleware, routing::get};
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|req: Request| async move {
                    req.headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                }),
            )
            .route(
                "/boom",
                get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
            )
            .route(
                "/embeddable",
                get(|| async {
                    (
                        [
                            ("x-frame-options", "SAMEORIGIN"),
                            ("access-control-allow-origin", "https://lms.example.com"),
                        ],
                        "widget",
                    )
                }),
            )
            .layer(middleware::from_fn(security_headers_middleware))
            .layer(middleware::from_fn(request_logging_middleware))
            .layer(middleware::from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn test_security_headers_middleware() {
        let response = app()
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let headers = response.headers();
        assert_eq!(headers["X-Content-Type-Options"], "nosniff");
        assert_eq!(headers["X-Frame-Options"], "DENY");
        assert_eq!(headers["X-XSS-Protection"], "1; mode=block");
        assert_eq!(headers["Content-Security-Policy"], "default-src 'self'");
        assert_eq!(headers["Access-Control-Allow-Origin"], "*");
        assert_eq!(
            headers["Access-Control-Allow-Methods"],
            "GET, POST, PUT, DELETE, OPTIONS"
        );
        assert_eq!(
            headers["Access-Control-Allow-Headers"],
            "Authorization, Content-Type"
        );
        assert_eq!(headers["Access-Control-Max-Age"], "86400");
    }

    #[tokio::test]
    async fn test_backend_security_headers_preserved() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/embeddable")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers["X-Frame-Options"], "SAMEORIGIN");
        assert_eq!(headers["Access-Control-Allow-Origin"], "https://lms.example.com");
        assert_eq!(headers.get_all("X-Frame-Options").iter().count(), 1);
        // Headers the backend did not set are still filled in.
        assert_eq!(headers["X-Content-Type-Options"], "nosniff");
    }

    #[tokio::test]
    async fn test_request_id_generated_and_forwarded() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let request_id = response.headers()[REQUEST_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();
        assert!(uuid::Uuid::parse_str(&request_id).is_ok());

        use http_body_util::BodyExt;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, request_id.as_bytes());
    }

    #[tokio::test]
    async fn test_request_id_reused_from_caller() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("X-Request-ID", "trace-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "trace-42");
    }
}
