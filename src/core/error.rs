//! Per-request failures and their HTTP rendering.
//!
//! Every error produced while handling one inbound request ends up here and is turned into
//! a JSON body of the shape `{"error": <message>, "type": <kind>}`. None of them is fatal to
//! the process.
use std::time::Duration;

use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::{HeaderValue, StatusCode, header};
use serde_json::json;
use thiserror::Error;

use crate::ports::http_client::HttpClientError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The service's breaker is open; nothing was forwarded.
    #[error("Service temporarily unavailable")]
    CircuitOpen { service: String },

    /// Neither the registry nor the fallback table knows an address for the service.
    #[error("Service unavailable")]
    ServiceUnavailable { service: String },

    /// The forward itself failed (refused, reset, timed out, DNS).
    #[error("Service unavailable")]
    ProxyTransport {
        service: String,
        #[source]
        source: HttpClientError,
    },

    /// The resolved base URL could not be turned into a request target.
    #[error("Internal Server Error")]
    MalformedTarget {
        service: String,
        url: String,
        reason: String,
    },

    #[error("{message}")]
    RateLimited {
        status: StatusCode,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Not found")]
    RouteNotFound { path: String },

    #[error("Method not allowed")]
    MethodNotAllowed { method: String, path: String },
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::ServiceUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ProxyTransport { .. } => StatusCode::BAD_GATEWAY,
            Self::MalformedTarget { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RateLimited { status, .. } => *status,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::ProxyTransport { .. } => "bad_gateway",
            Self::MalformedTarget { .. } => "internal_error",
            Self::RateLimited { .. } => "too_many_requests",
            Self::RouteNotFound { .. } => "not_found",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "type": self.kind(),
        }));
        let mut response = (status, body).into_response();

        if let Self::RateLimited {
            retry_after: Some(wait),
            ..
        } = &self
        {
            // Round up so clients never retry before the window frees a slot.
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
