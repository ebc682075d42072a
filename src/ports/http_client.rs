use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Failure to obtain any response from a backend.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Connection refused, reset, DNS failure and similar transport errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// No response within the client-side timeout
    #[error("Timeout error after {0} seconds")]
    Timeout(u64),

    /// The outbound request could not be built or sent as is
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Outbound port used by the proxy to reach backend instances.
///
/// Any response that arrives, whatever its status, is `Ok`. Classifying statuses as
/// failures is the caller's business.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
