//! Error types for the cluster proxy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for cluster proxy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for cluster proxy operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No cluster could be selected for the request
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    /// The request itself is malformed (e.g. repeated selector header)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authorization failed (permission evaluator denied the request)
    #[error("authorization failed: {0}")]
    Forbidden(String),

    /// The cluster directory could not produce a cluster list
    #[error("cluster directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Failed to reach the upstream cluster
    #[error("proxy error: {0}")]
    Proxy(String),

    /// Configuration error (bad CA material, colliding cluster names)
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error is surfaced as
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::ClusterNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::DirectoryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Proxy(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Return K8s-style Status response
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": self.to_string(),
            "reason": reason(&self),
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}

/// K8s `Status.reason` for each error class
fn reason(error: &Error) -> &'static str {
    match error {
        Error::ClusterNotFound(_) => "NotFound",
        Error::InvalidRequest(_) => "BadRequest",
        Error::Forbidden(_) => "Forbidden",
        Error::DirectoryUnavailable(_) => "ServiceUnavailable",
        Error::Proxy(_) | Error::Config(_) | Error::Internal(_) => "InternalError",
    }
}
