//! Upstream request forwarding
//!
//! Sends a resolved request to its cluster and relays the response back
//! unchanged: any status code, every end-to-end header, and the body as a
//! stream. Neither direction is buffered, so watch streams and log follows
//! flow through as the cluster produces them.
//!
//! # Dependency Injection
//!
//! All network I/O goes through [`UpstreamClient`]. [`ReqwestUpstreamClient`]
//! is the real implementation; tests substitute a mock.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes, HttpBody};
use axum::http::header::{self, HeaderMap};
use axum::http::request::Parts;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use futures::{Stream, TryStreamExt};
use reqwest::Url;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::client_pool::ClientPool;
use crate::cluster::ClusterDetails;
use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::headers::{downstream_response_headers, upstream_request_headers};
use crate::proxy::ResolvedTarget;
use crate::routing::{build_target_url, is_watch_query};

// ============================================================================
// Types
// ============================================================================

/// Response body chunks from the upstream cluster
pub type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>>;

/// Bidirectional byte stream left over after a successful upgrade
pub trait UpgradedIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> UpgradedIo for T {}

/// Request as it will be sent to the cluster
pub struct UpstreamRequest {
    /// HTTP method
    pub method: Method,
    /// Full target URL
    pub url: Url,
    /// Sanitized headers plus the resolved `Authorization`
    pub headers: HeaderMap,
    /// Request body, streamed
    pub body: Body,
    /// Deadline for the whole exchange; `None` for long-lived streams
    pub timeout: Option<Duration>,
}

/// Response from the cluster, body not yet consumed
pub struct UpstreamResponse {
    /// Status code, passed through as-is
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: ByteStream,
}

/// Outcome of an upgrade handshake with the cluster
pub enum UpgradeResponse {
    /// Cluster answered `101 Switching Protocols`
    Switched {
        /// Handshake response headers
        headers: HeaderMap,
        /// Upgraded connection to the cluster
        io: Box<dyn UpgradedIo>,
    },
    /// Cluster answered with anything else
    Rejected(UpstreamResponse),
}

// ============================================================================
// Traits for Dependency Injection
// ============================================================================

/// Network client for talking to clusters
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send a plain HTTP request
    async fn send(&self, cluster: &ClusterDetails, request: UpstreamRequest) -> Result<UpstreamResponse>;

    /// Perform an HTTP/1.1 upgrade handshake
    async fn upgrade(&self, cluster: &ClusterDetails, request: UpstreamRequest) -> Result<UpgradeResponse>;
}

/// [`UpstreamClient`] backed by per-cluster `reqwest` clients
#[derive(Clone, Debug)]
pub struct ReqwestUpstreamClient {
    pool: Arc<ClientPool>,
}

impl ReqwestUpstreamClient {
    /// Create a client with its own [`ClientPool`]
    pub fn new(connect_timeout: Duration) -> Self {
        Self::with_pool(Arc::new(ClientPool::new(connect_timeout)))
    }

    /// Create a client sharing an existing pool
    pub fn with_pool(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstreamClient {
    async fn send(&self, cluster: &ClusterDetails, request: UpstreamRequest) -> Result<UpstreamResponse> {
        let clients = self.pool.clients_for(cluster).await?;

        let mut builder = clients
            .http
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if !request.body.is_end_stream() {
            builder = builder.body(reqwest::Body::wrap_stream(request.body.into_data_stream()));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Proxy(format!("failed to reach cluster '{}': {}", cluster.name, e)))?;

        Ok(into_upstream_response(response))
    }

    async fn upgrade(&self, cluster: &ClusterDetails, request: UpstreamRequest) -> Result<UpgradeResponse> {
        let clients = self.pool.clients_for(cluster).await?;

        let response = clients
            .upgrade
            .request(request.method, request.url)
            .headers(request.headers)
            .send()
            .await
            .map_err(|e| {
                Error::Proxy(format!(
                    "failed to reach cluster '{}' for upgrade: {}",
                    cluster.name, e
                ))
            })?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Ok(UpgradeResponse::Rejected(into_upstream_response(response)));
        }

        let headers = response.headers().clone();
        let io = response
            .upgrade()
            .await
            .map_err(|e| Error::Proxy(format!("failed to upgrade upstream connection: {}", e)))?;

        Ok(UpgradeResponse::Switched {
            headers,
            io: Box::new(io),
        })
    }
}

fn into_upstream_response(response: reqwest::Response) -> UpstreamResponse {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes_stream().map_err(std::io::Error::other);
    UpstreamResponse {
        status,
        headers,
        body: Box::pin(body),
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Forward a plain HTTP request to the resolved cluster
pub async fn forward_http(
    client: &dyn UpstreamClient,
    target: &ResolvedTarget,
    request: Request<Body>,
    config: &ProxyConfig,
) -> Result<Response<Body>> {
    let (parts, body) = request.into_parts();
    let upstream = build_upstream_request(target, &parts, body, config)?;

    debug!(
        cluster = %target.cluster.name,
        method = %upstream.method,
        url = %upstream.url,
        streaming = upstream.timeout.is_none(),
        "Forwarding request"
    );

    let response = client.send(&target.cluster, upstream).await?;
    build_streaming_response(response)
}

/// Turn inbound request parts into the upstream request for `target`
pub fn build_upstream_request(
    target: &ResolvedTarget,
    parts: &Parts,
    body: Body,
    config: &ProxyConfig,
) -> Result<UpstreamRequest> {
    let query = parts.uri.query();
    let url = build_target_url(&target.cluster.url, parts.uri.path(), query)?;

    let mut headers = upstream_request_headers(&parts.headers, config);
    if let Some(value) = target.credential.authorization_value()? {
        headers.insert(header::AUTHORIZATION, value);
    }

    let timeout = if is_watch_query(query) {
        None
    } else {
        config.request_timeout
    };

    Ok(UpstreamRequest {
        method: parts.method.clone(),
        url,
        headers,
        body,
        timeout,
    })
}

/// Relay an upstream response to the caller without buffering
pub fn build_streaming_response(response: UpstreamResponse) -> Result<Response<Body>> {
    debug!(status = %response.status, "Relaying upstream response");

    let mut builder = Response::builder().status(response.status);
    if let Some(headers) = builder.headers_mut() {
        *headers = downstream_response_headers(&response.headers);
    }

    builder
        .body(Body::from_stream(response.body))
        .map_err(|e| Error::Internal(format!("Failed to build response: {}", e)))
}
