//! WebSocket relay
//!
//! Instead of terminating the WebSocket, the proxy forwards the HTTP upgrade
//! handshake to the cluster and, once both sides have switched protocols,
//! bridges the two raw byte streams. Frames are never parsed, so any
//! subprotocol (`v4.channel.k8s.io`, `base64.channel.k8s.io`, ...) works.
//!
//! The upstream handshake completes before the caller gets its `101`. If the
//! cluster refuses the upgrade, its response is relayed as a normal HTTP
//! response and the caller's connection is never upgraded.

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::request::Parts;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tracing::{debug, error, info, instrument};

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::forwarder::{
    build_streaming_response, build_upstream_request, UpgradeResponse, UpgradedIo, UpstreamClient,
    UpstreamRequest,
};
use crate::headers::WEBSOCKET_HANDSHAKE_HEADERS;
use crate::proxy::ResolvedTarget;

/// Relay a WebSocket upgrade request to the resolved cluster
#[instrument(skip_all, fields(cluster = %target.cluster.name))]
pub async fn relay_upgrade(
    client: &dyn UpstreamClient,
    target: &ResolvedTarget,
    mut request: Request<Body>,
    config: &ProxyConfig,
) -> Result<Response<Body>> {
    // The caller's connection switches once we answer 101
    let incoming = hyper::upgrade::on(&mut request);
    let (parts, _) = request.into_parts();
    let upstream = build_upgrade_request(target, &parts, config)?;

    debug!(url = %upstream.url, "Connecting upgrade to cluster");
    match client.upgrade(&target.cluster, upstream).await? {
        UpgradeResponse::Rejected(response) => {
            debug!(status = %response.status, "Cluster refused upgrade");
            build_streaming_response(response)
        }
        UpgradeResponse::Switched { headers, io } => {
            let mut builder = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
            if let Some(response_headers) = builder.headers_mut() {
                *response_headers = headers;
            }
            let response = builder
                .body(Body::empty())
                .map_err(|e| Error::Internal(format!("Failed to build upgrade response: {}", e)))?;

            tokio::spawn(bridge(incoming, io, target.cluster.name.clone()));
            Ok(response)
        }
    }
}

/// Upstream handshake request: the normal sanitized request plus the
/// upgrade headers hygiene strips
fn build_upgrade_request(
    target: &ResolvedTarget,
    parts: &Parts,
    config: &ProxyConfig,
) -> Result<UpstreamRequest> {
    let mut upstream = build_upstream_request(target, parts, Body::empty(), config)?;
    upstream.timeout = None;

    let upgrade = parts
        .headers
        .get(header::UPGRADE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("websocket"));
    upstream
        .headers
        .insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    upstream.headers.insert(header::UPGRADE, upgrade);

    for name in WEBSOCKET_HANDSHAKE_HEADERS {
        upstream.headers.remove(*name);
        for value in parts.headers.get_all(*name) {
            upstream.headers.append(*name, value.clone());
        }
    }

    Ok(upstream)
}

/// Copy bytes both ways until either side closes
async fn bridge(incoming: OnUpgrade, mut upstream: Box<dyn UpgradedIo>, cluster: String) {
    match incoming.await {
        Ok(upgraded) => {
            // hyper::Upgraded needs TokioIo adapter for tokio AsyncRead/Write
            let mut client = TokioIo::new(upgraded);
            debug!(cluster = %cluster, "WebSocket relay established");

            match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                Ok((from_client, from_cluster)) => {
                    info!(cluster = %cluster, from_client, from_cluster, "WebSocket session ended");
                }
                Err(e) => {
                    debug!(cluster = %cluster, error = %e, "WebSocket relay error");
                }
            }
        }
        Err(e) => {
            error!(cluster = %cluster, error = %e, "Failed to upgrade incoming connection");
        }
    }
}
