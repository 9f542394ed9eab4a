//! Header hygiene
//!
//! Decides which inbound headers reach the upstream cluster. Proxy control
//! headers, caller credentials and hop-by-hop headers never leave the proxy.

use axum::http::header::{self, HeaderMap};

use crate::config::ProxyConfig;
use crate::credential::Credential;

/// Connection-scoped headers, never forwarded in either direction
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Client handshake headers re-attached to an upstream upgrade request
pub(crate) const WEBSOCKET_HANDSHAKE_HEADERS: &[&str] = &[
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-protocol",
    "sec-websocket-extensions",
];

/// Check if headers request a WebSocket upgrade
pub fn has_websocket_upgrade_headers(headers: &HeaderMap) -> bool {
    let has_upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    let has_connection = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("upgrade"));

    has_upgrade && has_connection
}

/// Ready-made credential from the override header, if the caller sent one
///
/// The raw header bytes are kept, so values outside visible ASCII are still
/// forwarded exactly as received.
pub fn override_credential(headers: &HeaderMap, config: &ProxyConfig) -> Option<Credential> {
    headers
        .get(config.auth_override_header.as_str())
        .map(|v| v.as_bytes())
        .filter(|v| !v.is_empty())
        .map(Credential::raw)
}

/// Copy of `inbound` with everything that must not reach the cluster removed
///
/// Strips the selector header, the override header, every
/// `<override-header>-*` auth context header, the caller's `Authorization`,
/// `Host`, hop-by-hop headers and any header named in `Connection`.
pub fn upstream_request_headers(inbound: &HeaderMap, config: &ProxyConfig) -> HeaderMap {
    let auth_prefix = config.auth_provider_prefix();
    let connection_listed = connection_tokens(inbound);

    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        let lower = name.as_str();
        let strip = lower == "authorization"
            || lower == "host"
            || HOP_BY_HOP_HEADERS.contains(&lower)
            || lower.eq_ignore_ascii_case(&config.cluster_header)
            || lower.eq_ignore_ascii_case(&config.auth_override_header)
            || lower.starts_with(auth_prefix.as_str())
            || connection_listed.iter().any(|t| t == lower);
        if !strip {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Copy of upstream response headers without hop-by-hop headers
pub fn downstream_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let connection_listed = connection_tokens(upstream);

    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        let lower = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&lower) || connection_listed.iter().any(|t| t == lower) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Lowercase header names listed in `Connection`, minus the `upgrade`/`close`
/// keywords
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty() && t != "upgrade" && t != "close" && t != "keep-alive")
        .collect()
}
