//! Standalone proxy server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use crate::error::{Error, Result};
use crate::permission::PermissionEvaluator;
use crate::proxy::KubernetesProxy;

/// Default mount point for the proxy router
pub const DEFAULT_MOUNT_PATH: &str = "/api/kubernetes/proxy";

/// Server TLS material
#[derive(Clone)]
pub struct TlsConfig {
    /// TLS certificate PEM
    pub cert_pem: String,
    /// TLS private key PEM
    pub key_pem: String,
}

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// Serve HTTPS with this material; plain HTTP when `None`
    pub tls: Option<TlsConfig>,
    /// Prefix the proxy is mounted under
    pub mount_path: String,
}

/// Build the application router: `/healthz` plus the proxy at `mount_path`
pub fn build_app(
    mount_path: &str,
    proxy: &KubernetesProxy,
    permissions: Arc<dyn PermissionEvaluator>,
) -> Result<Router> {
    if !mount_path.starts_with('/') {
        return Err(Error::Config(format!(
            "mount path '{}' must start with '/'",
            mount_path
        )));
    }

    let handler = proxy.create_request_handler(permissions);
    let mount_path = mount_path.trim_end_matches('/');
    let app = Router::new().route("/healthz", get(|| async { "ok" }));

    Ok(if mount_path.is_empty() {
        app.merge(handler)
    } else {
        app.nest(mount_path, handler)
    })
}

/// Start the proxy server and serve until the process exits
pub async fn start_server(
    config: ServerConfig,
    proxy: KubernetesProxy,
    permissions: Arc<dyn PermissionEvaluator>,
) -> Result<()> {
    let app = build_app(&config.mount_path, &proxy, permissions)?;

    match config.tls {
        Some(tls) => {
            let tls_config =
                RustlsConfig::from_pem(tls.cert_pem.into_bytes(), tls.key_pem.into_bytes())
                    .await
                    .map_err(|e| Error::Config(format!("TLS config error: {}", e)))?;

            info!(addr = %config.addr, mount_path = %config.mount_path, "Starting proxy server (TLS)");
            axum_server::bind_rustls(config.addr, tls_config)
                .serve(app.into_make_service())
                .await
        }
        None => {
            info!(addr = %config.addr, mount_path = %config.mount_path, "Starting proxy server");
            axum_server::bind(config.addr)
                .serve(app.into_make_service())
                .await
        }
    }
    .map_err(|e| Error::Internal(format!("Server error: {}", e)))
}
