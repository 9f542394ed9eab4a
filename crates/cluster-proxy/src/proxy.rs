//! Proxy handler factory
//!
//! [`KubernetesProxy::create_request_handler`] returns an axum [`Router`] the
//! host mounts under any prefix. Every request goes through the same pipeline:
//!
//! 1. read the cluster selector header
//! 2. fetch the cluster directory and select the target cluster
//! 3. ask the permission evaluator for `kubernetes.proxy` on that cluster
//! 4. resolve the credential (override header, else the strategy)
//! 5. forward as plain HTTP, or relay the WebSocket upgrade
//!
//! Nothing reaches the cluster unless steps 1-4 all succeed.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Extensions, HeaderMap, Request};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use tracing::{debug, instrument, warn};

use crate::client_pool::ClientPool;
use crate::cluster::{ClusterDetails, ClusterSupplier};
use crate::config::ProxyConfig;
use crate::credential::{AuthenticationStrategy, Credential, RequestAuth};
use crate::error::{Error, Result};
use crate::forwarder::{forward_http, ReqwestUpstreamClient, UpstreamClient};
use crate::headers::{has_websocket_upgrade_headers, override_credential};
use crate::permission::{AuthorizeDecision, AuthorizeRequest, PermissionEvaluator, Subject};
use crate::routing::{cluster_selector, select_cluster};
use crate::upgrade::relay_upgrade;

/// Collaborators and settings for a [`KubernetesProxy`]
#[derive(Clone)]
pub struct KubernetesProxyOptions {
    /// Source of the cluster list, consulted on every request
    pub cluster_supplier: Arc<dyn ClusterSupplier>,
    /// Computes the upstream credential when no override is sent
    pub auth_strategy: Arc<dyn AuthenticationStrategy>,
    /// Header names and timeouts
    pub config: ProxyConfig,
}

/// Cluster and credential a request resolved to
#[derive(Clone, Debug)]
pub struct ResolvedTarget {
    /// Selected cluster
    pub cluster: ClusterDetails,
    /// Credential to present upstream
    pub credential: Credential,
}

/// Multi-cluster Kubernetes API proxy
#[derive(Clone)]
pub struct KubernetesProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    clusters: Arc<dyn ClusterSupplier>,
    strategy: Arc<dyn AuthenticationStrategy>,
    upstream: Arc<dyn UpstreamClient>,
    /// Set when the built-in upstream client is used, pruned per snapshot
    client_pool: Option<Arc<ClientPool>>,
    config: ProxyConfig,
}

#[derive(Clone)]
struct HandlerState {
    proxy: KubernetesProxy,
    permissions: Arc<dyn PermissionEvaluator>,
}

impl KubernetesProxy {
    /// Proxy using per-cluster `reqwest` clients for upstream I/O
    pub fn new(options: KubernetesProxyOptions) -> Self {
        let pool = Arc::new(ClientPool::new(options.config.connect_timeout));
        let upstream = Arc::new(ReqwestUpstreamClient::with_pool(pool.clone()));
        Self::build(options, upstream, Some(pool))
    }

    /// Proxy using a custom upstream client
    pub fn with_upstream_client(
        options: KubernetesProxyOptions,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self::build(options, upstream, None)
    }

    fn build(
        options: KubernetesProxyOptions,
        upstream: Arc<dyn UpstreamClient>,
        client_pool: Option<Arc<ClientPool>>,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                clusters: options.cluster_supplier,
                strategy: options.auth_strategy,
                upstream,
                client_pool,
                config: options.config,
            }),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    /// Build the request handler, mountable with [`Router::nest`]
    ///
    /// The handler sees only the sub-path below the mount point, which is
    /// appended to the selected cluster's URL.
    pub fn create_request_handler(&self, permission_api: Arc<dyn PermissionEvaluator>) -> Router {
        let state = HandlerState {
            proxy: self.clone(),
            permissions: permission_api,
        };

        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
    }

    /// Ask the strategy to check every known cluster.
    ///
    /// Meant for startup; returns all problems found rather than the first.
    pub async fn validate_clusters(&self) -> Result<Vec<Error>> {
        let clusters = self.fetch_clusters().await?;
        Ok(clusters
            .iter()
            .flat_map(|cluster| self.inner.strategy.validate_cluster(cluster))
            .collect())
    }

    /// Run routing, the permission gate and credential resolution for one
    /// request. No upstream I/O happens here.
    pub async fn resolve_request(
        &self,
        permissions: &dyn PermissionEvaluator,
        headers: &HeaderMap,
        extensions: &Extensions,
    ) -> Result<ResolvedTarget> {
        let config = &self.inner.config;

        let selector = cluster_selector(headers, &config.cluster_header)?;
        let clusters = self.fetch_clusters().await?;
        let cluster = select_cluster(clusters, selector.as_deref())?;

        let subject = Subject::from_request_parts(headers, extensions);
        authorize(permissions, &subject, &cluster).await?;

        let credential = match override_credential(headers, config) {
            Some(credential) => {
                debug!(cluster = %cluster.name, "Using override credential");
                credential
            }
            None => {
                let auth = RequestAuth::from_headers(headers, &config.auth_provider_prefix());
                self.inner
                    .strategy
                    .get_credential(&cluster, &auth)
                    .await
                    .map_err(|e| {
                        warn!(cluster = %cluster.name, error = %e, "Credential resolution failed");
                        Error::Internal(format!(
                            "failed to resolve credentials for cluster '{}'",
                            cluster.name
                        ))
                    })?
            }
        };

        Ok(ResolvedTarget {
            cluster,
            credential,
        })
    }

    async fn fetch_clusters(&self) -> Result<Vec<ClusterDetails>> {
        let clusters = self.inner.clusters.get_clusters().await.map_err(|e| {
            warn!(error = %e, "Cluster directory failed");
            match e {
                Error::DirectoryUnavailable(_) => e,
                other => Error::DirectoryUnavailable(other.to_string()),
            }
        })?;

        if let Some(pool) = &self.inner.client_pool {
            pool.retain_clusters(&clusters);
        }
        Ok(clusters)
    }
}

async fn authorize(
    permissions: &dyn PermissionEvaluator,
    subject: &Subject,
    cluster: &ClusterDetails,
) -> Result<()> {
    let decisions = permissions
        .authorize(subject, &[AuthorizeRequest::proxy(&cluster.name)])
        .await
        .map_err(|e| {
            warn!(cluster = %cluster.name, error = %e, "Permission check failed");
            Error::Internal("permission check failed".into())
        })?;

    match decisions.first() {
        Some(AuthorizeDecision::Allow) => Ok(()),
        _ => {
            warn!(
                cluster = %cluster.name,
                user = subject.identity().map(|i| i.username.as_str()).unwrap_or("<anonymous>"),
                "Proxy request denied"
            );
            Err(Error::Forbidden(format!(
                "not allowed to proxy to cluster '{}'",
                cluster.name
            )))
        }
    }
}

#[instrument(
    skip_all,
    fields(method = %request.method(), path = %request.uri().path())
)]
async fn proxy_handler(
    State(state): State<HandlerState>,
    request: Request<Body>,
) -> Result<Response<Body>> {
    let proxy = &state.proxy;
    let target = proxy
        .resolve_request(
            state.permissions.as_ref(),
            request.headers(),
            request.extensions(),
        )
        .await?;

    let upstream = proxy.inner.upstream.as_ref();
    if has_websocket_upgrade_headers(request.headers()) {
        relay_upgrade(upstream, &target, request, &proxy.inner.config).await
    } else {
        forward_http(upstream, &target, request, &proxy.inner.config).await
    }
}
