//! Multi-cluster Kubernetes API proxy
//!
//! Exposes any number of remote Kubernetes API servers behind one mount
//! point. Each request names its target cluster in a header; the proxy checks
//! the caller's permission, attaches that cluster's credential and relays the
//! request, including WebSocket upgrades for exec/attach/port-forward.
//!
//! # Architecture
//!
//! ```text
//! client ──► router ──► permission gate ──► credential ──► forwarder ──► cluster
//!            (select)   (kubernetes.proxy)  (strategy or    (HTTP or
//!                                            override)       upgrade relay)
//! ```
//!
//! The cluster directory ([`ClusterSupplier`]), the credential strategy
//! ([`AuthenticationStrategy`]) and the permission evaluator
//! ([`PermissionEvaluator`]) are traits supplied by the host.
//!
//! # Mounting
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::Router;
//! use cluster_proxy::{
//!     AnonymousStrategy, KubernetesProxy, KubernetesProxyOptions, LocalKubectlProxyLocator,
//!     ProxyConfig, StaticPermissionEvaluator,
//! };
//!
//! let proxy = KubernetesProxy::new(KubernetesProxyOptions {
//!     cluster_supplier: Arc::new(LocalKubectlProxyLocator),
//!     auth_strategy: Arc::new(AnonymousStrategy),
//!     config: ProxyConfig::default(),
//! });
//! let app: Router = Router::new().nest(
//!     "/api/kubernetes/proxy",
//!     proxy.create_request_handler(Arc::new(StaticPermissionEvaluator::allow_all())),
//! );
//! ```

#![deny(missing_docs)]

pub mod client_pool;
pub mod cluster;
pub mod config;
pub mod credential;
pub mod error;
pub mod forwarder;
pub mod headers;
pub mod permission;
pub mod proxy;
pub mod routing;
pub mod server;
pub mod telemetry;
pub mod upgrade;

pub use cluster::{ClusterDetails, ClusterSupplier, LocalKubectlProxyLocator, StaticClusterSupplier};
pub use config::ProxyConfig;
pub use credential::{
    AnonymousStrategy, AuthenticationStrategy, ClientTokenStrategy, Credential, DispatchStrategy,
    OidcStrategy, RequestAuth, ServiceAccountStrategy,
};
pub use error::{Error, Result};
pub use permission::{
    AuthorizeDecision, AuthorizeRequest, CedarPermissionEvaluator, PermissionEvaluator,
    StaticPermissionEvaluator, Subject, UserIdentity,
};
pub use proxy::{KubernetesProxy, KubernetesProxyOptions, ResolvedTarget};
pub use server::{start_server, ServerConfig, TlsConfig};
