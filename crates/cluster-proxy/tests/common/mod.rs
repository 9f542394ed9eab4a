//! Shared fixtures for the integration tests: throwaway upstream clusters,
//! a proxy server on an ephemeral port, and instrumented collaborators.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::{Json, Router};
use serde_json::{json, Value};

use cluster_proxy::server::{build_app, DEFAULT_MOUNT_PATH};
use cluster_proxy::{
    AuthenticationStrategy, ClusterDetails, Credential, Error, KubernetesProxy,
    KubernetesProxyOptions, PermissionEvaluator, ProxyConfig, RequestAuth, StaticClusterSupplier,
};

pub const CLUSTER_HEADER: &str = "Backstage-Kubernetes-Cluster";
pub const OVERRIDE_HEADER: &str = "Backstage-Kubernetes-Authorization";

/// Serve `app` on 127.0.0.1 with an OS-assigned port
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

/// Upstream that answers every request with a JSON description of what it
/// received, and counts requests
pub struct RecordingUpstream {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl RecordingUpstream {
    pub async fn start() -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().fallback(record).with_state(hits.clone());
        Self {
            addr: serve(app).await,
            hits,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn record(
    State(hits): State<Arc<AtomicUsize>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    let names: Vec<String> = headers.keys().map(|k| k.as_str().to_string()).collect();
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "host": header("host"),
        "authorization": header("authorization"),
        "authorization_bytes": headers.get("authorization").map(|v| v.as_bytes().to_vec()),
        "headers": names,
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Proxy mounted at the default mount path, served on an ephemeral port
pub async fn start_proxy(
    clusters: Vec<ClusterDetails>,
    strategy: Arc<dyn AuthenticationStrategy>,
    permissions: Arc<dyn PermissionEvaluator>,
) -> String {
    let proxy = KubernetesProxy::new(KubernetesProxyOptions {
        cluster_supplier: Arc::new(StaticClusterSupplier::new(clusters)),
        auth_strategy: strategy,
        config: ProxyConfig::default(),
    });
    let app = build_app(DEFAULT_MOUNT_PATH, &proxy, permissions).unwrap();
    let addr = serve(app).await;
    format!("http://{}{}", addr, DEFAULT_MOUNT_PATH)
}

/// What [`CountingStrategy`] hands out
#[derive(Clone)]
pub enum StrategyOutcome {
    Bearer(&'static str),
    Anonymous,
    Fail,
}

/// Strategy that records how often it was asked for a credential
pub struct CountingStrategy {
    outcome: StrategyOutcome,
    calls: AtomicUsize,
}

impl CountingStrategy {
    pub fn new(outcome: StrategyOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthenticationStrategy for CountingStrategy {
    async fn get_credential(
        &self,
        _cluster: &ClusterDetails,
        _auth: &RequestAuth,
    ) -> cluster_proxy::Result<Credential> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            StrategyOutcome::Bearer(token) => Ok(Credential::bearer(token)),
            StrategyOutcome::Anonymous => Ok(Credential::Anonymous),
            StrategyOutcome::Fail => Err(Error::Internal("token source unavailable".into())),
        }
    }

    fn validate_cluster(&self, _cluster: &ClusterDetails) -> Vec<Error> {
        Vec::new()
    }
}
