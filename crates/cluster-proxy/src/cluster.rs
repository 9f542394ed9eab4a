//! Cluster directory
//!
//! The proxy never owns the list of clusters. It asks a [`ClusterSupplier`] for
//! a fresh snapshot on every request, so membership can change between requests
//! without any cache invalidation inside the proxy.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Name of the cluster exposed by [`LocalKubectlProxyLocator`]
pub const LOCAL_CLUSTER_NAME: &str = "local";

/// Default address of `kubectl proxy`
pub const LOCAL_KUBECTL_PROXY_URL: &str = "http://localhost:8001";

/// One addressable upstream Kubernetes API endpoint
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDetails {
    /// Unique cluster name, matched against the selector header
    pub name: String,
    /// Base URL of the API server; may carry a path prefix (`https://host/subpath`)
    pub url: String,
    /// PEM CA bundle to trust for this cluster instead of the system roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    /// Base64-encoded PEM CA bundle, used when `ca_file` is not set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_data: Option<String>,
    /// Disable upstream certificate verification
    #[serde(default, rename = "skipTLSVerify")]
    pub skip_tls_verify: bool,
    /// Strategy-specific metadata (e.g. `kubernetes.io/auth-provider`)
    #[serde(default)]
    pub auth_metadata: HashMap<String, String>,
    /// Skip auxiliary metrics probing for this cluster
    #[serde(default)]
    pub skip_metrics_lookup: bool,
}

impl ClusterDetails {
    /// Create cluster details with just a name and URL
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the CA file
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Add one auth metadata entry
    pub fn with_auth_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_metadata.insert(key.into(), value.into());
        self
    }
}

/// Source of the current set of known clusters
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterSupplier: Send + Sync {
    /// Return the current cluster snapshot
    async fn get_clusters(&self) -> Result<Vec<ClusterDetails>>;
}

/// Fixed, in-memory cluster list
#[derive(Clone, Debug, Default)]
pub struct StaticClusterSupplier {
    clusters: Vec<ClusterDetails>,
}

impl StaticClusterSupplier {
    /// Create a supplier that always returns `clusters`
    pub fn new(clusters: Vec<ClusterDetails>) -> Self {
        Self { clusters }
    }
}

#[async_trait]
impl ClusterSupplier for StaticClusterSupplier {
    async fn get_clusters(&self) -> Result<Vec<ClusterDetails>> {
        Ok(self.clusters.clone())
    }
}

/// Single cluster reached through a local `kubectl proxy`
///
/// `kubectl proxy` already authenticates, so the cluster carries no auth
/// metadata and is meant to be paired with the anonymous strategy.
#[derive(Clone, Debug, Default)]
pub struct LocalKubectlProxyLocator;

#[async_trait]
impl ClusterSupplier for LocalKubectlProxyLocator {
    async fn get_clusters(&self) -> Result<Vec<ClusterDetails>> {
        Ok(vec![ClusterDetails {
            skip_metrics_lookup: true,
            ..ClusterDetails::new(LOCAL_CLUSTER_NAME, LOCAL_KUBECTL_PROXY_URL)
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_kubectl_proxy_locator() {
        let clusters = LocalKubectlProxyLocator.get_clusters().await.unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name, "local");
        assert_eq!(clusters[0].url, "http://localhost:8001");
        assert!(clusters[0].auth_metadata.is_empty());
        assert!(clusters[0].ca_file.is_none());
    }

    #[test]
    fn test_cluster_details_deserialize_camel_case() {
        let json = r#"{
            "name": "prod",
            "url": "https://prod.example.com/k8s",
            "caFile": "/etc/ca.pem",
            "skipTLSVerify": true,
            "authMetadata": {"kubernetes.io/auth-provider": "oidc"},
            "skipMetricsLookup": true
        }"#;

        let cluster: ClusterDetails = serde_json::from_str(json).unwrap();
        assert_eq!(cluster.name, "prod");
        assert_eq!(cluster.ca_file, Some(PathBuf::from("/etc/ca.pem")));
        assert!(cluster.skip_tls_verify);
        assert!(cluster.skip_metrics_lookup);
        assert_eq!(
            cluster.auth_metadata.get("kubernetes.io/auth-provider"),
            Some(&"oidc".to_string())
        );
    }

    #[test]
    fn test_cluster_details_defaults() {
        let cluster: ClusterDetails =
            serde_json::from_str(r#"{"name":"a","url":"http://a"}"#).unwrap();
        assert_eq!(cluster, ClusterDetails::new("a", "http://a"));
    }
}
