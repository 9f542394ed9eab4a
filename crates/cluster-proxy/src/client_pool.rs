//! Per-cluster HTTP clients
//!
//! Each cluster gets its own pair of `reqwest` clients so that its CA bundle
//! is the only trust anchor used for it. TLS material is re-read on every
//! lookup; the cached clients are reused while it stays the same and rebuilt
//! as soon as it changes.

use std::time::Duration;

use base64::Engine;
use dashmap::DashMap;
use reqwest::{Certificate, Client};
use tracing::{debug, info};

use crate::cluster::ClusterDetails;
use crate::error::{Error, Result};

/// Clients for one cluster
#[derive(Clone, Debug)]
pub struct ClusterClients {
    /// Client for plain requests (HTTP/1.1 or HTTP/2)
    pub http: Client,
    /// HTTP/1.1-only client for upgrade handshakes
    pub upgrade: Client,
}

/// TLS inputs a client was built from
#[derive(Clone, Debug, PartialEq, Eq)]
struct TlsMaterial {
    ca_pem: Option<Vec<u8>>,
    skip_tls_verify: bool,
}

#[derive(Debug)]
struct CachedClients {
    material: TlsMaterial,
    clients: ClusterClients,
}

/// Cache of [`ClusterClients`] keyed by cluster name
#[derive(Debug)]
pub struct ClientPool {
    connect_timeout: Duration,
    clients: DashMap<String, CachedClients>,
}

impl ClientPool {
    /// Create an empty pool whose clients use `connect_timeout`
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            clients: DashMap::new(),
        }
    }

    /// Clients for `cluster`, built or rebuilt as needed
    pub async fn clients_for(&self, cluster: &ClusterDetails) -> Result<ClusterClients> {
        let material = load_tls_material(cluster).await?;

        if let Some(cached) = self.clients.get(&cluster.name) {
            if cached.material == material {
                return Ok(cached.clients.clone());
            }
            info!(cluster = %cluster.name, "Cluster TLS material changed, rebuilding clients");
        }

        let clients = ClusterClients {
            http: build_client(&material, self.connect_timeout, false)?,
            upgrade: build_client(&material, self.connect_timeout, true)?,
        };
        debug!(
            cluster = %cluster.name,
            custom_ca = material.ca_pem.is_some(),
            skip_tls_verify = material.skip_tls_verify,
            "Built cluster clients"
        );

        self.clients.insert(
            cluster.name.clone(),
            CachedClients {
                material,
                clients: clients.clone(),
            },
        );
        Ok(clients)
    }

    /// Drop clients for clusters missing from `clusters`
    ///
    /// Called with each directory snapshot so removed clusters do not keep
    /// their connection pools alive.
    pub fn retain_clusters(&self, clusters: &[ClusterDetails]) {
        self.clients.retain(|name, _| {
            let keep = clusters.iter().any(|c| &c.name == name);
            if !keep {
                debug!(cluster = %name, "Dropping clients for removed cluster");
            }
            keep
        });
    }

    /// Number of clusters with cached clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are cached
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Read the cluster's CA bundle. `ca_file` takes precedence over `ca_data`.
async fn load_tls_material(cluster: &ClusterDetails) -> Result<TlsMaterial> {
    let ca_pem = if let Some(path) = &cluster.ca_file {
        let pem = tokio::fs::read(path).await.map_err(|e| {
            Error::Config(format!(
                "failed to read CA file {} for cluster '{}': {}",
                path.display(),
                cluster.name,
                e
            ))
        })?;
        Some(pem)
    } else if let Some(data) = &cluster.ca_data {
        let pem = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| {
                Error::Config(format!(
                    "invalid caData for cluster '{}': {}",
                    cluster.name, e
                ))
            })?;
        Some(pem)
    } else {
        None
    };

    Ok(TlsMaterial {
        ca_pem,
        skip_tls_verify: cluster.skip_tls_verify,
    })
}

fn build_client(material: &TlsMaterial, connect_timeout: Duration, http1_only: bool) -> Result<Client> {
    let mut builder = Client::builder().connect_timeout(connect_timeout).no_proxy();

    if let Some(pem) = &material.ca_pem {
        let certs = Certificate::from_pem_bundle(pem)
            .map_err(|e| Error::Config(format!("invalid CA certificate: {}", e)))?;
        if certs.is_empty() {
            return Err(Error::Config("CA bundle contains no certificates".into()));
        }
        // Only the cluster's own CA is trusted
        builder = builder.tls_built_in_root_certs(false);
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    if material.skip_tls_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if http1_only {
        builder = builder.http1_only();
    }

    builder
        .build()
        .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))
}
