//! cluster-proxy - standalone multi-cluster Kubernetes API proxy

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use cluster_proxy::cluster::ClusterSupplier;
use cluster_proxy::credential::AUTH_PROVIDER_KEY;
use cluster_proxy::server::DEFAULT_MOUNT_PATH;
use cluster_proxy::telemetry::{init_tracing, LogFormat, TelemetryConfig};
use cluster_proxy::{
    AnonymousStrategy, AuthenticationStrategy, CedarPermissionEvaluator, ClusterDetails,
    DispatchStrategy, KubernetesProxy, KubernetesProxyOptions, LocalKubectlProxyLocator,
    PermissionEvaluator, ProxyConfig, ServerConfig, StaticClusterSupplier,
    StaticPermissionEvaluator, TlsConfig,
};

/// Multi-cluster Kubernetes API proxy
#[derive(Parser, Debug)]
#[command(name = "cluster-proxy", version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "CLUSTER_PROXY_LISTEN_ADDR", default_value = "0.0.0.0:7007")]
    listen_addr: SocketAddr,

    /// Prefix the proxy is mounted under
    #[arg(long, env = "CLUSTER_PROXY_MOUNT_PATH", default_value = DEFAULT_MOUNT_PATH)]
    mount_path: String,

    /// TLS certificate PEM file (requires --tls-key)
    #[arg(long, env = "CLUSTER_PROXY_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// TLS private key PEM file (requires --tls-cert)
    #[arg(long, env = "CLUSTER_PROXY_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Upstream cluster as NAME=URL (repeatable). Defaults to a local
    /// `kubectl proxy` when omitted.
    #[arg(long = "cluster", value_parser = parse_key_val)]
    clusters: Vec<(String, String)>,

    /// CA bundle for a cluster as NAME=PATH (repeatable)
    #[arg(long = "ca-file", value_parser = parse_key_val)]
    ca_files: Vec<(String, String)>,

    /// Auth provider for a cluster as NAME=PROVIDER (repeatable).
    /// Known providers: anonymous, serviceAccount, oidc, google.
    #[arg(long = "auth-provider", value_parser = parse_key_val)]
    auth_providers: Vec<(String, String)>,

    /// Extra auth metadata for a cluster as NAME=KEY=VALUE (repeatable)
    #[arg(long = "auth-metadata", value_parser = parse_key_val)]
    auth_metadata: Vec<(String, String)>,

    /// Disable upstream certificate verification for a cluster (repeatable)
    #[arg(long = "skip-tls-verify")]
    skip_tls_verify: Vec<String>,

    /// Cedar policy file for the permission gate
    #[arg(long, env = "CLUSTER_PROXY_POLICY_FILE", conflicts_with = "allow_all")]
    policy_file: Option<PathBuf>,

    /// Permit every request (development only)
    #[arg(long)]
    allow_all: bool,

    /// Upstream request timeout in seconds; 0 disables it
    #[arg(long, default_value_t = 30)]
    request_timeout: u64,

    /// Upstream connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Log output format
    #[arg(long, env = "CLUSTER_PROXY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    if key.is_empty() || value.is_empty() {
        return Err(format!("expected NAME=VALUE, got '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    init_tracing(TelemetryConfig {
        log_format: cli.log_format,
        ..Default::default()
    })?;

    let (cluster_supplier, auth_strategy) = build_directory(&cli)?;
    let permissions = build_permissions(&cli).await?;

    let config = ProxyConfig {
        connect_timeout: Duration::from_secs(cli.connect_timeout),
        request_timeout: (cli.request_timeout > 0).then(|| Duration::from_secs(cli.request_timeout)),
        ..ProxyConfig::default()
    };

    let proxy = KubernetesProxy::new(KubernetesProxyOptions {
        cluster_supplier,
        auth_strategy,
        config,
    });

    for problem in proxy.validate_clusters().await? {
        warn!(error = %problem, "Cluster configuration problem");
    }

    let tls = match (&cli.tls_cert, &cli.tls_key) {
        (Some(cert), Some(key)) => Some(TlsConfig {
            cert_pem: std::fs::read_to_string(cert)
                .with_context(|| format!("reading TLS certificate {}", cert.display()))?,
            key_pem: std::fs::read_to_string(key)
                .with_context(|| format!("reading TLS key {}", key.display()))?,
        }),
        _ => None,
    };

    let server_config = ServerConfig {
        addr: cli.listen_addr,
        tls,
        mount_path: cli.mount_path.clone(),
    };

    cluster_proxy::start_server(server_config, proxy, permissions).await?;
    Ok(())
}

/// Cluster list and credential strategy from the command line
fn build_directory(
    cli: &Cli,
) -> anyhow::Result<(Arc<dyn ClusterSupplier>, Arc<dyn AuthenticationStrategy>)> {
    if cli.clusters.is_empty() {
        info!("No clusters configured, using local kubectl proxy");
        return Ok((Arc::new(LocalKubectlProxyLocator), Arc::new(AnonymousStrategy)));
    }

    let mut clusters: HashMap<String, ClusterDetails> = HashMap::new();
    for (name, url) in &cli.clusters {
        if clusters.contains_key(name) {
            bail!("cluster '{}' given more than once", name);
        }
        let cluster = ClusterDetails::new(name.clone(), url.clone())
            .with_auth_metadata(AUTH_PROVIDER_KEY, "anonymous");
        clusters.insert(name.clone(), cluster);
    }

    for (name, path) in &cli.ca_files {
        cluster_mut(&mut clusters, name, "--ca-file")?.ca_file = Some(PathBuf::from(path));
    }
    for (name, provider) in &cli.auth_providers {
        cluster_mut(&mut clusters, name, "--auth-provider")?
            .auth_metadata
            .insert(AUTH_PROVIDER_KEY.to_string(), provider.clone());
    }
    for (name, entry) in &cli.auth_metadata {
        let (key, value) = parse_key_val(entry).map_err(anyhow::Error::msg)?;
        cluster_mut(&mut clusters, name, "--auth-metadata")?
            .auth_metadata
            .insert(key, value);
    }
    for name in &cli.skip_tls_verify {
        cluster_mut(&mut clusters, name, "--skip-tls-verify")?.skip_tls_verify = true;
    }

    let mut clusters: Vec<ClusterDetails> = clusters.into_values().collect();
    clusters.sort_by(|a, b| a.name.cmp(&b.name));
    info!(count = clusters.len(), "Configured clusters");

    Ok((
        Arc::new(StaticClusterSupplier::new(clusters)),
        Arc::new(DispatchStrategy::with_defaults()),
    ))
}

fn cluster_mut<'a>(
    clusters: &'a mut HashMap<String, ClusterDetails>,
    name: &str,
    flag: &str,
) -> anyhow::Result<&'a mut ClusterDetails> {
    clusters
        .get_mut(name)
        .with_context(|| format!("{} refers to unknown cluster '{}'", flag, name))
}

/// Permission evaluator from the command line
async fn build_permissions(cli: &Cli) -> anyhow::Result<Arc<dyn PermissionEvaluator>> {
    if cli.allow_all {
        warn!("Permission checks disabled (--allow-all)");
        return Ok(Arc::new(StaticPermissionEvaluator::allow_all()));
    }

    match &cli.policy_file {
        Some(path) => Ok(Arc::new(CedarPermissionEvaluator::from_file(path).await?)),
        None => {
            warn!("No policy file given, all proxy requests will be denied");
            Ok(Arc::new(CedarPermissionEvaluator::new()))
        }
    }
}
