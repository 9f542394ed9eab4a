//! Proxy configuration

use std::time::Duration;

use serde::Deserialize;

/// Default header naming the target cluster
pub const DEFAULT_CLUSTER_HEADER: &str = "Backstage-Kubernetes-Cluster";

/// Default header carrying a ready-made upstream `Authorization` value
pub const DEFAULT_AUTH_OVERRIDE_HEADER: &str = "Backstage-Kubernetes-Authorization";

/// Default timeout for establishing upstream connections
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for non-streaming upstream requests
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Behavioural settings for [`KubernetesProxy`](crate::KubernetesProxy)
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    /// Header that selects the target cluster by name
    pub cluster_header: String,
    /// Header whose value is sent upstream as `Authorization` verbatim.
    ///
    /// Headers named `<auth_override_header>-<provider>` carry per-provider
    /// tokens for the credential strategies.
    pub auth_override_header: String,
    /// Timeout for establishing the upstream TCP/TLS connection
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Timeout for a whole upstream exchange. Watch/follow streams are exempt.
    #[serde(with = "duration_secs_opt")]
    pub request_timeout: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            cluster_header: DEFAULT_CLUSTER_HEADER.to_string(),
            auth_override_header: DEFAULT_AUTH_OVERRIDE_HEADER.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl ProxyConfig {
    /// Prefix of the per-provider auth context headers (lowercase)
    pub(crate) fn auth_provider_prefix(&self) -> String {
        format!("{}-", self.auth_override_header.to_ascii_lowercase())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod duration_secs_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|secs| secs.map(Duration::from_secs))
    }
}
