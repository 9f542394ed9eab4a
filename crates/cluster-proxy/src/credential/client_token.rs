//! Caller-supplied provider token strategy

use async_trait::async_trait;

use super::{AuthenticationStrategy, Credential, RequestAuth};
use crate::cluster::ClusterDetails;
use crate::error::{Error, Result};

/// Forwards the token the caller supplied for a fixed provider (e.g. `google`)
#[derive(Clone, Debug)]
pub struct ClientTokenStrategy {
    provider: String,
}

impl ClientTokenStrategy {
    /// Strategy reading the `<override-header>-<provider>` token
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }

    /// Provider whose token is forwarded
    pub fn provider(&self) -> &str {
        &self.provider
    }
}

#[async_trait]
impl AuthenticationStrategy for ClientTokenStrategy {
    async fn get_credential(&self, _cluster: &ClusterDetails, auth: &RequestAuth) -> Result<Credential> {
        auth.provider_token(&self.provider)
            .map(Credential::bearer)
            .ok_or_else(|| {
                Error::Internal(format!("no token supplied for auth provider '{}'", self.provider))
            })
    }

    fn validate_cluster(&self, _cluster: &ClusterDetails) -> Vec<Error> {
        Vec::new()
    }
}
