//! OIDC token strategy

use async_trait::async_trait;

use super::{AuthenticationStrategy, Credential, RequestAuth, OIDC_TOKEN_PROVIDER_KEY};
use crate::cluster::ClusterDetails;
use crate::error::{Error, Result};

/// Forwards the caller's OIDC token for the issuer the cluster trusts
///
/// The issuer comes from the `kubernetes.io/oidc-token-provider` metadata entry;
/// the token from the matching `-oidc-<issuer>` auth context header.
#[derive(Clone, Debug, Default)]
pub struct OidcStrategy;

fn token_provider(cluster: &ClusterDetails) -> Result<&str> {
    cluster
        .auth_metadata
        .get(OIDC_TOKEN_PROVIDER_KEY)
        .map(String::as_str)
        .ok_or_else(|| {
            Error::Config(format!(
                "cluster '{}' is missing {} auth metadata",
                cluster.name, OIDC_TOKEN_PROVIDER_KEY
            ))
        })
}

#[async_trait]
impl AuthenticationStrategy for OidcStrategy {
    async fn get_credential(&self, cluster: &ClusterDetails, auth: &RequestAuth) -> Result<Credential> {
        let issuer = token_provider(cluster)?;
        auth.oidc_token(issuer)
            .map(Credential::bearer)
            .ok_or_else(|| {
                Error::Internal(format!("no OIDC token supplied for issuer '{}'", issuer))
            })
    }

    fn validate_cluster(&self, cluster: &ClusterDetails) -> Vec<Error> {
        token_provider(cluster).err().into_iter().collect()
    }
}
