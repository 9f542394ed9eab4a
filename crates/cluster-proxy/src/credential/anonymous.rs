//! Anonymous strategy

use async_trait::async_trait;

use super::{AuthenticationStrategy, Credential, RequestAuth};
use crate::cluster::ClusterDetails;
use crate::error::{Error, Result};

/// Sends no credential upstream
///
/// Suited to clusters behind `kubectl proxy` or other pre-authenticated paths.
#[derive(Clone, Debug, Default)]
pub struct AnonymousStrategy;

#[async_trait]
impl AuthenticationStrategy for AnonymousStrategy {
    async fn get_credential(
        &self,
        _cluster: &ClusterDetails,
        _auth: &RequestAuth,
    ) -> Result<Credential> {
        Ok(Credential::Anonymous)
    }

    fn validate_cluster(&self, _cluster: &ClusterDetails) -> Vec<Error> {
        Vec::new()
    }
}
