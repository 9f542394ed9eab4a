//! Strategy dispatch by cluster metadata

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    AnonymousStrategy, AuthenticationStrategy, ClientTokenStrategy, Credential, OidcStrategy,
    RequestAuth, ServiceAccountStrategy, AUTH_PROVIDER_KEY,
};
use crate::cluster::ClusterDetails;
use crate::error::{Error, Result};

/// Delegates to the strategy named by `kubernetes.io/auth-provider`
#[derive(Clone, Default)]
pub struct DispatchStrategy {
    strategies: HashMap<String, Arc<dyn AuthenticationStrategy>>,
}

impl DispatchStrategy {
    /// Empty dispatcher; register strategies with [`DispatchStrategy::with_strategy`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher knowing `anonymous`, `serviceAccount`, `oidc` and `google`
    pub fn with_defaults() -> Self {
        Self::new()
            .with_strategy("anonymous", Arc::new(AnonymousStrategy))
            .with_strategy("serviceAccount", Arc::new(ServiceAccountStrategy::default()))
            .with_strategy("oidc", Arc::new(OidcStrategy))
            .with_strategy("google", Arc::new(ClientTokenStrategy::new("google")))
    }

    /// Register `strategy` under `provider`, replacing any previous entry
    pub fn with_strategy(
        mut self,
        provider: impl Into<String>,
        strategy: Arc<dyn AuthenticationStrategy>,
    ) -> Self {
        self.strategies.insert(provider.into(), strategy);
        self
    }

    fn strategy_for(&self, cluster: &ClusterDetails) -> Result<&Arc<dyn AuthenticationStrategy>> {
        let provider = cluster.auth_metadata.get(AUTH_PROVIDER_KEY).ok_or_else(|| {
            Error::Config(format!(
                "cluster '{}' is missing {} auth metadata",
                cluster.name, AUTH_PROVIDER_KEY
            ))
        })?;

        self.strategies.get(provider).ok_or_else(|| {
            Error::Config(format!(
                "cluster '{}' uses unknown auth provider '{}'",
                cluster.name, provider
            ))
        })
    }
}

#[async_trait]
impl AuthenticationStrategy for DispatchStrategy {
    async fn get_credential(&self, cluster: &ClusterDetails, auth: &RequestAuth) -> Result<Credential> {
        self.strategy_for(cluster)?
            .get_credential(cluster, auth)
            .await
    }

    fn validate_cluster(&self, cluster: &ClusterDetails) -> Vec<Error> {
        match self.strategy_for(cluster) {
            Ok(strategy) => strategy.validate_cluster(cluster),
            Err(e) => vec![e],
        }
    }
}
