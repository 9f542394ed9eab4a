//! Credential resolution
//!
//! An [`AuthenticationStrategy`] turns a cluster plus the caller's auth context
//! into the [`Credential`] sent upstream. New strategies are added by
//! implementing the trait; the proxy never branches on strategy type.
//!
//! # Strategies
//!
//! - [`AnonymousStrategy`]: no credential (e.g. behind `kubectl proxy`)
//! - [`ServiceAccountStrategy`]: static token from cluster metadata, or the
//!   in-cluster ServiceAccount token re-read on every request
//! - [`OidcStrategy`]: caller-supplied OIDC token for the cluster's issuer
//! - [`ClientTokenStrategy`]: caller-supplied token for a named provider
//! - [`DispatchStrategy`]: picks one of the above from cluster metadata

mod anonymous;
mod client_token;
mod dispatch;
mod oidc;
mod service_account;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use zeroize::Zeroizing;

use crate::cluster::ClusterDetails;
use crate::error::{Error, Result};

pub use anonymous::AnonymousStrategy;
pub use client_token::ClientTokenStrategy;
pub use dispatch::DispatchStrategy;
pub use oidc::OidcStrategy;
pub use service_account::{FileTokenReader, ServiceAccountStrategy, TokenReader, TOKEN_PATH};

#[cfg(test)]
pub use service_account::MockTokenReader;

/// Auth metadata key naming the strategy [`DispatchStrategy`] should use
pub const AUTH_PROVIDER_KEY: &str = "kubernetes.io/auth-provider";

/// Auth metadata key holding a static ServiceAccount token
pub const SERVICE_ACCOUNT_TOKEN_KEY: &str = "kubernetes.io/service-account-token";

/// Auth metadata key naming the OIDC issuer whose token the cluster accepts
pub const OIDC_TOKEN_PROVIDER_KEY: &str = "kubernetes.io/oidc-token-provider";

/// Prefix that routes an auth context header into the OIDC map
const OIDC_HEADER_PREFIX: &str = "oidc-";

/// Authentication material attached to one upstream request
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// No `Authorization` header
    Anonymous,
    /// `Authorization: Bearer <token>`
    BearerToken(Zeroizing<String>),
    /// Pre-rendered `Authorization` value, sent byte-for-byte
    Raw(Zeroizing<Vec<u8>>),
}

impl Credential {
    /// Bearer token credential
    pub fn bearer(token: impl Into<String>) -> Self {
        Credential::BearerToken(Zeroizing::new(token.into()))
    }

    /// Verbatim `Authorization` value. Any bytes a header value may carry
    /// are accepted, including obs-text.
    pub fn raw(value: impl Into<Vec<u8>>) -> Self {
        Credential::Raw(Zeroizing::new(value.into()))
    }

    /// Render the upstream `Authorization` header value, if any
    pub fn authorization_value(&self) -> Result<Option<HeaderValue>> {
        let rendered = match self {
            Credential::Anonymous => return Ok(None),
            Credential::BearerToken(token) => {
                Zeroizing::new(format!("Bearer {}", token.as_str()).into_bytes())
            }
            Credential::Raw(value) => value.clone(),
        };

        let mut value = HeaderValue::from_bytes(&rendered)
            .map_err(|_| Error::Internal("credential is not a valid header value".into()))?;
        value.set_sensitive(true);
        Ok(Some(value))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Anonymous => f.write_str("Anonymous"),
            Credential::BearerToken(_) => f.write_str("BearerToken(<redacted>)"),
            Credential::Raw(_) => f.write_str("Raw(<redacted>)"),
        }
    }
}

/// Caller-supplied tokens, keyed by auth provider
///
/// Parsed from headers named `<override-header>-<provider>`. Headers named
/// `<override-header>-oidc-<issuer>` land in [`RequestAuth::oidc`] instead.
#[derive(Clone, Default)]
pub struct RequestAuth {
    /// Tokens by provider name (e.g. `google`)
    pub providers: HashMap<String, Zeroizing<String>>,
    /// OIDC tokens by issuer name
    pub oidc: HashMap<String, Zeroizing<String>>,
}

impl RequestAuth {
    /// Collect auth context headers starting with `prefix` (lowercase, e.g.
    /// `backstage-kubernetes-authorization-`)
    pub fn from_headers(headers: &HeaderMap, prefix: &str) -> Self {
        let mut auth = RequestAuth::default();

        for (name, value) in headers {
            let Some(provider) = name.as_str().strip_prefix(prefix) else {
                continue;
            };
            let Ok(token) = value.to_str() else {
                continue;
            };
            if provider.is_empty() {
                continue;
            }

            let token = Zeroizing::new(token.to_string());
            match provider.strip_prefix(OIDC_HEADER_PREFIX) {
                Some(issuer) if !issuer.is_empty() => {
                    auth.oidc.insert(issuer.to_string(), token);
                }
                _ => {
                    auth.providers.insert(provider.to_string(), token);
                }
            }
        }

        auth
    }

    /// Token for a named provider
    pub fn provider_token(&self, provider: &str) -> Option<&str> {
        self.providers.get(provider).map(|t| t.as_str())
    }

    /// OIDC token for a named issuer
    pub fn oidc_token(&self, issuer: &str) -> Option<&str> {
        self.oidc.get(issuer).map(|t| t.as_str())
    }
}

impl fmt::Debug for RequestAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestAuth")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("oidc", &self.oidc.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Computes the upstream credential for a cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthenticationStrategy: Send + Sync {
    /// Resolve the credential for one request to `cluster`
    async fn get_credential(&self, cluster: &ClusterDetails, auth: &RequestAuth)
        -> Result<Credential>;

    /// Check that `cluster` carries what this strategy needs.
    ///
    /// Called at startup, not per request. Returns every problem found.
    fn validate_cluster(&self, cluster: &ClusterDetails) -> Vec<Error>;
}
