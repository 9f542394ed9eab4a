//! Permission gate
//!
//! Every proxied request is checked against a [`PermissionEvaluator`] after the
//! target cluster is known and before any credential is resolved. The
//! evaluator API is batchable; the proxy sends exactly one
//! [`AuthorizeRequest`] for the [`KUBERNETES_PROXY_PERMISSION`] permission
//! with the cluster name as the resource.

mod cedar;

use std::fmt;

use async_trait::async_trait;
use axum::http::{Extensions, HeaderMap};
use zeroize::Zeroizing;

use crate::error::Result;

pub use cedar::CedarPermissionEvaluator;

/// Permission checked for every proxied request
pub const KUBERNETES_PROXY_PERMISSION: &str = "kubernetes.proxy";

/// Username used when the host supplied no identity
pub const ANONYMOUS_USER: &str = "system:anonymous";

/// Authenticated caller, as established by the host's auth layer
///
/// The proxy does not authenticate callers itself. A host middleware inserts
/// this into the request extensions and the proxy reads it from there.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserIdentity {
    /// Username
    pub username: String,
    /// Groups
    pub groups: Vec<String>,
}

impl UserIdentity {
    /// Identity with a username and groups
    pub fn new(username: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            username: username.into(),
            groups,
        }
    }
}

/// Caller credentials handed to the permission evaluator
#[derive(Clone, Default)]
pub struct Subject {
    token: Option<Zeroizing<String>>,
    identity: Option<UserIdentity>,
}

impl Subject {
    /// Subject with neither a token nor an identity
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Build from inbound request parts: the bearer token from `Authorization`
    /// and the [`UserIdentity`] extension if the host set one
    pub fn from_request_parts(headers: &HeaderMap, extensions: &Extensions) -> Self {
        Self {
            token: extract_bearer_token(headers).map(|t| Zeroizing::new(t.to_string())),
            identity: extensions.get::<UserIdentity>().cloned(),
        }
    }

    /// Attach an identity
    pub fn with_identity(mut self, identity: UserIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Attach a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(Zeroizing::new(token.into()));
        self
    }

    /// Caller's bearer token, if any
    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.as_str())
    }

    /// Caller's identity, if the host established one
    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("identity", &self.identity)
            .finish()
    }
}

/// One permission question
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizeRequest {
    /// Permission name, e.g. `kubernetes.proxy`
    pub permission: String,
    /// Resource the permission applies to (a cluster name for proxy requests)
    pub resource_ref: Option<String>,
}

impl AuthorizeRequest {
    /// `kubernetes.proxy` on the named cluster
    pub fn proxy(cluster: impl Into<String>) -> Self {
        Self {
            permission: KUBERNETES_PROXY_PERMISSION.to_string(),
            resource_ref: Some(cluster.into()),
        }
    }
}

/// Outcome of one [`AuthorizeRequest`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorizeDecision {
    /// Permitted
    Allow,
    /// Denied
    Deny,
}

/// Makes allow/deny decisions, one per request, in request order
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionEvaluator: Send + Sync {
    /// Decide each request. The result has the same length and order as `requests`.
    async fn authorize(
        &self,
        subject: &Subject,
        requests: &[AuthorizeRequest],
    ) -> Result<Vec<AuthorizeDecision>>;
}

/// Evaluator that returns the same decision for everything
#[derive(Clone, Copy, Debug)]
pub struct StaticPermissionEvaluator {
    decision: AuthorizeDecision,
}

impl StaticPermissionEvaluator {
    /// Allow every request
    pub fn allow_all() -> Self {
        Self {
            decision: AuthorizeDecision::Allow,
        }
    }

    /// Deny every request
    pub fn deny_all() -> Self {
        Self {
            decision: AuthorizeDecision::Deny,
        }
    }
}

#[async_trait]
impl PermissionEvaluator for StaticPermissionEvaluator {
    async fn authorize(
        &self,
        _subject: &Subject,
        requests: &[AuthorizeRequest],
    ) -> Result<Vec<AuthorizeDecision>> {
        Ok(vec![self.decision; requests.len()])
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
