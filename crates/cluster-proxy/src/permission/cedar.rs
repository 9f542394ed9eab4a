//! Cedar-backed permission evaluator
//!
//! # Entity model
//!
//! - principal: `Proxy::User::"<username>"`, member of one `Proxy::Group` per group.
//!   Callers without an identity are `system:anonymous` in `system:unauthenticated`.
//! - action: `Proxy::Action::"<permission>"`, i.e. `Proxy::Action::"kubernetes.proxy"`
//! - resource: `Proxy::Cluster::"<cluster>"` with a `name` attribute
//!
//! No policies means every request is denied.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cedar_policy::{
    Authorizer, Context, Decision, Entities, Entity, EntityId, EntityTypeName, EntityUid,
    PolicySet, Request, RestrictedExpression,
};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use super::{
    AuthorizeDecision, AuthorizeRequest, PermissionEvaluator, Subject, UserIdentity,
    ANONYMOUS_USER,
};
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Cedar schema namespace for proxy entities
const NAMESPACE: &str = "Proxy";

/// Group every caller without an identity belongs to
const UNAUTHENTICATED_GROUP: &str = "system:unauthenticated";

// ============================================================================
// CedarPermissionEvaluator
// ============================================================================

/// Evaluates proxy permissions against a Cedar policy set
pub struct CedarPermissionEvaluator {
    authorizer: Authorizer,
    policy_set: RwLock<PolicySet>,
    /// File the policies were loaded from, re-read by [`Self::reload`]
    source: Option<PathBuf>,
}

impl CedarPermissionEvaluator {
    /// Evaluator with no policies (default-deny)
    pub fn new() -> Self {
        Self {
            authorizer: Authorizer::new(),
            policy_set: RwLock::new(PolicySet::new()),
            source: None,
        }
    }

    /// Evaluator with policies parsed from `policy_text`
    pub fn with_policies(policy_text: &str) -> Result<Self> {
        Ok(Self {
            authorizer: Authorizer::new(),
            policy_set: RwLock::new(parse_policies(policy_text)?),
            source: None,
        })
    }

    /// Evaluator with policies loaded from a `.cedar` file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let policy_set = load_policy_file(&path).await?;
        info!(path = %path.display(), "Loaded Cedar policies");
        Ok(Self {
            authorizer: Authorizer::new(),
            policy_set: RwLock::new(policy_set),
            source: Some(path),
        })
    }

    /// Re-read the policy file. A parse failure keeps the current policies.
    pub async fn reload(&self) -> Result<()> {
        let Some(path) = &self.source else {
            return Err(Error::Config(
                "Cedar policies were not loaded from a file".into(),
            ));
        };

        let new_policy_set = load_policy_file(path).await?;
        *self.policy_set.write().await = new_policy_set;
        info!(path = %path.display(), "Reloaded Cedar policies");
        Ok(())
    }

    /// Replace the active policies with `policy_text`
    pub async fn replace_policies(&self, policy_text: &str) -> Result<()> {
        let new_policy_set = parse_policies(policy_text)?;
        *self.policy_set.write().await = new_policy_set;
        Ok(())
    }

    /// Check if any policies are loaded
    pub async fn has_policies(&self) -> bool {
        self.policy_set.read().await.policies().next().is_some()
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    fn evaluate(
        &self,
        identity: &UserIdentity,
        request: &AuthorizeRequest,
        policy_set: &PolicySet,
    ) -> Result<AuthorizeDecision> {
        let Some(cluster) = request.resource_ref.as_deref() else {
            debug!(permission = %request.permission, "No resource in request, denying");
            return Ok(AuthorizeDecision::Deny);
        };

        let principal = build_entity_uid("User", &identity.username)?;
        let action_uid = build_entity_uid("Action", &request.permission)?;
        let resource = build_entity_uid("Cluster", cluster)?;
        let entities = build_entities(identity, cluster)?;

        let cedar_request = Request::new(
            principal.clone(),
            action_uid.clone(),
            resource.clone(),
            Context::empty(),
            None,
        )
        .map_err(|e| Error::Internal(format!("Failed to build Cedar request: {}", e)))?;

        let response = self
            .authorizer
            .is_authorized(&cedar_request, policy_set, &entities);

        debug!(
            principal = %principal,
            action = %action_uid,
            resource = %resource,
            decision = ?response.decision(),
            "Cedar authorization result"
        );

        Ok(match response.decision() {
            Decision::Allow => AuthorizeDecision::Allow,
            Decision::Deny => AuthorizeDecision::Deny,
        })
    }
}

impl Default for CedarPermissionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionEvaluator for CedarPermissionEvaluator {
    #[instrument(skip(self, subject, requests), fields(requests = requests.len()))]
    async fn authorize(
        &self,
        subject: &Subject,
        requests: &[AuthorizeRequest],
    ) -> Result<Vec<AuthorizeDecision>> {
        let anonymous;
        let identity = match subject.identity() {
            Some(identity) => identity,
            None => {
                anonymous = UserIdentity::new(ANONYMOUS_USER, vec![UNAUTHENTICATED_GROUP.into()]);
                &anonymous
            }
        };

        let policy_set = self.policy_set.read().await;
        requests
            .iter()
            .map(|request| self.evaluate(identity, request, &policy_set))
            .collect()
    }
}

// ============================================================================
// Entity building
// ============================================================================

fn parse_policies(policy_text: &str) -> Result<PolicySet> {
    policy_text
        .parse()
        .map_err(|e: cedar_policy::ParseErrors| Error::Config(format!("Invalid Cedar policy: {}", e)))
}

async fn load_policy_file(path: &Path) -> Result<PolicySet> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Config(format!(
            "Failed to read Cedar policy file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_policies(&text)
}

fn build_entity_uid(type_name: &str, id: &str) -> Result<EntityUid> {
    let full_type_name = format!("{}::{}", NAMESPACE, type_name);
    let entity_type: EntityTypeName =
        full_type_name
            .parse()
            .map_err(|e: cedar_policy::ParseErrors| {
                Error::Internal(format!(
                    "Invalid Cedar entity type name '{}': {}",
                    full_type_name, e
                ))
            })?;
    Ok(EntityUid::from_type_name_and_id(entity_type, EntityId::new(id)))
}

/// User, its groups and the target cluster
fn build_entities(identity: &UserIdentity, cluster: &str) -> Result<Entities> {
    let mut entities = Vec::new();

    // Cedar rejects duplicate entities
    let groups: BTreeSet<&str> = identity.groups.iter().map(String::as_str).collect();

    let mut group_uids = HashSet::new();
    for group in groups {
        let uid = build_entity_uid("Group", group)?;
        let entity = Entity::new(uid.clone(), HashMap::new(), HashSet::new())
            .map_err(|e| Error::Internal(format!("Failed to create group entity: {}", e)))?;
        entities.push(entity);
        group_uids.insert(uid);
    }

    let user_uid = build_entity_uid("User", &identity.username)?;
    let user_entity = Entity::new(user_uid, HashMap::new(), group_uids)
        .map_err(|e| Error::Internal(format!("Failed to create user entity: {}", e)))?;
    entities.push(user_entity);

    let cluster_uid = build_entity_uid("Cluster", cluster)?;
    let attrs = HashMap::from([(
        "name".to_string(),
        RestrictedExpression::new_string(cluster.to_string()),
    )]);
    let cluster_entity = Entity::new(cluster_uid, attrs, HashSet::new())
        .map_err(|e| Error::Internal(format!("Failed to create cluster entity: {}", e)))?;
    entities.push(cluster_entity);

    Entities::from_entities(entities, None)
        .map_err(|e| Error::Internal(format!("Failed to create entities set: {}", e)))
}
