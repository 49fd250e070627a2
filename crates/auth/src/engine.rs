//! Authorization engine (ABAC over agreements).
//!
//! No IO of its own: the engine asks an [`AgreementSource`] for the
//! agreements naming the actor and folds their role grants into a decision.
//! The dispatcher, not the engine, records the decision as an audit event.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use covenant_agreements::{Agreement, AgreementId, AgreementTypeRegistry};
use covenant_core::{Actor, EntityId, RealmId};

use crate::permission::Permission;

/// Where the engine finds agreements. Implemented by the infrastructure
/// layer over a party index projection, with a log-scan fallback.
#[async_trait]
pub trait AgreementSource: Send + Sync {
    /// Every agreement in which `entity` appears as a party, any status.
    async fn agreements_naming(&self, entity: EntityId) -> Vec<Agreement>;

    /// A single agreement by id, if it exists.
    async fn agreement_by_id(&self, id: AgreementId) -> Option<Agreement>;
}

/// One authorization question.
#[derive(Debug, Clone)]
pub struct AuthzRequest {
    pub actor: Actor,
    pub permission: Permission,
    pub realm: Option<RealmId>,
    pub timestamp: DateTime<Utc>,
}

/// The engine's answer, ready to be audited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthzDecision {
    pub allowed: bool,
    pub reason: String,
    /// Agreements that were active, in scope, and named the actor.
    pub evaluated_agreements: Vec<AgreementId>,
    /// The subset whose role grants cover the requested permission.
    pub granted_by: Vec<AgreementId>,
}

impl AuthzDecision {
    fn denied(reason: impl Into<String>, evaluated: Vec<AgreementId>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            evaluated_agreements: evaluated,
            granted_by: Vec::new(),
        }
    }
}

/// Folds active agreements into an allow/deny decision.
pub struct AuthorizationEngine {
    registry: Arc<AgreementTypeRegistry>,
    source: Arc<dyn AgreementSource>,
}

impl AuthorizationEngine {
    pub fn new(registry: Arc<AgreementTypeRegistry>, source: Arc<dyn AgreementSource>) -> Self {
        Self { registry, source }
    }

    pub async fn authorize(&self, request: &AuthzRequest) -> AuthzDecision {
        // System actors bypass: bootstrap and hook-originated emissions only.
        if request.actor.is_system() {
            return AuthzDecision {
                allowed: true,
                reason: "system actor bypass".to_string(),
                evaluated_agreements: Vec::new(),
                granted_by: Vec::new(),
            };
        }

        let Some(entity_id) = request.actor.entity_id() else {
            return AuthzDecision::denied("anonymous actors hold no agreements", Vec::new());
        };

        let agreements = self.source.agreements_naming(entity_id).await;

        let mut evaluated = Vec::new();
        let mut granted_by = Vec::new();

        for agreement in &agreements {
            if !agreement.grants_at(request.timestamp) {
                continue;
            }
            // Realm scope: realm-less agreements grant platform-wide.
            if let (Some(scope), Some(requested)) = (agreement.realm_id, request.realm) {
                if scope != requested {
                    continue;
                }
            }

            evaluated.push(agreement.id);

            let Some(role) = agreement.role_of(entity_id) else {
                continue;
            };
            let Some(definition) = self.registry.get(&agreement.agreement_type) else {
                tracing::warn!(
                    agreement_type = %agreement.agreement_type,
                    "agreement references an unregistered type; granting nothing"
                );
                continue;
            };

            let covers = definition
                .permissions_for_role(role)
                .iter()
                .any(|pattern| Permission::new(pattern.clone()).grants(&request.permission));

            if covers {
                granted_by.push(agreement.id);
            }
        }

        if granted_by.is_empty() {
            return AuthzDecision::denied(
                format!(
                    "no active agreement grants '{}' to {}",
                    request.permission, request.actor
                ),
                evaluated,
            );
        }

        AuthzDecision {
            allowed: true,
            reason: format!("granted '{}' by active agreement", request.permission),
            evaluated_agreements: evaluated,
            granted_by,
        }
    }
}
