//! Agreement type registry.
//!
//! An agreement type declares, up front, everything the pipeline needs to
//! mediate that relationship: which roles may appear on it, how consent is
//! gathered, which permissions each role is granted while the agreement is
//! active, and which lifecycle hooks fire on transitions.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::agreement::{Agreement, ConsentMethod};

/// How many consents activate an agreement of this type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentQuorum {
    /// Every named party has consented (any method).
    AllParties,
    /// Every named party has consented deliberately (explicit or signature).
    AllPartiesExplicit,
    /// At least this many parties have consented.
    AtLeast(u32),
}

/// A role an agreement type admits, with the consent method it requires and
/// the permissions it grants while the agreement is active.
#[derive(Debug, Clone)]
pub struct RoleSpec {
    pub name: String,
    pub consent_method: ConsentMethod,
    /// Permission patterns of the form `resource:action`; `*` matches
    /// anything in either position.
    pub permissions: Vec<String>,
}

impl RoleSpec {
    pub fn new(
        name: impl Into<String>,
        consent_method: ConsentMethod,
        permissions: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            consent_method,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// What a lifecycle hook asks the pipeline to do next.
///
/// Hooks are pure: they inspect the post-fold agreement state and describe
/// follow-up work. The hook processor runs each emission as a nested intent
/// under a System actor, sharing the triggering command's causation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEmission {
    Intent { name: String, payload: JsonValue },
}

/// A lifecycle hook: post-fold agreement state in, emissions out.
pub type LifecycleHook = Arc<dyn Fn(&Agreement) -> Vec<HookEmission> + Send + Sync>;

/// Declarative definition of one agreement type.
#[derive(Clone)]
pub struct AgreementTypeDefinition {
    pub name: String,
    pub description: String,
    pub roles: Vec<RoleSpec>,
    pub quorum: ConsentQuorum,
    /// Validates the type-specific `terms` object at proposal time.
    pub validate_terms: Arc<dyn Fn(&JsonValue) -> Result<(), String> + Send + Sync>,
    pub on_proposed: Option<LifecycleHook>,
    pub on_activated: Option<LifecycleHook>,
    pub on_terminated: Option<LifecycleHook>,
}

impl core::fmt::Debug for AgreementTypeDefinition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AgreementTypeDefinition")
            .field("name", &self.name)
            .field("roles", &self.roles)
            .field("quorum", &self.quorum)
            .field("on_proposed", &self.on_proposed.is_some())
            .field("on_activated", &self.on_activated.is_some())
            .field("on_terminated", &self.on_terminated.is_some())
            .finish()
    }
}

impl AgreementTypeDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            roles: Vec::new(),
            quorum: ConsentQuorum::AllParties,
            validate_terms: Arc::new(|_| Ok(())),
            on_proposed: None,
            on_activated: None,
            on_terminated: None,
        }
    }

    pub fn with_role(mut self, role: RoleSpec) -> Self {
        self.roles.push(role);
        self
    }

    pub fn with_quorum(mut self, quorum: ConsentQuorum) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn with_terms_validator(
        mut self,
        validate: impl Fn(&JsonValue) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validate_terms = Arc::new(validate);
        self
    }

    pub fn on_activated(mut self, hook: impl Fn(&Agreement) -> Vec<HookEmission> + Send + Sync + 'static) -> Self {
        self.on_activated = Some(Arc::new(hook));
        self
    }

    pub fn on_terminated(mut self, hook: impl Fn(&Agreement) -> Vec<HookEmission> + Send + Sync + 'static) -> Self {
        self.on_terminated = Some(Arc::new(hook));
        self
    }

    pub fn role(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.iter().find(|r| r.name == name)
    }

    /// Permissions granted to a role by this type.
    pub fn permissions_for_role(&self, role: &str) -> &[String] {
        self.role(role).map(|r| r.permissions.as_slice()).unwrap_or(&[])
    }
}

/// Registry of agreement type definitions.
#[derive(Debug, Default)]
pub struct AgreementTypeRegistry {
    types: HashMap<String, AgreementTypeDefinition>,
}

impl AgreementTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: AgreementTypeDefinition) {
        self.types.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&AgreementTypeDefinition> {
        self.types.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The built-in catalog.
    ///
    /// `tenant-license` is the root of every realm: its activation hook asks
    /// the pipeline to create the realm container named in its terms.
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(
            AgreementTypeDefinition::new(
                "tenant-license",
                "Grants an organization a realm of its own",
            )
            .with_role(RoleSpec::new("licensor", ConsentMethod::Implicit, &[]))
            .with_role(RoleSpec::new(
                "licensee",
                ConsentMethod::Explicit,
                &[
                    "entity:*",
                    "agreement:*",
                    "asset:*",
                    "container:*",
                    "apikey:*",
                    "query:*",
                ],
            ))
            .with_terms_validator(|terms| {
                let name = terms.get("realm_name").and_then(JsonValue::as_str);
                if name.map(str::trim).unwrap_or("").is_empty() {
                    return Err("terms.realm_name is required".to_string());
                }
                if terms.get("realm_id").and_then(JsonValue::as_str).is_none() {
                    return Err("terms.realm_id is required".to_string());
                }
                Ok(())
            })
            .on_activated(|agreement| {
                let terms = &agreement.terms;
                let Some(realm_id) = terms.get("realm_id").cloned() else {
                    return Vec::new();
                };
                let name = terms
                    .get("realm_name")
                    .cloned()
                    .unwrap_or(JsonValue::String("realm".to_string()));
                let owner = agreement
                    .parties
                    .iter()
                    .find(|p| p.role == "licensee")
                    .map(|p| p.entity_id);

                vec![HookEmission::Intent {
                    name: "container:create".to_string(),
                    payload: serde_json::json!({
                        "container_id": realm_id,
                        "realm_id": realm_id,
                        "name": name,
                        "container_type": "Realm",
                        "physics": {
                            "fungibility": "Versioned",
                            "topology": "Subjects",
                            "permeability": "Gated",
                            "execution": "Disabled",
                        },
                        "governance_agreement_id": agreement.id,
                        "owner_id": owner,
                    }),
                }]
            }),
        );

        registry.register(
            AgreementTypeDefinition::new("employment", "Employment relationship")
                .with_role(RoleSpec::new(
                    "employer",
                    ConsentMethod::Explicit,
                    &[
                        "agreement:propose",
                        "agreement:terminate",
                        "asset:register",
                        "container:create",
                        "container:deposit",
                        "container:withdraw",
                        "container:transfer",
                        "query:*",
                    ],
                ))
                .with_role(RoleSpec::new(
                    "employee",
                    ConsentMethod::Explicit,
                    &[
                        "agreement:consent",
                        "container:deposit",
                        "query:*",
                    ],
                ))
                .with_quorum(ConsentQuorum::AllPartiesExplicit),
        );

        registry.register(
            AgreementTypeDefinition::new("service", "Service delivery between parties")
                .with_role(RoleSpec::new(
                    "provider",
                    ConsentMethod::Explicit,
                    &[
                        "asset:register",
                        "container:deposit",
                        "container:transfer",
                        "query:*",
                    ],
                ))
                .with_role(RoleSpec::new(
                    "client",
                    ConsentMethod::Explicit,
                    &["agreement:terminate", "container:deposit", "query:*"],
                )),
        );

        registry.register(
            AgreementTypeDefinition::new("api-access", "Machine access to a realm")
                .with_role(RoleSpec::new("issuer", ConsentMethod::Implicit, &[]))
                .with_role(RoleSpec::new(
                    "holder",
                    ConsentMethod::Implicit,
                    &["query:*", "apikey:revoke"],
                )),
        );

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::{AgreementId, AgreementStatus, PartyRef};
    use covenant_core::EntityId;
    use serde_json::json;

    #[test]
    fn builtin_catalog_is_complete() {
        let registry = AgreementTypeRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec!["api-access", "employment", "service", "tenant-license"]
        );
    }

    #[test]
    fn role_grants_resolve() {
        let registry = AgreementTypeRegistry::builtin();
        let employment = registry.get("employment").unwrap();
        assert!(
            employment
                .permissions_for_role("employer")
                .contains(&"agreement:terminate".to_string())
        );
        assert!(employment.permissions_for_role("stranger").is_empty());
    }

    #[test]
    fn tenant_license_terms_are_validated() {
        let registry = AgreementTypeRegistry::builtin();
        let license = registry.get("tenant-license").unwrap();

        assert!((license.validate_terms)(&json!({})).is_err());
        assert!(
            (license.validate_terms)(&json!({
                "realm_name": "Acme",
                "realm_id": "00000000-0000-0000-0000-000000000001",
            }))
            .is_ok()
        );
    }

    #[test]
    fn tenant_license_activation_emits_realm_container_intent() {
        let registry = AgreementTypeRegistry::builtin();
        let license = registry.get("tenant-license").unwrap();
        let hook = license.on_activated.as_ref().unwrap();

        let licensee = EntityId::new();
        let mut agreement = Agreement::empty(AgreementId::new());
        agreement.created = true;
        agreement.status = AgreementStatus::Active;
        agreement.agreement_type = "tenant-license".to_string();
        agreement.parties = vec![PartyRef::new(licensee, "licensee")];
        agreement.terms = json!({
            "realm_name": "Acme",
            "realm_id": "00000000-0000-0000-0000-000000000001",
        });

        let emissions = hook(&agreement);
        assert_eq!(emissions.len(), 1);
        let HookEmission::Intent { name, payload } = &emissions[0];
        assert_eq!(name, "container:create");
        assert_eq!(payload["container_type"], "Realm");
        assert_eq!(payload["owner_id"], json!(licensee));
    }
}
