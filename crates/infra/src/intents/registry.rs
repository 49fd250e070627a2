//! Intent catalog: name → definition (schema, permissions, handler).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use covenant_auth::Permission;

use super::context::HandlerContext;
use super::dispatcher::IntentRequest;
use super::result::{HandlerOutput, IntentError};
use super::schema::PayloadSchema;

/// Spec-mandated grouping of intents.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IntentCategory {
    Entity,
    Agreement,
    Asset,
    Workflow,
    Query,
    Meta,
}

/// An intent's business logic. Handlers run after validation and
/// authorization; everything they append goes through the context so the
/// causation command id and actor flow onto every event.
#[async_trait]
pub trait IntentHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError>;
}

/// One registered intent.
#[derive(Clone)]
pub struct IntentDefinition {
    pub name: String,
    pub category: IntentCategory,
    pub description: String,
    pub schema: PayloadSchema,
    pub required_permissions: Vec<Permission>,
    pub handler: Arc<dyn IntentHandler>,
    /// Example payloads, surfaced by `intent:list` for client discovery.
    pub examples: Vec<JsonValue>,
}

impl core::fmt::Debug for IntentDefinition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IntentDefinition")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("required_permissions", &self.required_permissions)
            .finish()
    }
}

impl IntentDefinition {
    pub fn new(
        name: &str,
        category: IntentCategory,
        description: &str,
        schema: PayloadSchema,
        required_permissions: &[&str],
        handler: Arc<dyn IntentHandler>,
    ) -> Self {
        Self {
            name: name.to_string(),
            category,
            description: description.to_string(),
            schema,
            required_permissions: required_permissions
                .iter()
                .map(|p| Permission::new(*p))
                .collect(),
            handler,
            examples: Vec::new(),
        }
    }

    pub fn example(mut self, example: JsonValue) -> Self {
        self.examples.push(example);
        self
    }
}

/// The catalog the dispatcher resolves intents against.
#[derive(Debug, Default)]
pub struct IntentRegistry {
    intents: HashMap<String, IntentDefinition>,
}

impl IntentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: IntentDefinition) {
        self.intents.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&IntentDefinition> {
        self.intents.get(name)
    }

    pub fn definitions(&self) -> Vec<&IntentDefinition> {
        let mut all: Vec<&IntentDefinition> = self.intents.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// The complete built-in catalog.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        super::handlers::register_all(&mut registry);
        registry
    }
}
