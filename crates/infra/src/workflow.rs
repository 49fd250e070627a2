//! Workflow engine: declarative state-machine executor.
//!
//! Aggregates guard their own transitions; the engine re-checks them
//! against a declared transition table, so a miswired handler cannot push
//! an aggregate somewhere its lifecycle never allowed. Machines are
//! registered once at startup (no runtime plug-ins).

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("workflow '{workflow}': no transition from '{from}' on '{action}'")]
    TransitionInvalid {
        workflow: String,
        from: String,
        action: String,
    },
}

/// One state machine: named states and the actions that move between them.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub initial: String,
    /// (from, action, to)
    pub transitions: Vec<(String, String, String)>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, initial: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: initial.into(),
            transitions: Vec::new(),
        }
    }

    pub fn transition(
        mut self,
        from: impl Into<String>,
        action: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.transitions
            .push((from.into(), action.into(), to.into()));
        self
    }

    /// Target state for `action` out of `from`, if the machine allows it.
    pub fn target(&self, from: &str, action: &str) -> Option<&str> {
        self.transitions
            .iter()
            .find(|(f, a, _)| f == from && a == action)
            .map(|(_, _, to)| to.as_str())
    }

    /// States with no outgoing transitions.
    pub fn is_terminal(&self, state: &str) -> bool {
        !self.transitions.iter().any(|(f, _, _)| f == state)
    }
}

/// Registry + executor for the declared machines.
pub struct WorkflowEngine {
    machines: RwLock<HashMap<String, WorkflowDefinition>>,
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self {
            machines: RwLock::new(HashMap::new()),
        }
    }

    /// The engine with the agreement and asset lifecycles registered.
    pub fn builtin() -> Self {
        let engine = Self::new();

        engine.register(
            WorkflowDefinition::new("agreement", "Proposed")
                .transition("Proposed", "consent_complete", "Active")
                .transition("Proposed", "reject", "Terminated")
                .transition("Active", "terminate", "Terminated")
                .transition("Active", "dispute_open", "Disputed")
                .transition("Disputed", "dispute_reinstate", "Active")
                .transition("Disputed", "dispute_terminate", "Terminated")
                .transition("Disputed", "dispute_settle", "Resolved"),
        );

        engine.register(
            WorkflowDefinition::new("asset", "Registered")
                .transition("Registered", "transfer", "Registered")
                .transition("Registered", "retire", "Retired"),
        );

        engine
    }

    pub fn register(&self, definition: WorkflowDefinition) {
        self.machines
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(definition.name.clone(), definition);
    }

    pub fn definition(&self, name: &str) -> Option<WorkflowDefinition> {
        self.machines
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Validate a transition, returning the target state.
    pub fn validate(
        &self,
        workflow: &str,
        from: &str,
        action: &str,
    ) -> Result<String, WorkflowError> {
        let machines = self.machines.read().unwrap_or_else(|e| e.into_inner());
        let definition = machines
            .get(workflow)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow.to_string()))?;

        definition
            .target(from, action)
            .map(str::to_string)
            .ok_or_else(|| WorkflowError::TransitionInvalid {
                workflow: workflow.to_string(),
                from: from.to_string(),
                action: action.to_string(),
            })
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_machine_follows_the_lifecycle() {
        let engine = WorkflowEngine::builtin();

        assert_eq!(
            engine.validate("agreement", "Proposed", "consent_complete").unwrap(),
            "Active"
        );
        assert_eq!(
            engine.validate("agreement", "Disputed", "dispute_reinstate").unwrap(),
            "Active"
        );
        assert!(matches!(
            engine.validate("agreement", "Terminated", "terminate"),
            Err(WorkflowError::TransitionInvalid { .. })
        ));
    }

    #[test]
    fn unknown_workflow_is_an_error() {
        let engine = WorkflowEngine::builtin();
        assert!(matches!(
            engine.validate("order", "New", "ship"),
            Err(WorkflowError::UnknownWorkflow(_))
        ));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        let engine = WorkflowEngine::builtin();
        let agreement = engine.definition("agreement").unwrap();
        assert!(agreement.is_terminal("Terminated"));
        assert!(agreement.is_terminal("Resolved"));
        assert!(!agreement.is_terminal("Active"));
    }
}
