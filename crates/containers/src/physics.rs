//! Container physics: the four axes that define what a container is.

use serde::{Deserialize, Serialize};

/// Movement semantics for items leaving or entering the container.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fungibility {
    /// Move semantics: every withdrawal pairs with a deposit elsewhere,
    /// quantities are conserved.
    Strict,
    /// Copy semantics: deposits need no matching withdrawal.
    Versioned,
    /// Flow-through: items never accumulate; a deposit must be withdrawn
    /// within the same command.
    Transient,
}

/// What kind of items the container admits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// Quantities of fungible value (credits, points).
    Values,
    /// Discrete things (documents, goods).
    Objects,
    /// Parties (membership containers, realms).
    Subjects,
    /// References to other aggregates.
    Links,
}

/// Entry/exit gating.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permeability {
    /// Every movement must reference the governing agreement.
    Sealed,
    /// Movements are admitted by gate rules in the governing agreement's terms.
    Gated,
    /// Parties to the governing agreement may move items freely.
    Collaborative,
    /// Anything may enter; movements are still recorded.
    Open,
}

/// Whether code may run inside the container.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Execution {
    Disabled,
    Sandboxed,
    Full,
}

/// What a single item is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Value,
    Object,
    Subject,
    Link,
}

/// How a transfer out of a container behaves, derived from its fungibility.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    Move,
    Copy,
}

/// The full physics of a container.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPhysics {
    pub fungibility: Fungibility,
    pub topology: Topology,
    pub permeability: Permeability,
    pub execution: Execution,
}

impl ContainerPhysics {
    /// A wallet: conserved values behind a gate.
    pub fn wallet() -> Self {
        Self {
            fungibility: Fungibility::Strict,
            topology: Topology::Values,
            permeability: Permeability::Gated,
            execution: Execution::Disabled,
        }
    }

    /// A workspace: copyable objects, collaborative entry, sandboxed execution.
    pub fn workspace() -> Self {
        Self {
            fungibility: Fungibility::Versioned,
            topology: Topology::Objects,
            permeability: Permeability::Collaborative,
            execution: Execution::Sandboxed,
        }
    }

    /// A realm: the tenancy root holding member subjects.
    pub fn realm() -> Self {
        Self {
            fungibility: Fungibility::Versioned,
            topology: Topology::Subjects,
            permeability: Permeability::Gated,
            execution: Execution::Disabled,
        }
    }

    /// Does this container's topology admit an item of `kind`?
    pub fn admits(&self, kind: ItemKind) -> bool {
        matches!(
            (self.topology, kind),
            (Topology::Values, ItemKind::Value)
                | (Topology::Objects, ItemKind::Object)
                | (Topology::Subjects, ItemKind::Subject)
                | (Topology::Links, ItemKind::Link)
        )
    }

    /// Transfer semantics when this container is the source.
    pub fn transfer_mode(&self) -> TransferMode {
        match self.fungibility {
            Fungibility::Strict | Fungibility::Transient => TransferMode::Move,
            Fungibility::Versioned => TransferMode::Copy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_gates_item_kinds() {
        let wallet = ContainerPhysics::wallet();
        assert!(wallet.admits(ItemKind::Value));
        assert!(!wallet.admits(ItemKind::Object));

        let realm = ContainerPhysics::realm();
        assert!(realm.admits(ItemKind::Subject));
        assert!(!realm.admits(ItemKind::Value));
    }

    #[test]
    fn strict_sources_move_while_versioned_copy() {
        assert_eq!(ContainerPhysics::wallet().transfer_mode(), TransferMode::Move);
        assert_eq!(
            ContainerPhysics::workspace().transfer_mode(),
            TransferMode::Copy
        );
    }
}
