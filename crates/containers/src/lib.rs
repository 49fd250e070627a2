//! Containers: typed holders of items with enforced physics.
//!
//! A container's physics (fungibility, topology, permeability, execution)
//! encode what it *is*: a wallet, a workspace, a realm. Every deposit and
//! withdrawal is validated against them, and for strict-fungibility
//! containers the ledger conserves quantities: nothing appears or vanishes
//! without a paired movement.

pub mod container;
pub mod physics;

pub use container::{
    Container, ContainerCommand, ContainerEvent, ContainerId, ContainerItem, CreateContainer,
    Deposit, RecordDepositRejection, RecordTransferFailure, Withdraw,
};
pub use physics::{
    ContainerPhysics, Execution, Fungibility, ItemKind, Permeability, Topology, TransferMode,
};
