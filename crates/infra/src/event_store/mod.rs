//! Event store implementations (append-only log).

pub mod in_memory;
pub mod postgres;
#[path = "trait.rs"]
pub mod store_trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store_trait::{AppendObserver, EventStore, EventStoreError};
