//! Aggregate contracts for event-sourced domain models.

/// Aggregate root marker + minimal interface.
///
/// This is intentionally small so domain crates can decide how they model
/// state transitions without bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// For event-sourced aggregates this corresponds to the highest
    /// `aggregate_version` applied.
    fn version(&self) -> u64;
}

/// Event-sourced aggregate: decide events from commands, evolve state from events.
///
/// `handle` is pure (no mutation, no IO); `apply` is the only place state
/// changes. Replaying the same events through `apply` must always produce
/// the same state.
pub trait Aggregate {
    type Command;
    type Event;
    type Error;

    /// Decide which events a command produces, given current state.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Evolve state by applying a single event.
    fn apply(&mut self, event: &Self::Event);
}

/// Optimistic-concurrency expectation against an aggregate's stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No concurrency check.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream's current version must match exactly.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(&self, current: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => current == 0,
            ExpectedVersion::Exact(v) => *v == current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_version_matching() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(42));
        assert!(ExpectedVersion::NoStream.matches(0));
        assert!(!ExpectedVersion::NoStream.matches(1));
        assert!(ExpectedVersion::Exact(3).matches(3));
        assert!(!ExpectedVersion::Exact(3).matches(4));
    }
}
