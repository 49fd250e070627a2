use chrono::{DateTime, Utc};

/// A domain event: an immutable fact that happened.
///
/// Events are the source of truth. They are append-only, versioned for
/// schema evolution, and replayable: any aggregate's state is the fold of
/// its events in order.
///
/// ## Design constraints
///
/// Events must be serializable (stored as JSON payloads), cloneable (copied
/// into projections and subscribers), `Send + Sync + 'static` (they cross
/// thread boundaries), and own all of their data.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "agreement.activated").
    ///
    /// Used for routing, filtering and deserialization of historical
    /// events. Never change an identifier once events carrying it exist;
    /// introduce a new one instead.
    ///
    /// Convention: `{aggregate}.{action}`.
    fn event_type(&self) -> &'static str;

    /// Schema version of this event's payload.
    ///
    /// Starts at 1. When a payload's structure changes, increment the
    /// version and keep deserialization for the old shape; readers ignore
    /// unknown fields so additive changes usually need no bump.
    fn version(&self) -> u32;

    /// When the event occurred (business time, caller-set).
    ///
    /// Distinct from persistence time: the global `sequence` orders events
    /// for infrastructure; `occurred_at` orders them for the domain.
    fn occurred_at(&self) -> DateTime<Utc>;
}
