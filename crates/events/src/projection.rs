use crate::envelope::RecordedEvent;

/// A projection builds a read model from the append-only event log.
///
/// Projections are disposable: the log is the source of truth and any
/// projection can be rebuilt by replaying from `replay_from`. Apply is
/// at-least-once; implementations must tolerate re-applied events
/// (the runner's sequence guard makes duplicates detectable).
pub trait Projection: Send {
    /// Stable projection name, used to key its cursor/watermark.
    fn name(&self) -> &'static str;

    /// First sequence this projection cares about (1 = full history).
    fn replay_from(&self) -> u64 {
        1
    }

    /// Apply a single committed event to the read model.
    fn apply(&mut self, event: &RecordedEvent);

    /// Drop all derived state ahead of a rebuild.
    fn reset(&mut self) {}
}

impl<P: Projection + ?Sized> Projection for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn replay_from(&self) -> u64 {
        (**self).replay_from()
    }

    fn apply(&mut self, event: &RecordedEvent) {
        (**self).apply(event)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}
