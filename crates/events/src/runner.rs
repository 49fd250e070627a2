//! Projection runner utilities (read model builders).
//!
//! Read models are disposable; events are the source of truth. This module
//! provides deterministic replay and cursor tracking without making storage
//! assumptions.

use crate::envelope::RecordedEvent;
use crate::projection::Projection;

/// Tracks projection progress against the global log.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProjectionCursor {
    last_sequence: u64,
}

impl ProjectionCursor {
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Runs recorded events through a projection and tracks progress.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    cursor: Option<ProjectionCursor>,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            cursor: None,
        }
    }

    /// Resume a runner from a persisted watermark.
    ///
    /// Events at or below `last_sequence` are treated as already applied.
    pub fn resume_from(projection: P, last_sequence: u64) -> Self {
        Self {
            projection,
            cursor: Some(ProjectionCursor { last_sequence }),
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn projection_mut(&mut self) -> &mut P {
        &mut self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    /// Current cursor for this projection (if any events were applied).
    pub fn cursor(&self) -> Option<ProjectionCursor> {
        self.cursor
    }

    /// Apply a single event, enforcing monotonic sequencing.
    ///
    /// Re-delivered events (sequence at or below the cursor) are skipped,
    /// which is what makes at-least-once delivery safe.
    pub fn apply(&mut self, event: &RecordedEvent) -> Result<bool, ProjectionError> {
        let found = event.sequence;

        match self.cursor {
            None => {
                self.projection.apply(event);
                self.cursor = Some(ProjectionCursor {
                    last_sequence: found,
                });
                Ok(true)
            }
            Some(mut c) => {
                if found <= c.last_sequence {
                    // Duplicate delivery; already folded.
                    return Ok(false);
                }
                if found != c.last_sequence + 1 {
                    return Err(ProjectionError::NonMonotonicSequence {
                        last: c.last_sequence,
                        found,
                    });
                }

                self.projection.apply(event);
                c.last_sequence = found;
                self.cursor = Some(c);
                Ok(true)
            }
        }
    }

    /// Apply many events in order.
    pub fn run<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a RecordedEvent>,
    ) -> Result<(), ProjectionError> {
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use covenant_core::{Actor, AggregateId, EntityId, EventId};
    use serde_json::json;

    use crate::aggregate_type::AggregateType;

    struct Counting {
        applied: Vec<u64>,
    }

    impl Projection for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn apply(&mut self, event: &RecordedEvent) {
            self.applied.push(event.sequence);
        }
    }

    fn recorded(sequence: u64) -> RecordedEvent {
        RecordedEvent {
            event_id: EventId::new(),
            aggregate_type: AggregateType::System,
            aggregate_id: AggregateId::new(),
            aggregate_version: 1,
            sequence,
            event_type: "system.test".to_string(),
            event_schema_version: 1,
            occurred_at: Utc::now(),
            actor: Actor::system(EntityId::new()),
            payload: json!({}),
            causation_command_id: None,
            hash_chain: None,
        }
    }

    #[test]
    fn applies_in_order_and_tracks_cursor() {
        let mut runner = ProjectionRunner::new(Counting { applied: vec![] });
        runner.run([recorded(1), recorded(2), recorded(3)].iter()).unwrap();

        assert_eq!(runner.projection().applied, vec![1, 2, 3]);
        assert_eq!(runner.cursor().unwrap().last_sequence(), 3);
    }

    #[test]
    fn duplicates_are_skipped() {
        let mut runner = ProjectionRunner::new(Counting { applied: vec![] });
        assert!(runner.apply(&recorded(1)).unwrap());
        assert!(!runner.apply(&recorded(1)).unwrap());
        assert_eq!(runner.projection().applied, vec![1]);
    }

    #[test]
    fn gaps_are_rejected() {
        let mut runner = ProjectionRunner::new(Counting { applied: vec![] });
        runner.apply(&recorded(1)).unwrap();
        let err = runner.apply(&recorded(3)).unwrap_err();
        assert_eq!(
            err,
            ProjectionError::NonMonotonicSequence { last: 1, found: 3 }
        );
    }

    #[test]
    fn resume_skips_already_applied_history() {
        let mut runner = ProjectionRunner::resume_from(Counting { applied: vec![] }, 2);
        assert!(!runner.apply(&recorded(1)).unwrap());
        assert!(!runner.apply(&recorded(2)).unwrap());
        assert!(runner.apply(&recorded(3)).unwrap());
        assert_eq!(runner.projection().applied, vec![3]);
    }
}
