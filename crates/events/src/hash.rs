//! Optional event hash chain.
//!
//! Each event may carry a SHA-256 hash over the previous event's hash and
//! its own canonical form. The chain is a testable tamper-evidence
//! property, not a security boundary: the verifier re-walks the log and
//! recomputes every link.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::envelope::{CandidateEvent, RecordedEvent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("event at sequence {sequence} has no hash while the chain is enabled")]
    MissingHash { sequence: u64 },

    #[error("chain broken at sequence {sequence}: expected {expected}, found {found}")]
    Broken {
        sequence: u64,
        expected: String,
        found: String,
    },
}

/// Compute the chain hash for an event about to be recorded.
///
/// `previous` is the prior event's chain hash; `None` for the first event
/// in the log. The canonical form covers identity, stream position and the
/// serialized payload; `serde_json` orders object keys, so the same payload
/// always hashes identically.
pub fn chain_hash(previous: Option<&str>, candidate: &CandidateEvent, sequence: u64) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = previous {
        hasher.update(prev.as_bytes());
    }
    hasher.update(candidate.event_id.to_string().as_bytes());
    hasher.update(sequence.to_be_bytes());
    hasher.update(candidate.aggregate_type.as_str().as_bytes());
    hasher.update(candidate.aggregate_id.to_string().as_bytes());
    hasher.update(candidate.aggregate_version.to_be_bytes());
    hasher.update(candidate.event_type.as_bytes());
    hasher.update(candidate.payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Re-walk a contiguous slice of the log and verify every link.
///
/// The slice must start at the beginning of the chain (the first element is
/// hashed against no predecessor).
pub fn verify_chain(events: &[RecordedEvent]) -> Result<(), ChainError> {
    let mut previous: Option<String> = None;

    for event in events {
        let found = event
            .hash_chain
            .as_deref()
            .ok_or(ChainError::MissingHash {
                sequence: event.sequence,
            })?;

        let candidate = CandidateEvent {
            event_id: event.event_id,
            aggregate_type: event.aggregate_type,
            aggregate_id: event.aggregate_id,
            aggregate_version: event.aggregate_version,
            event_type: event.event_type.clone(),
            event_schema_version: event.event_schema_version,
            occurred_at: event.occurred_at,
            actor: event.actor.clone(),
            payload: event.payload.clone(),
            causation_command_id: event.causation_command_id,
        };

        let expected = chain_hash(previous.as_deref(), &candidate, event.sequence);
        if expected != found {
            return Err(ChainError::Broken {
                sequence: event.sequence,
                expected,
                found: found.to_string(),
            });
        }
        previous = Some(expected);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use covenant_core::{Actor, AggregateId, EntityId, EventId};
    use serde_json::json;

    use crate::aggregate_type::AggregateType;

    fn candidate(version: u64, payload: serde_json::Value) -> CandidateEvent {
        CandidateEvent {
            event_id: EventId::new(),
            aggregate_type: AggregateType::Party,
            aggregate_id: AggregateId::new(),
            aggregate_version: version,
            event_type: "party.created".to_string(),
            event_schema_version: 1,
            occurred_at: Utc::now(),
            actor: Actor::system(EntityId::new()),
            payload,
            causation_command_id: None,
        }
    }

    fn chained(events: Vec<CandidateEvent>) -> Vec<RecordedEvent> {
        let mut previous: Option<String> = None;
        events
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let sequence = (i + 1) as u64;
                let hash = chain_hash(previous.as_deref(), &c, sequence);
                previous = Some(hash.clone());
                c.into_recorded(sequence, Some(hash))
            })
            .collect()
    }

    #[test]
    fn valid_chain_verifies() {
        let log = chained(vec![
            candidate(1, json!({"name": "a"})),
            candidate(2, json!({"name": "b"})),
            candidate(3, json!({"name": "c"})),
        ]);
        assert_eq!(verify_chain(&log), Ok(()));
    }

    #[test]
    fn tampered_payload_breaks_the_chain() {
        let mut log = chained(vec![
            candidate(1, json!({"name": "a"})),
            candidate(2, json!({"name": "b"})),
        ]);
        log[1].payload = json!({"name": "tampered"});
        assert!(matches!(
            verify_chain(&log),
            Err(ChainError::Broken { sequence: 2, .. })
        ));
    }

    #[test]
    fn missing_hash_is_reported() {
        let mut log = chained(vec![candidate(1, json!({}))]);
        log[0].hash_chain = None;
        assert_eq!(
            verify_chain(&log),
            Err(ChainError::MissingHash { sequence: 1 })
        );
    }
}
