//! Agreement lifecycle hook processor.
//!
//! After an event transitions an agreement, the processor folds the latest
//! state and runs the matching hook from the type registry. Emissions run
//! as nested intents under the system actor, serially, sharing the
//! triggering dispatch's causation id. A failed emission fails the intent;
//! events already appended stay (they are facts) and the failure reaches
//! the caller.

use tracing::debug;

use covenant_agreements::{Agreement, HookEmission};

use crate::intents::{HandlerContext, IntentError, IntentRequest};
use crate::intents::result::EventSummary;

/// Which lifecycle edge fired.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AgreementTransition {
    Proposed,
    Activated,
    Terminated,
}

pub struct HookProcessor;

impl HookProcessor {
    /// Run the hook for `transition` against the post-fold agreement state.
    /// Returns the events the emissions appended, for the outer result.
    pub async fn process(
        ctx: &HandlerContext,
        agreement: &Agreement,
        transition: AgreementTransition,
    ) -> Result<Vec<EventSummary>, IntentError> {
        let Some(definition) = ctx.agreement_types.get(&agreement.agreement_type) else {
            return Ok(Vec::new());
        };

        let hook = match transition {
            AgreementTransition::Proposed => &definition.on_proposed,
            AgreementTransition::Activated => &definition.on_activated,
            AgreementTransition::Terminated => &definition.on_terminated,
        };
        let Some(hook) = hook else {
            return Ok(Vec::new());
        };

        let emissions = hook(agreement);
        if emissions.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            agreement = %agreement.id,
            agreement_type = %agreement.agreement_type,
            ?transition,
            emissions = emissions.len(),
            "running lifecycle hook"
        );

        let mut events = Vec::new();
        for emission in emissions {
            match emission {
                HookEmission::Intent { name, payload } => {
                    let mut request =
                        IntentRequest::new(&name, ctx.system_actor.clone(), payload);
                    request.realm = agreement.realm_id;
                    let nested = ctx.dispatch_nested_ok(request).await?;
                    events.extend(nested.events.iter().cloned());
                }
            }
        }

        Ok(events)
    }
}
