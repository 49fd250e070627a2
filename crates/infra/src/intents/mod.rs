//! The intent pipeline: registry, dispatcher, handlers.

pub mod context;
pub mod dispatcher;
pub mod handlers;
pub mod registry;
pub mod result;
pub mod schema;

pub use context::HandlerContext;
pub use dispatcher::{IntentDispatcher, IntentRequest, DEFAULT_DEADLINE};
pub use registry::{IntentCategory, IntentDefinition, IntentHandler, IntentRegistry};
pub use result::{
    Affordance, ErrorCode, EventSummary, HandlerOutput, IntentError, IntentMeta, IntentOutcome,
    IntentResult,
};
pub use schema::{FieldKind, PayloadSchema};
