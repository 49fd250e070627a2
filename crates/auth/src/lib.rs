//! Authorization and authentication.
//!
//! Authority in the ledger is attribute-based: an actor's effective
//! permissions are the union of the grants declared by every active
//! agreement naming it. Nothing here keeps a permission table; decisions
//! fold agreements on demand.

pub mod api_key;
pub mod authn;
pub mod claims;
pub mod engine;
pub mod permission;

pub use api_key::{ApiKey, ApiKeyCommand, ApiKeyEvent, ApiKeyId, IssueApiKey, RevokeApiKey};
pub use authn::{hash_key, ApiKeyIndex, ApiKeyRecord, AuthenticationEngine, AuthnContext};
pub use claims::{validate_claims, Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError};
pub use engine::{AgreementSource, AuthorizationEngine, AuthzDecision, AuthzRequest};
pub use permission::Permission;
