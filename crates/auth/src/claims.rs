use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use covenant_core::{EntityId, RealmId};

/// Bearer-token claims model (transport-agnostic).
///
/// This is the minimal set of claims expected once a token has been decoded
/// and its signature verified by whatever transport layer is in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / acting entity.
    pub sub: EntityId,

    /// Realm context for the token.
    pub realm_id: RealmId,

    /// Scopes granted within the realm context.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Issued-at timestamp.
    #[serde(rename = "iat", with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,

    /// Issuer, when the deployment pins one.
    #[serde(rename = "iss", default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Audience, when the deployment pins one.
    #[serde(rename = "aud", default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("missing token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("issuer mismatch")]
    IssuerMismatch,

    #[error("audience mismatch")]
    AudienceMismatch,
}

/// Deterministically validate claims.
///
/// Note: this validates the *claims* only. Signature verification and
/// decoding are the validator's job.
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// Token validator abstraction (keeps the API layer decoupled from decoding).
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// Minimal HS256 validator (signature verification + claims validation).
#[derive(Debug, Clone)]
pub struct Hs256JwtValidator {
    secret: Vec<u8>,
    issuer: Option<String>,
    audience: Option<String>,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            issuer: None,
            audience: None,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        if token.trim().is_empty() {
            return Err(TokenValidationError::MissingToken);
        }

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        // exp/iat/iss/aud are validated deterministically below.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let decoded = jsonwebtoken::decode::<JwtClaims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map_err(|e| TokenValidationError::InvalidToken(e.to_string()))?;

        let claims = decoded.claims;
        validate_claims(&claims, now)?;

        if let Some(expected) = &self.issuer {
            if claims.issuer.as_deref() != Some(expected.as_str()) {
                return Err(TokenValidationError::IssuerMismatch);
            }
        }
        if let Some(expected) = &self.audience {
            if claims.audience.as_deref() != Some(expected.as_str()) {
                return Err(TokenValidationError::AudienceMismatch);
            }
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(now: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: EntityId::new(),
            realm_id: RealmId::new(),
            scopes: vec!["query:*".to_string()],
            issued_at: now - Duration::minutes(1),
            expires_at: now + Duration::hours(1),
            issuer: Some("covenant".to_string()),
            audience: None,
        }
    }

    fn encode(claims: &JwtClaims, secret: &[u8]) -> String {
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            claims,
            &jsonwebtoken::EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_round_trips() {
        let now = Utc::now();
        let claims = claims(now);
        let token = encode(&claims, b"secret");

        let validator = Hs256JwtValidator::new(b"secret".to_vec()).with_issuer("covenant");
        let decoded = validator.validate(&token, now).unwrap();
        assert_eq!(decoded.sub, claims.sub);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = Utc::now();
        let token = encode(&claims(now), b"secret");

        let validator = Hs256JwtValidator::new(b"other".to_vec());
        assert!(matches!(
            validator.validate(&token, now),
            Err(TokenValidationError::InvalidToken(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let mut c = claims(now);
        c.expires_at = now - Duration::minutes(1);
        c.issued_at = now - Duration::hours(1);
        let token = encode(&c, b"secret");

        let validator = Hs256JwtValidator::new(b"secret".to_vec());
        assert_eq!(
            validator.validate(&token, now),
            Err(TokenValidationError::Expired)
        );
    }

    #[test]
    fn issuer_pin_is_enforced() {
        let now = Utc::now();
        let mut c = claims(now);
        c.issuer = Some("someone-else".to_string());
        let token = encode(&c, b"secret");

        let validator = Hs256JwtValidator::new(b"secret".to_vec()).with_issuer("covenant");
        assert_eq!(
            validator.validate(&token, now),
            Err(TokenValidationError::IssuerMismatch)
        );
    }
}
