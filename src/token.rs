//! Session token issuance and validation.
//!
//! Tokens are self-contained HS256 assertions of
//! `{sub, iat, exp, is_admin, mfa, auth_method}`. There is deliberately no
//! server-side record of issued tokens: validity is signature plus expiry,
//! and early revocation is not supported (bounded blast radius via short
//! TTL). Expiry is evaluated against the injected clock; the library's own
//! exp handling is disabled so the decision has a single time source.

use chrono::Duration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AuthError;
use crate::principal::AuthMethod;

/// Claims carried by every session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub is_admin: bool,
    pub mfa: bool,
    pub auth_method: AuthMethod,
}

/// What a token asserts beyond identity.
#[derive(Debug, Clone, Copy)]
pub struct TokenGrant {
    pub is_admin: bool,
    pub mfa: bool,
    pub auth_method: AuthMethod,
}

impl TokenGrant {
    /// Grant for a freshly password-authenticated session, before any
    /// step-up.
    #[must_use]
    pub fn password(is_admin: bool) -> Self {
        Self {
            is_admin,
            mfa: false,
            auth_method: AuthMethod::Password,
        }
    }

    /// Grant for a session elevated via step-up.
    #[must_use]
    pub fn stepped_up(is_admin: bool, auth_method: AuthMethod) -> Self {
        Self {
            is_admin,
            mfa: true,
            auth_method,
        }
    }
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    #[must_use]
    pub fn new(signing_key: &SecretString, ttl_seconds: i64, clock: Arc<dyn Clock>) -> Self {
        let secret = signing_key.expose_secret().as_bytes();
        // Signature checking stays with the library; expiry is ours so the
        // clock seam governs it.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl: Duration::seconds(ttl_seconds),
            clock,
        }
    }

    /// Issue a token for `subject` with the default TTL.
    ///
    /// # Errors
    /// Returns [`AuthError::Crypto`] if signing fails.
    pub fn issue(&self, subject: Uuid, grant: TokenGrant) -> Result<String, AuthError> {
        self.issue_with_ttl(subject, grant, self.ttl)
    }

    /// Issue a token with an explicit TTL (pending-MFA tokens are shorter
    /// lived than regular sessions).
    ///
    /// # Errors
    /// Returns [`AuthError::Crypto`] if signing fails.
    pub fn issue_with_ttl(
        &self,
        subject: Uuid,
        grant: TokenGrant,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = self.clock.now();
        let claims = SessionClaims {
            sub: subject,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            is_admin: grant.is_admin,
            mfa: grant.mfa,
            auth_method: grant.auth_method,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
            .map_err(|err| AuthError::Crypto(format!("token signing failed: {err}")))
    }

    /// Validate signature and expiry, returning the claims.
    ///
    /// # Errors
    /// [`AuthError::InvalidCredential`] for bad signatures, malformed
    /// tokens, and expired tokens alike.
    pub fn validate(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map_err(|_| AuthError::InvalidCredential)?;
        if self.clock.now().timestamp() >= data.claims.exp {
            return Err(AuthError::InvalidCredential);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;

    fn service() -> (Arc<ManualClock>, TokenService) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let signing_key = SecretString::from("test-signing-key".to_string());
        let tokens = TokenService::new(&signing_key, 4 * 60 * 60, clock.clone());
        (clock, tokens)
    }

    #[test]
    fn roundtrip_preserves_claims() {
        let (_clock, tokens) = service();
        let subject = Uuid::new_v4();
        let token = tokens
            .issue(subject, TokenGrant::stepped_up(true, AuthMethod::Webauthn))
            .unwrap();

        let claims = tokens.validate(&token).unwrap();
        assert_eq!(claims.sub, subject);
        assert!(claims.is_admin);
        assert!(claims.mfa);
        assert_eq!(claims.auth_method, AuthMethod::Webauthn);
    }

    #[test]
    fn expired_token_is_invalid() {
        let (clock, tokens) = service();
        let token = tokens
            .issue(Uuid::new_v4(), TokenGrant::password(false))
            .unwrap();
        assert!(tokens.validate(&token).is_ok());

        clock.advance(Duration::hours(4) + Duration::seconds(1));
        assert!(matches!(
            tokens.validate(&token),
            Err(AuthError::InvalidCredential)
        ));
    }

    #[test]
    fn custom_ttl_bounds_pending_tokens() {
        let (clock, tokens) = service();
        let token = tokens
            .issue_with_ttl(
                Uuid::new_v4(),
                TokenGrant::password(false),
                Duration::minutes(5),
            )
            .unwrap();
        clock.advance(Duration::minutes(6));
        assert!(tokens.validate(&token).is_err());
    }

    #[test]
    fn tampered_token_is_invalid() {
        let (_clock, tokens) = service();
        let token = tokens
            .issue(Uuid::new_v4(), TokenGrant::password(false))
            .unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(tokens.validate(&tampered).is_err());
        assert!(tokens.validate("not-a-token").is_err());
    }

    #[test]
    fn other_key_signature_is_rejected() {
        let (clock, tokens) = service();
        let other = TokenService::new(
            &SecretString::from("different-key".to_string()),
            3600,
            clock,
        );
        let token = other
            .issue(Uuid::new_v4(), TokenGrant::password(false))
            .unwrap();
        assert!(tokens.validate(&token).is_err());
    }
}
