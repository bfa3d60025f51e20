//! Error taxonomy for the authentication subsystem.
//!
//! Verification failures are terminal for the request and are never retried
//! here. Store and cache connectivity failures surface as their own variants
//! so callers can retry at the infrastructure boundary. No variant ever
//! carries secret material or hash values.

use thiserror::Error;

/// Failure raised by the durable credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failure raised by the key-value cache layer.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Stable error classification exposed to callers.
///
/// Everything that would tell an attacker whether a key id exists, a secret
/// was close, or a token was merely expired collapses into
/// [`AuthError::InvalidCredential`].
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed, unknown, expired, or hash-mismatched key or token.
    #[error("invalid credential")]
    InvalidCredential,

    /// Known-valid principal, forbidden operation.
    #[error("insufficient scope")]
    InsufficientScope,

    /// Valid principal, multi-factor step-up not yet satisfied.
    #[error("multi-factor authentication required")]
    MfaRequired,

    /// The single-use challenge was already consumed or timed out.
    #[error("challenge expired or missing")]
    ChallengeExpiredOrMissing,

    /// No stored credential matches the request.
    #[error("credential not found")]
    CredentialNotFound,

    /// Cryptographic verification of an assertion or attestation failed.
    #[error("signature invalid")]
    SignatureInvalid,

    /// The authenticator's signature counter did not advance. Possible
    /// credential cloning; surfaced distinctly for audit.
    #[error("signature counter regression")]
    CounterRegression,

    /// Multi-factor operation attempted before enrollment began.
    #[error("enrollment not started")]
    EnrollmentNotStarted,

    /// Caller-side contract violation (empty scopes, non-positive TTL).
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    /// Internal cryptographic plumbing failed (hashing, seed encryption).
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Component misconfiguration detected at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable store unreachable and no degraded mode applies.
    #[error("store unavailable")]
    Store(#[from] StoreError),

    /// Cache unreachable and no degraded mode applies.
    #[error("cache unavailable")]
    Cache(#[from] CacheError),
}

impl AuthError {
    /// Stable machine-readable classification, suitable for response bodies
    /// and audit logs. Never includes internal detail.
    #[must_use]
    pub fn classification(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "invalid_credential",
            Self::InsufficientScope => "insufficient_scope",
            Self::MfaRequired => "mfa_required",
            Self::ChallengeExpiredOrMissing => "challenge_expired_or_missing",
            Self::CredentialNotFound => "credential_not_found",
            Self::SignatureInvalid => "signature_invalid",
            Self::CounterRegression => "counter_regression",
            Self::EnrollmentNotStarted => "enrollment_not_started",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Crypto(_) | Self::Config(_) => "internal",
            Self::Store(_) | Self::Cache(_) => "upstream_unavailable",
        }
    }

    /// Whether the failure is transient and eligible for client retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Cache(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_stable() {
        assert_eq!(
            AuthError::InvalidCredential.classification(),
            "invalid_credential"
        );
        assert_eq!(
            AuthError::CounterRegression.classification(),
            "counter_regression"
        );
        assert_eq!(
            AuthError::Cache(CacheError::Backend("down".into())).classification(),
            "upstream_unavailable"
        );
    }

    #[test]
    fn only_upstream_failures_are_retryable() {
        assert!(AuthError::Cache(CacheError::Backend("down".into())).is_retryable());
        assert!(!AuthError::InvalidCredential.is_retryable());
        assert!(!AuthError::SignatureInvalid.is_retryable());
    }

    #[test]
    fn display_never_leaks_detail_for_credential_failures() {
        assert_eq!(AuthError::InvalidCredential.to_string(), "invalid credential");
    }
}
