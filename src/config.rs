//! Authentication configuration.
//!
//! Built once at process start and consumed by [`crate::state::AuthState`];
//! components receive what they need explicitly rather than reading ambient
//! global state. Key material (token signing key, TOTP seed-encryption key,
//! legacy ingestion token) is provided by the caller's secret manager and
//! held behind `secrecy` wrappers.

use secrecy::{SecretBox, SecretString};
use url::Url;

use crate::scope::Scopes;

const DEFAULT_KEY_GRACE_HOURS: i64 = 4;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 4 * 60 * 60;
const DEFAULT_CHALLENGE_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_RATE_LIMIT: &str = "60/minute";
const DEFAULT_TOTP_ISSUER: &str = "Keygate";

#[derive(Debug)]
pub struct AuthConfig {
    token_signing_key: SecretString,
    totp_seed_key: SecretBox<[u8; 32]>,
    grace_hours: i64,
    session_ttl_seconds: i64,
    challenge_ttl_seconds: u64,
    default_rate_limit: String,
    totp_issuer: String,
    webauthn_rp_id: String,
    webauthn_rp_origin: String,
    legacy_ingestion_token: Option<SecretString>,
    legacy_ingestion_scopes: Scopes,
}

impl AuthConfig {
    /// Create a configuration with defaults matching production behavior.
    ///
    /// `rp_origin` is the public origin served to browsers; the `WebAuthn`
    /// relying-party id is derived from its host.
    #[must_use]
    pub fn new(
        token_signing_key: SecretString,
        totp_seed_key: SecretBox<[u8; 32]>,
        rp_origin: &str,
    ) -> Self {
        let rp_id = Url::parse(rp_origin)
            .ok()
            .and_then(|url| url.host_str().map(ToString::to_string))
            .unwrap_or_else(|| "localhost".to_string());
        let rp_origin = rp_origin.trim_end_matches('/').to_string();

        Self {
            token_signing_key,
            totp_seed_key,
            grace_hours: DEFAULT_KEY_GRACE_HOURS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
            default_rate_limit: DEFAULT_RATE_LIMIT.to_string(),
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
            webauthn_rp_id: rp_id,
            webauthn_rp_origin: rp_origin,
            legacy_ingestion_token: None,
            legacy_ingestion_scopes: Scopes::from_iter(["ingest"]),
        }
    }

    /// Bounded window during which a rotated key keeps authenticating.
    #[must_use]
    pub fn with_grace_hours(mut self, hours: i64) -> Self {
        self.grace_hours = hours;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: u64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_default_rate_limit(mut self, rate_limit: impl Into<String>) -> Self {
        self.default_rate_limit = rate_limit.into();
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.totp_issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_webauthn_rp_id(mut self, rp_id: impl Into<String>) -> Self {
        self.webauthn_rp_id = rp_id.into();
        self
    }

    /// Enable the transitional shared-secret ingestion path. Absent by
    /// default; must stay retireable by configuration alone.
    #[must_use]
    pub fn with_legacy_ingestion_token(mut self, token: SecretString) -> Self {
        self.legacy_ingestion_token = Some(token);
        self
    }

    #[must_use]
    pub fn with_legacy_ingestion_scopes(mut self, scopes: Scopes) -> Self {
        self.legacy_ingestion_scopes = scopes;
        self
    }

    #[must_use]
    pub fn token_signing_key(&self) -> &SecretString {
        &self.token_signing_key
    }

    #[must_use]
    pub fn totp_seed_key(&self) -> &SecretBox<[u8; 32]> {
        &self.totp_seed_key
    }

    #[must_use]
    pub fn grace_hours(&self) -> i64 {
        self.grace_hours
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn challenge_ttl_seconds(&self) -> u64 {
        self.challenge_ttl_seconds
    }

    #[must_use]
    pub fn default_rate_limit(&self) -> &str {
        &self.default_rate_limit
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    #[must_use]
    pub fn webauthn_rp_id(&self) -> &str {
        &self.webauthn_rp_id
    }

    #[must_use]
    pub fn webauthn_rp_origin(&self) -> &str {
        &self.webauthn_rp_origin
    }

    #[must_use]
    pub fn legacy_ingestion_token(&self) -> Option<&SecretString> {
        self.legacy_ingestion_token.as_ref()
    }

    #[must_use]
    pub fn legacy_ingestion_scopes(&self) -> &Scopes {
        &self.legacy_ingestion_scopes
    }

    /// Consume the configuration, handing out the secret key material.
    pub(crate) fn into_parts(self) -> (AuthConfigView, SecretString, SecretBox<[u8; 32]>) {
        let view = AuthConfigView {
            grace_hours: self.grace_hours,
            session_ttl_seconds: self.session_ttl_seconds,
            challenge_ttl_seconds: self.challenge_ttl_seconds,
            default_rate_limit: self.default_rate_limit,
            totp_issuer: self.totp_issuer,
            webauthn_rp_id: self.webauthn_rp_id,
            webauthn_rp_origin: self.webauthn_rp_origin,
            legacy_ingestion_token: self.legacy_ingestion_token,
            legacy_ingestion_scopes: self.legacy_ingestion_scopes,
        };
        (view, self.token_signing_key, self.totp_seed_key)
    }
}

/// Non-secret configuration retained by [`crate::state::AuthState`] after
/// construction.
#[derive(Debug)]
pub(crate) struct AuthConfigView {
    pub(crate) grace_hours: i64,
    pub(crate) session_ttl_seconds: i64,
    pub(crate) challenge_ttl_seconds: u64,
    pub(crate) default_rate_limit: String,
    pub(crate) totp_issuer: String,
    pub(crate) webauthn_rp_id: String,
    pub(crate) webauthn_rp_origin: String,
    pub(crate) legacy_ingestion_token: Option<SecretString>,
    pub(crate) legacy_ingestion_scopes: Scopes,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AuthConfig {
        AuthConfig::new(
            SecretString::from("signing-key".to_string()),
            SecretBox::new(Box::new([7u8; 32])),
            "https://app.example.com/",
        )
    }

    #[test]
    fn rp_id_derived_from_origin_host() {
        let config = test_config();
        assert_eq!(config.webauthn_rp_id(), "app.example.com");
        assert_eq!(config.webauthn_rp_origin(), "https://app.example.com");
    }

    #[test]
    fn defaults_match_production_behavior() {
        let config = test_config();
        assert_eq!(config.grace_hours(), 4);
        assert_eq!(config.session_ttl_seconds(), 4 * 60 * 60);
        assert_eq!(config.challenge_ttl_seconds(), 300);
        assert_eq!(config.default_rate_limit(), "60/minute");
        assert!(config.legacy_ingestion_token().is_none());
    }

    #[test]
    fn builders_override_defaults() {
        let config = test_config()
            .with_grace_hours(12)
            .with_totp_issuer("Performance Central")
            .with_legacy_ingestion_scopes(Scopes::from_iter(["ingest", "ingest_master"]));
        assert_eq!(config.grace_hours(), 12);
        assert_eq!(config.totp_issuer(), "Performance Central");
        assert_eq!(config.legacy_ingestion_scopes().len(), 2);
    }
}
