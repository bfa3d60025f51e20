//! Shared authentication state.
//!
//! [`AuthState`] is the one composition point: constructed once at startup
//! from configuration plus the store, cache, and clock seams, then shared
//! behind an `Arc` by whatever serves requests. Every public operation of
//! the subsystem is reachable from here.

use std::sync::Arc;
use std::time::Duration;

use webauthn_rs::prelude::{
    CreationChallengeResponse, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse,
};
use uuid::Uuid;

use crate::apikey::{ApiKeyManager, ApiKeySummary, IssueRequest, IssuedKey};
use crate::authn::RequestAuthenticator;
use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::gate::GateChain;
use crate::principal::{AuthMethod, Principal};
use crate::scope::{self, Scopes};
use crate::store::{ApiKeyListFilter, CredentialStore};
use crate::token::{SessionClaims, TokenGrant, TokenService};
use crate::totp::{TotpProvisioning, TotpService};
use crate::webauthn::WebauthnService;

pub struct AuthState {
    authenticator: RequestAuthenticator,
    keys: ApiKeyManager,
    totp: TotpService,
    webauthn: WebauthnService,
    tokens: Arc<TokenService>,
}

impl AuthState {
    /// Wire every component from configuration and the backend seams.
    ///
    /// # Errors
    /// Returns `AuthError::Config` or `AuthError::Crypto` when the
    /// configuration cannot produce a working component set.
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn TtlCache>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        let (view, signing_key, seed_key) = config.into_parts();

        let tokens = Arc::new(TokenService::new(
            &signing_key,
            view.session_ttl_seconds,
            clock.clone(),
        ));

        let authenticator = RequestAuthenticator::new(
            store.clone(),
            cache.clone(),
            clock.clone(),
            tokens.clone(),
            view.legacy_ingestion_token.as_ref(),
            view.legacy_ingestion_scopes.clone(),
        )?;

        let keys = ApiKeyManager::new(
            store.clone(),
            cache.clone(),
            clock.clone(),
            view.grace_hours,
            view.default_rate_limit.clone(),
        )?;

        let totp = TotpService::new(
            store.clone(),
            clock.clone(),
            seed_key,
            view.totp_issuer.clone(),
        );

        let webauthn = WebauthnService::new(
            &view.webauthn_rp_id,
            &view.webauthn_rp_origin,
            &view.totp_issuer,
            store,
            cache,
            clock,
            Duration::from_secs(view.challenge_ttl_seconds),
        )?;

        Ok(Self {
            authenticator,
            keys,
            totp,
            webauthn,
            tokens,
        })
    }

    /// Resolve a presented credential to a principal.
    ///
    /// # Errors
    /// `InvalidCredential` for anything unknown, expired, or mismatched.
    pub async fn authenticate_request(&self, credential: &str) -> Result<Principal, AuthError> {
        self.authenticator.authenticate(credential).await
    }

    /// Scope check against an authenticated principal.
    ///
    /// # Errors
    /// `InsufficientScope` when any required scope is missing.
    pub fn authorize(&self, principal: &Principal, required: &Scopes) -> Result<(), AuthError> {
        scope::authorize(principal, required)
    }

    /// Evaluate an operation's gate chain against a principal.
    ///
    /// # Errors
    /// Propagates the first failing gate's error.
    pub fn enforce(&self, chain: &GateChain, principal: &Principal) -> Result<(), AuthError> {
        chain.check(principal)
    }

    /// # Errors
    /// See [`ApiKeyManager::issue`].
    pub async fn issue_api_key(&self, request: IssueRequest) -> Result<IssuedKey, AuthError> {
        self.keys.issue(request).await
    }

    /// # Errors
    /// See [`ApiKeyManager::rotate`].
    pub async fn rotate_api_key(&self, key_id: &str) -> Result<IssuedKey, AuthError> {
        self.keys.rotate(key_id).await
    }

    /// # Errors
    /// See [`ApiKeyManager::revoke`].
    pub async fn revoke_api_key(&self, key_id: &str) -> Result<(), AuthError> {
        self.keys.revoke(key_id).await
    }

    /// # Errors
    /// Propagates store failures.
    pub async fn sweep_api_keys(&self) -> Result<u64, AuthError> {
        self.keys.sweep().await
    }

    /// # Errors
    /// Propagates store failures.
    pub async fn list_api_keys(
        &self,
        filter: &ApiKeyListFilter,
    ) -> Result<Vec<ApiKeySummary>, AuthError> {
        self.keys.list(filter).await
    }

    /// # Errors
    /// See [`TotpService::enroll`].
    pub async fn enroll_totp(
        &self,
        user_id: Uuid,
        account_name: &str,
    ) -> Result<TotpProvisioning, AuthError> {
        self.totp.enroll(user_id, account_name).await
    }

    /// # Errors
    /// See [`TotpService::verify`].
    pub async fn verify_totp(&self, user_id: Uuid, code: &str) -> Result<(), AuthError> {
        self.totp.verify(user_id, code).await
    }

    /// Verify a TOTP code and, on success, issue a stepped-up session
    /// token for the user.
    ///
    /// # Errors
    /// Verification errors from [`TotpService::verify`], then token
    /// issuance errors.
    pub async fn totp_step_up(
        &self,
        user_id: Uuid,
        code: &str,
        is_admin: bool,
    ) -> Result<String, AuthError> {
        self.totp.verify(user_id, code).await?;
        self.tokens
            .issue(user_id, TokenGrant::stepped_up(is_admin, AuthMethod::Totp))
    }

    /// # Errors
    /// See [`WebauthnService::register_begin`].
    pub async fn begin_webauthn_registration(
        &self,
        user_id: Uuid,
        user_name: &str,
    ) -> Result<CreationChallengeResponse, AuthError> {
        self.webauthn.register_begin(user_id, user_name).await
    }

    /// # Errors
    /// See [`WebauthnService::register_finish`].
    pub async fn finish_webauthn_registration(
        &self,
        user_id: Uuid,
        response: &RegisterPublicKeyCredential,
    ) -> Result<(), AuthError> {
        self.webauthn.register_finish(user_id, response).await
    }

    /// # Errors
    /// See [`WebauthnService::auth_begin`].
    pub async fn begin_webauthn_authentication(
        &self,
        user_id: Uuid,
    ) -> Result<RequestChallengeResponse, AuthError> {
        self.webauthn.auth_begin(user_id).await
    }

    /// Verify an assertion and, on success, issue a stepped-up session
    /// token for the verified user.
    ///
    /// # Errors
    /// Ceremony errors from [`WebauthnService::auth_finish`], then token
    /// issuance errors.
    pub async fn finish_webauthn_authentication(
        &self,
        user_id: Uuid,
        response: &PublicKeyCredential,
        is_admin: bool,
    ) -> Result<String, AuthError> {
        let verified = self.webauthn.auth_finish(user_id, response).await?;
        self.tokens
            .issue(verified, TokenGrant::stepped_up(is_admin, AuthMethod::Webauthn))
    }

    /// Issue a session token with the default TTL.
    ///
    /// # Errors
    /// `Crypto` if signing fails.
    pub fn issue_session_token(&self, subject: Uuid, grant: TokenGrant) -> Result<String, AuthError> {
        self.tokens.issue(subject, grant)
    }

    /// Issue a session token with an explicit TTL, e.g. the short-lived
    /// pending token handed out between password auth and MFA step-up.
    ///
    /// # Errors
    /// `Crypto` if signing fails.
    pub fn issue_session_token_with_ttl(
        &self,
        subject: Uuid,
        grant: TokenGrant,
        ttl_seconds: i64,
    ) -> Result<String, AuthError> {
        self.tokens
            .issue_with_ttl(subject, grant, chrono::Duration::seconds(ttl_seconds))
    }

    /// # Errors
    /// `InvalidCredential` for a bad signature or an expired token.
    pub fn validate_session_token(&self, token: &str) -> Result<SessionClaims, AuthError> {
        self.tokens.validate(token)
    }

    /// Instrumentation counter for the hot path's hash work.
    #[must_use]
    pub fn hash_comparisons(&self) -> u64 {
        self.authenticator.hash_comparisons()
    }
}
