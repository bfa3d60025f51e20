use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;
use webauthn_rs::prelude::*;

use crate::cache::{self, TtlCache};
use crate::clock::Clock;
use crate::error::AuthError;
use crate::store::{CredentialStore, WebAuthnCredentialRecord};

/// Security-key ceremonies backed by the credential store and the TTL
/// cache. Ceremony state lives in the cache under the owning user's id,
/// so starting a new ceremony invalidates any outstanding one and any
/// instance of the service can finish a ceremony another instance began.
pub struct WebauthnService {
    webauthn: Webauthn,
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn TtlCache>,
    clock: Arc<dyn Clock>,
    challenge_ttl: Duration,
}

impl WebauthnService {
    /// # Errors
    /// Returns `AuthError::Config` if the relying-party origin or id is
    /// invalid.
    pub fn new(
        rp_id: &str,
        rp_origin: &str,
        rp_name: &str,
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn TtlCache>,
        clock: Arc<dyn Clock>,
        challenge_ttl: Duration,
    ) -> Result<Self, AuthError> {
        let origin = Url::parse(rp_origin)
            .map_err(|e| AuthError::Config(format!("invalid rp origin: {e}")))?;
        let webauthn = WebauthnBuilder::new(rp_id, &origin)
            .map_err(|e| AuthError::Config(format!("webauthn setup failure: {e}")))?
            .rp_name(rp_name)
            .build()
            .map_err(|e| AuthError::Config(format!("webauthn setup failure: {e}")))?;

        Ok(Self {
            webauthn,
            store,
            cache,
            clock,
            challenge_ttl,
        })
    }

    /// Starts registration of a new security key. Existing credentials are
    /// excluded so the same authenticator cannot be enrolled twice.
    ///
    /// # Errors
    /// Propagates store and cache failures; challenge state must be
    /// written or the ceremony cannot complete.
    pub async fn register_begin(
        &self,
        user_id: Uuid,
        user_name: &str,
    ) -> Result<CreationChallengeResponse, AuthError> {
        let existing = self.store.list_webauthn_credentials(user_id).await?;
        let exclude: Vec<CredentialID> = existing.into_iter().map(|k| k.cred_id.into()).collect();

        let (challenge, state) = self
            .webauthn
            .start_securitykey_registration(user_id, user_name, user_name, Some(exclude), None, None)
            .map_err(|e| AuthError::Crypto(format!("registration challenge failure: {e}")))?;

        let bytes = serde_json::to_vec(&state)
            .map_err(|e| AuthError::Crypto(format!("ceremony state encoding failure: {e}")))?;
        self.cache
            .set_with_ttl(
                &cache::webauthn_registration_key(user_id),
                &bytes,
                self.challenge_ttl,
            )
            .await?;

        debug!(user_id = %user_id, "webauthn registration started");
        Ok(challenge)
    }

    /// Finishes registration and persists the new credential.
    ///
    /// # Errors
    /// `ChallengeExpiredOrMissing` when no ceremony is outstanding,
    /// `SignatureInvalid` when attestation verification fails.
    pub async fn register_finish(
        &self,
        user_id: Uuid,
        reg_response: &RegisterPublicKeyCredential,
    ) -> Result<(), AuthError> {
        let state: SecurityKeyRegistration = self
            .take_ceremony_state(&cache::webauthn_registration_key(user_id))
            .await?;

        let sk = self
            .webauthn
            .finish_securitykey_registration(reg_response, &state)
            .map_err(|_| AuthError::SignatureInvalid)?;

        let public_key = serde_json::to_vec(&sk)
            .map_err(|e| AuthError::Crypto(format!("credential encoding failure: {e}")))?;
        let record = WebAuthnCredentialRecord {
            cred_id: sk.cred_id().as_slice().to_vec(),
            user_id,
            public_key,
            // The authoritative counter lives inside the serialized key;
            // this column catches up on the first verified assertion.
            sign_count: 0,
            transports: extract_transports(reg_response),
            created_at: self.clock.now(),
            last_used_at: None,
        };
        self.store.insert_webauthn_credential(&record).await?;

        debug!(user_id = %user_id, "webauthn credential registered");
        Ok(())
    }

    /// Starts an authentication ceremony over all of the user's keys.
    ///
    /// # Errors
    /// `CredentialNotFound` when the user has no registered keys.
    pub async fn auth_begin(&self, user_id: Uuid) -> Result<RequestChallengeResponse, AuthError> {
        let records = self.store.list_webauthn_credentials(user_id).await?;
        if records.is_empty() {
            return Err(AuthError::CredentialNotFound);
        }

        let keys: Vec<SecurityKey> = records
            .iter()
            .filter_map(|r| serde_json::from_slice(&r.public_key).ok())
            .collect();
        if keys.is_empty() {
            warn!(user_id = %user_id, "no decodable webauthn credentials");
            return Err(AuthError::CredentialNotFound);
        }

        let (challenge, state) = self
            .webauthn
            .start_securitykey_authentication(&keys)
            .map_err(|e| AuthError::Crypto(format!("authentication challenge failure: {e}")))?;

        let bytes = serde_json::to_vec(&state)
            .map_err(|e| AuthError::Crypto(format!("ceremony state encoding failure: {e}")))?;
        self.cache
            .set_with_ttl(
                &cache::webauthn_authentication_key(user_id),
                &bytes,
                self.challenge_ttl,
            )
            .await?;

        Ok(challenge)
    }

    /// Finishes authentication, advances the signature counter, and
    /// returns the verified user id.
    ///
    /// # Errors
    /// `ChallengeExpiredOrMissing` when no ceremony is outstanding (or it
    /// was already consumed), `CounterRegression` when the reported
    /// counter does not advance past the stored one, `SignatureInvalid`
    /// for any other assertion failure.
    pub async fn auth_finish(
        &self,
        user_id: Uuid,
        auth_response: &PublicKeyCredential,
    ) -> Result<Uuid, AuthError> {
        let state: SecurityKeyAuthentication = self
            .take_ceremony_state(&cache::webauthn_authentication_key(user_id))
            .await?;

        let result = self
            .webauthn
            .finish_securitykey_authentication(auth_response, &state)
            .map_err(|e| match e {
                WebauthnError::CredentialPossibleCompromise => {
                    warn!(user_id = %user_id, "webauthn counter regression, possible cloned credential");
                    AuthError::CounterRegression
                }
                _ => AuthError::SignatureInvalid,
            })?;

        let cred_id = result.cred_id().as_slice();
        let record = self
            .store
            .find_webauthn_credential(cred_id)
            .await?
            .ok_or(AuthError::CredentialNotFound)?;

        let counter = i64::from(result.counter());
        if let Err(err) = check_counter(record.sign_count, counter) {
            warn!(
                user_id = %record.user_id,
                stored = record.sign_count,
                reported = counter,
                "webauthn counter did not advance, possible cloned credential"
            );
            return Err(err);
        }

        // Re-serialize the credential with the library's updated state so
        // the next ceremony starts from the new counter.
        let mut sk: SecurityKey = serde_json::from_slice(&record.public_key)
            .map_err(|e| AuthError::Crypto(format!("stored credential decoding failure: {e}")))?;
        let _ = sk.update_credential(&result);
        let public_key = serde_json::to_vec(&sk)
            .map_err(|e| AuthError::Crypto(format!("credential encoding failure: {e}")))?;

        self.store
            .update_webauthn_credential(cred_id, counter, &public_key, self.clock.now())
            .await?;

        debug!(user_id = %record.user_id, "webauthn assertion verified");
        Ok(record.user_id)
    }

    /// Consume single-use ceremony state. A missing, expired, or
    /// undecodable entry all present as the same error so a replayed
    /// finish cannot learn which it was.
    async fn take_ceremony_state<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<T, AuthError> {
        let bytes = self
            .cache
            .take(key)
            .await?
            .ok_or(AuthError::ChallengeExpiredOrMissing)?;
        serde_json::from_slice(&bytes).map_err(|_| AuthError::ChallengeExpiredOrMissing)
    }
}

/// Strict counter advance. Authenticators without a counter always report
/// zero; the stored value then never moves and zero stays acceptable.
fn check_counter(stored: i64, reported: i64) -> Result<(), AuthError> {
    if stored == 0 && reported == 0 {
        return Ok(());
    }
    if reported <= stored {
        return Err(AuthError::CounterRegression);
    }
    Ok(())
}

fn extract_transports(reg_response: &RegisterPublicKeyCredential) -> Vec<String> {
    reg_response
        .response
        .transports
        .clone()
        .unwrap_or_default()
        .iter()
        .filter_map(|t| serde_json::to_value(t).ok())
        .filter_map(|v| v.as_str().map(str::to_owned))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn service() -> (Arc<MemoryCache>, WebauthnService) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let svc = WebauthnService::new(
            "example.com",
            "https://example.com",
            "Keygate",
            Arc::new(MemoryStore::new()),
            cache.clone(),
            clock,
            Duration::from_secs(300),
        )
        .unwrap();
        (cache, svc)
    }

    fn dummy_credential() -> PublicKeyCredential {
        // Syntactically valid but unprovable assertion.
        serde_json::from_value(serde_json::json!({
            "id": "AAAA",
            "rawId": "AAAA",
            "type": "public-key",
            "extensions": {},
            "response": {
                "authenticatorData": "AAAA",
                "clientDataJSON": "AAAA",
                "signature": "AAAA"
            }
        }))
        .unwrap()
    }

    #[test]
    fn counter_must_strictly_increase() {
        assert!(check_counter(0, 0).is_ok());
        assert!(check_counter(0, 1).is_ok());
        assert!(check_counter(5, 6).is_ok());
        assert!(matches!(
            check_counter(5, 5),
            Err(AuthError::CounterRegression)
        ));
        assert!(matches!(
            check_counter(5, 3),
            Err(AuthError::CounterRegression)
        ));
        assert!(matches!(
            check_counter(5, 0),
            Err(AuthError::CounterRegression)
        ));
    }

    #[tokio::test]
    async fn auth_begin_without_keys_is_not_found() {
        let (_, svc) = service();
        assert!(matches!(
            svc.auth_begin(Uuid::new_v4()).await,
            Err(AuthError::CredentialNotFound)
        ));
    }

    #[tokio::test]
    async fn finish_without_begin_reports_missing_challenge() {
        // The challenge check must come before any signature work.
        let (_, svc) = service();
        assert!(matches!(
            svc.auth_finish(Uuid::new_v4(), &dummy_credential()).await,
            Err(AuthError::ChallengeExpiredOrMissing)
        ));
    }

    #[tokio::test]
    async fn ceremony_state_is_single_use() {
        let (cache, svc) = service();
        let user_id = Uuid::new_v4();

        // Plant opaque state, then fail verification once; the replay must
        // see a consumed challenge, not another signature error.
        cache
            .set_with_ttl(
                &crate::cache::webauthn_authentication_key(user_id),
                b"not a ceremony",
                Duration::from_secs(300),
            )
            .await
            .unwrap();

        assert!(matches!(
            svc.auth_finish(user_id, &dummy_credential()).await,
            Err(AuthError::ChallengeExpiredOrMissing)
        ));
        // Entry was consumed by the take even though decoding failed.
        assert!(cache
            .get(&crate::cache::webauthn_authentication_key(user_id))
            .await
            .unwrap()
            .is_none());
    }
}
