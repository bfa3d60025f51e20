//! Per-request credential authentication.
//!
//! Flow Overview: a caller presents either `"{key_id}.{secret}"`, a session
//! token, or the legacy shared ingestion token. API keys resolve through
//! the active cache entry first, then the durable store (repopulating the
//! cache), then the rotation grace entry. Only after resolution does the
//! expensive hash comparison run.
//!
//! Security boundaries:
//! - An unknown key id performs the same full-cost Argon2 comparison
//!   (against a fixed decoy hash) as a known id with a wrong secret, so
//!   timing does not reveal which keys exist.
//! - Cache failures degrade to store-only resolution and never block a
//!   request the store can answer.
//! - `last_used_at` bookkeeping is fire-and-forget and never adds latency
//!   to the authentication decision.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{self, KeyCacheEntry, TtlCache};
use crate::clock::Clock;
use crate::error::AuthError;
use crate::principal::{Principal, Subject};
use crate::scope::Scopes;
use crate::store::CredentialStore;
use crate::token::TokenService;

use crate::apikey::generate::{hash_secret, verify_secret};

/// Fixed plaintext whose hash serves as the comparison decoy for
/// unresolved key ids. The value itself never validates anything.
const DECOY_SECRET: &str = "keygate-decoy-credential";

/// A resolved key: where it came from no longer matters past this point,
/// only its hash, expiry, and grants.
struct ResolvedKey {
    key_hash: String,
    expires_at: chrono::DateTime<chrono::Utc>,
    scopes: Vec<String>,
    owner_user_id: Option<Uuid>,
    business_entity_id: Option<i64>,
}

struct LegacyIngestion {
    token_digest: [u8; 32],
    scopes: Scopes,
}

pub struct RequestAuthenticator {
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn TtlCache>,
    clock: Arc<dyn Clock>,
    tokens: Arc<TokenService>,
    legacy: Option<LegacyIngestion>,
    decoy_hash: String,
    hash_comparisons: AtomicU64,
}

impl RequestAuthenticator {
    /// # Errors
    /// Returns [`AuthError::Crypto`] if the decoy hash cannot be computed.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn TtlCache>,
        clock: Arc<dyn Clock>,
        tokens: Arc<TokenService>,
        legacy_token: Option<&SecretString>,
        legacy_scopes: Scopes,
    ) -> Result<Self, AuthError> {
        let legacy = legacy_token.map(|token| LegacyIngestion {
            token_digest: Sha256::digest(token.expose_secret().as_bytes()).into(),
            scopes: legacy_scopes,
        });
        Ok(Self {
            store,
            cache,
            clock,
            tokens,
            legacy,
            decoy_hash: hash_secret(DECOY_SECRET)?,
            hash_comparisons: AtomicU64::new(0),
        })
    }

    /// Authenticate a presented credential to a principal.
    ///
    /// # Errors
    /// [`AuthError::InvalidCredential`] for anything malformed, unknown,
    /// expired, or mismatched; the caller cannot distinguish which.
    pub async fn authenticate(&self, credential: &str) -> Result<Principal, AuthError> {
        if let Some(legacy) = &self.legacy {
            let digest: [u8; 32] = Sha256::digest(credential.as_bytes()).into();
            if bool::from(digest.ct_eq(&legacy.token_digest)) {
                warn!("request authenticated via legacy ingestion token");
                return Ok(Principal {
                    subject: Subject::LegacyIngestion,
                    scopes: legacy.scopes.clone(),
                });
            }
        }

        // Session tokens are the only credential shape with two separators.
        if credential.matches('.').count() == 2 {
            return self.authenticate_session_token(credential);
        }

        let Some((key_id, secret)) = credential.split_once('.') else {
            return Err(AuthError::InvalidCredential);
        };
        if key_id.is_empty() || secret.is_empty() {
            return Err(AuthError::InvalidCredential);
        }
        self.authenticate_api_key(key_id, secret).await
    }

    /// Number of full-cost hash comparisons performed so far. Exists so the
    /// timing-equalization property is assertable by instrumentation
    /// rather than wall-clock measurement.
    #[must_use]
    pub fn hash_comparisons(&self) -> u64 {
        self.hash_comparisons.load(Ordering::Relaxed)
    }

    fn authenticate_session_token(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = self.tokens.validate(token)?;
        Ok(Principal {
            subject: Subject::User {
                user_id: claims.sub,
                is_admin: claims.is_admin,
                mfa: claims.mfa,
                auth_method: claims.auth_method,
            },
            scopes: Scopes::new(),
        })
    }

    async fn authenticate_api_key(&self, key_id: &str, secret: &str) -> Result<Principal, AuthError> {
        let now = self.clock.now();
        let resolved = self.resolve(key_id, now).await?;

        let Some(key) = resolved else {
            // Unresolved ids burn the same hashing cost as a wrong secret.
            let _ = self.compare_secret(secret, &self.decoy_hash);
            return Err(AuthError::InvalidCredential);
        };

        if !self.compare_secret(secret, &key.key_hash) {
            return Err(AuthError::InvalidCredential);
        }
        if now > key.expires_at {
            return Err(AuthError::InvalidCredential);
        }

        self.touch_last_used(key_id);

        Ok(Principal {
            subject: Subject::ApiKey {
                key_id: key_id.to_string(),
                owner_user_id: key.owner_user_id,
                business_entity_id: key.business_entity_id,
            },
            scopes: Scopes::from(key.scopes),
        })
    }

    /// Resolve a key id: active cache entry, then store (with write-back),
    /// then the rotation grace entry.
    async fn resolve(
        &self,
        key_id: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<ResolvedKey>, AuthError> {
        if let Some(entry) = self.cache_get(&cache::active_key(key_id)).await {
            if let KeyCacheEntry::Active {
                key_hash,
                expires_at,
                scopes,
                owner_user_id,
                business_entity_id,
                ..
            } = entry
            {
                if now <= expires_at {
                    debug!(key_id, "api key resolved from cache");
                    return Ok(Some(ResolvedKey {
                        key_hash,
                        expires_at,
                        scopes,
                        owner_user_id,
                        business_entity_id,
                    }));
                }
            }
        }

        if let Some(record) = self.store.find_active_api_key(key_id).await? {
            self.write_back(key_id, &record, now).await;
            if now <= record.expires_at {
                debug!(key_id, "api key resolved from store");
                return Ok(Some(ResolvedKey {
                    key_hash: record.key_hash,
                    expires_at: record.expires_at,
                    scopes: record.scopes,
                    owner_user_id: record.owner_user_id,
                    business_entity_id: record.business_entity_id,
                }));
            }
        }

        // Rotated keys live on solely in the grace entry; the store row is
        // already revoked.
        if let Some(KeyCacheEntry::Grace {
            key_hash,
            expires_at,
            scopes,
            ..
        }) = self.cache_get(&cache::grace_key(key_id)).await
        {
            debug!(key_id, "api key resolved from rotation grace entry");
            return Ok(Some(ResolvedKey {
                key_hash,
                expires_at,
                scopes,
                owner_user_id: None,
                business_entity_id: None,
            }));
        }

        Ok(None)
    }

    /// Cache read that degrades to a miss when the cache is unreachable.
    async fn cache_get(&self, key: &str) -> Option<KeyCacheEntry> {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => KeyCacheEntry::decode(key, &bytes),
            Ok(None) => None,
            Err(err) => {
                warn!(key, error = %err, "cache unavailable, degrading to store-only resolution");
                None
            }
        }
    }

    /// Best-effort repopulation after a store hit.
    async fn write_back(
        &self,
        key_id: &str,
        record: &crate::store::ApiKeyRecord,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        let Ok(ttl) = (record.expires_at - now).to_std() else {
            return;
        };
        let entry = KeyCacheEntry::Active {
            v: cache::ENTRY_SCHEMA_VERSION,
            key_hash: record.key_hash.clone(),
            expires_at: record.expires_at,
            scopes: record.scopes.clone(),
            owner_user_id: record.owner_user_id,
            business_entity_id: record.business_entity_id,
        };
        let Ok(payload) = entry.encode() else { return };
        if let Err(err) = self
            .cache
            .set_with_ttl(&cache::active_key(key_id), &payload, ttl)
            .await
        {
            warn!(key_id, error = %err, "cache write-back failed, continuing");
        }
    }

    /// Full-cost comparison, instrumented. Both the real and the decoy path
    /// go through here so the counts are comparable.
    fn compare_secret(&self, secret: &str, key_hash: &str) -> bool {
        self.hash_comparisons.fetch_add(1, Ordering::Relaxed);
        verify_secret(secret, key_hash)
    }

    /// Decoupled `last_used_at` update; a slow store write must never add
    /// latency to the decision.
    fn touch_last_used(&self, key_id: &str) {
        let store = Arc::clone(&self.store);
        let when = self.clock.now();
        let key_id = key_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = store.touch_api_key_last_used(&key_id, when).await {
                debug!(key_id = %key_id, error = %err, "last_used_at update failed");
            }
        });
    }
}
