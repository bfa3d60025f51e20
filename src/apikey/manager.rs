//! API key lifecycle: issue, rotate, revoke, sweep, list.
//!
//! The manager is the only writer of key rows and key cache entries.
//! Rotation is a two-step write with no global lock: concurrent rotations
//! of the same key id are not idempotent-safe and must be serialized by the
//! caller (this is an administrative operation, not a hot path).

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::generate;
use crate::cache::{self, KeyCacheEntry, TtlCache, ENTRY_SCHEMA_VERSION};
use crate::clock::Clock;
use crate::error::AuthError;
use crate::scope::Scopes;
use crate::store::{ApiKeyListFilter, ApiKeyRecord, CredentialStore};

/// Parameters for issuing a new key.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub scopes: Scopes,
    pub ttl_days: i64,
    pub owner_user_id: Option<Uuid>,
    pub business_entity_id: Option<i64>,
    pub rate_limit: Option<String>,
}

/// The one-time result of issuance. `credential` is the only copy of the
/// plaintext secret that will ever exist.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub key_id: String,
    pub credential: String,
    pub expires_at: DateTime<Utc>,
}

/// Redacted listing row for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeySummary {
    pub key_id: String,
    pub scopes: Vec<String>,
    pub rate_limit: String,
    pub owner_user_id: Option<Uuid>,
    pub business_entity_id: Option<i64>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<ApiKeyRecord> for ApiKeySummary {
    fn from(record: ApiKeyRecord) -> Self {
        Self {
            key_id: record.key_id,
            scopes: record.scopes,
            rate_limit: record.rate_limit,
            owner_user_id: record.owner_user_id,
            business_entity_id: record.business_entity_id,
            expires_at: record.expires_at,
            revoked: record.revoked,
            created_at: record.created_at,
            last_used_at: record.last_used_at,
        }
    }
}

pub struct ApiKeyManager {
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn TtlCache>,
    clock: Arc<dyn Clock>,
    grace: Duration,
    default_rate_limit: String,
}

impl ApiKeyManager {
    /// # Errors
    /// `Config` when the grace window does not fit in a duration.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn TtlCache>,
        clock: Arc<dyn Clock>,
        grace_hours: i64,
        default_rate_limit: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let grace = Duration::try_hours(grace_hours)
            .ok_or_else(|| AuthError::Config("grace window out of range".to_string()))?;
        Ok(Self {
            store,
            cache,
            clock,
            grace,
            default_rate_limit: default_rate_limit.into(),
        })
    }

    /// Issue a new API key. The returned credential is shown once and never
    /// persisted or logged.
    ///
    /// # Errors
    /// `InvalidRequest` for empty scopes or a TTL that is non-positive or
    /// does not fit in a duration; store
    /// failures propagate. Cache population is best-effort.
    pub async fn issue(&self, request: IssueRequest) -> Result<IssuedKey, AuthError> {
        if request.scopes.is_empty() {
            return Err(AuthError::InvalidRequest("scopes must be non-empty"));
        }
        if request.ttl_days <= 0 {
            return Err(AuthError::InvalidRequest("ttl_days must be positive"));
        }
        let ttl = Duration::try_days(request.ttl_days)
            .ok_or(AuthError::InvalidRequest("ttl_days out of range"))?;

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(AuthError::InvalidRequest("ttl_days out of range"))?;
        let secret = generate::generate_secret();
        let key_id =
            generate::generate_key_id(request.scopes.first().unwrap_or("key"));
        let key_hash = generate::hash_secret(&secret)?;

        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            key_id: key_id.clone(),
            key_hash: key_hash.clone(),
            owner_user_id: request.owner_user_id,
            business_entity_id: request.business_entity_id,
            scopes: request.scopes.to_vec(),
            rate_limit: request
                .rate_limit
                .unwrap_or_else(|| self.default_rate_limit.clone()),
            expires_at,
            revoked: false,
            created_at: now,
            last_used_at: None,
        };
        self.store.insert_api_key(&record).await?;
        self.populate_active_entry(&record, now).await;

        info!(key_id = %key_id, scopes = %request.scopes, %expires_at, "issued api key");
        Ok(IssuedKey {
            credential: format!("{key_id}.{secret}"),
            key_id,
            expires_at,
        })
    }

    /// Rotate a key: revoke the old one, keep it accepted through a grace
    /// cache entry, and issue a replacement with the same grants.
    ///
    /// Not atomic across store and cache. If this fails between the revoke
    /// write and the grace write, the old key stops authenticating and the
    /// caller should retry the rotation (revocation is idempotent).
    ///
    /// # Errors
    /// `CredentialNotFound` for an unknown key id; store failures and the
    /// grace cache write propagate.
    pub async fn rotate(&self, key_id: &str) -> Result<IssuedKey, AuthError> {
        let record = self
            .store
            .find_api_key(key_id)
            .await?
            .ok_or(AuthError::CredentialNotFound)?;
        let now = self.clock.now();

        self.store.revoke_api_key(key_id).await?;
        if let Err(err) = self.cache.delete(&cache::active_key(key_id)).await {
            error!(key_id, error = %err, "failed to drop active cache entry during rotation");
        }

        // The grace entry preserves the superseded key's hash, original
        // expiry, and scopes, bounded by the grace window TTL. Its failure
        // fails the rotation: without it the old key would cut over hard.
        let grace_entry = KeyCacheEntry::Grace {
            v: ENTRY_SCHEMA_VERSION,
            key_hash: record.key_hash.clone(),
            expires_at: record.expires_at,
            scopes: record.scopes.clone(),
        };
        let grace_ttl = self
            .grace
            .to_std()
            .map_err(|err| AuthError::Config(format!("grace window out of range: {err}")))?;
        self.cache
            .set_with_ttl(&cache::grace_key(key_id), &grace_entry.encode()?, grace_ttl)
            .await?;

        let remaining_days = (record.expires_at - now).num_days().max(1);
        let replacement = self
            .issue(IssueRequest {
                scopes: Scopes::from(record.scopes),
                ttl_days: remaining_days,
                owner_user_id: record.owner_user_id,
                business_entity_id: record.business_entity_id,
                rate_limit: Some(record.rate_limit),
            })
            .await?;

        info!(
            old_key_id = key_id,
            new_key_id = %replacement.key_id,
            grace_hours = self.grace.num_hours(),
            "rotated api key"
        );
        Ok(replacement)
    }

    /// Revoke a key immediately. Unlike rotation there is no grace window:
    /// the very next authentication attempt fails.
    ///
    /// # Errors
    /// `CredentialNotFound` for an unknown key id; store failures propagate.
    /// The cache delete is best-effort: if the cache is unreachable, reads
    /// degrade to the store anyway, where the key is already revoked.
    pub async fn revoke(&self, key_id: &str) -> Result<(), AuthError> {
        if !self.store.revoke_api_key(key_id).await? {
            return Err(AuthError::CredentialNotFound);
        }
        if let Err(err) = self.cache.delete(&cache::active_key(key_id)).await {
            error!(key_id, error = %err, "failed to drop active cache entry on revocation");
        }
        info!(key_id, "revoked api key");
        Ok(())
    }

    /// Purge revoked and expired rows. Triggered periodically by an
    /// external scheduler; safe to run concurrently with everything else
    /// because deletes are keyed and fresh keys get fresh identifiers.
    pub async fn sweep(&self) -> Result<u64, AuthError> {
        let now = self.clock.now();
        let purged = self.store.purge_api_keys(now).await?;
        if purged > 0 {
            info!(purged, "swept expired and revoked api keys");
        }
        Ok(purged)
    }

    /// Admin listing with optional filters. Never exposes hashes.
    pub async fn list(&self, filter: &ApiKeyListFilter) -> Result<Vec<ApiKeySummary>, AuthError> {
        let records = self.store.list_api_keys(filter).await?;
        Ok(records.into_iter().map(ApiKeySummary::from).collect())
    }

    /// Best-effort active cache write with TTL equal to remaining validity.
    async fn populate_active_entry(&self, record: &ApiKeyRecord, now: DateTime<Utc>) {
        let Ok(ttl) = (record.expires_at - now).to_std() else {
            return;
        };
        let entry = KeyCacheEntry::Active {
            v: ENTRY_SCHEMA_VERSION,
            key_hash: record.key_hash.clone(),
            expires_at: record.expires_at,
            scopes: record.scopes.clone(),
            owner_user_id: record.owner_user_id,
            business_entity_id: record.business_entity_id,
        };
        let payload = match entry.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key_id = %record.key_id, error = %err, "failed to encode cache entry");
                return;
            }
        };
        if let Err(err) = self
            .cache
            .set_with_ttl(&cache::active_key(&record.key_id), &payload, ttl)
            .await
        {
            warn!(key_id = %record.key_id, error = %err, "cache population failed, continuing");
        }
    }
}
