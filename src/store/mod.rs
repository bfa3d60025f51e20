//! Durable credential store seam.
//!
//! The relational store is the source of truth for API keys, `WebAuthn`
//! credentials, and TOTP enrollment state. Only the API Key Manager writes
//! key rows; the authenticator reads and (asynchronously) touches
//! `last_used_at`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use postgres::PgCredentialStore;

/// Persisted API key row. The secret itself is never stored; `key_hash` is
/// its Argon2 PHC string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub key_id: String,
    pub key_hash: String,
    pub owner_user_id: Option<Uuid>,
    pub business_entity_id: Option<i64>,
    pub scopes: Vec<String>,
    pub rate_limit: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    /// A key is usable iff it is not revoked and not past its expiry.
    #[must_use]
    pub fn usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}

/// Persisted `WebAuthn` credential. `public_key` holds the serialized
/// verification material, which carries the authenticator's authoritative
/// counter. `sign_count` is a denormalized copy for clone-detection checks
/// and operator queries: it is written as 0 at registration and only
/// reflects the authenticator's reported value once an assertion has been
/// verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebAuthnCredentialRecord {
    pub cred_id: Vec<u8>,
    pub user_id: Uuid,
    pub public_key: Vec<u8>,
    pub sign_count: i64,
    pub transports: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// TOTP enrollment state for a user. Absent row means unenrolled; an
/// unconfirmed row means the first verify has not happened yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotpEnrollment {
    pub user_id: Uuid,
    pub seed_ciphertext: Vec<u8>,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
}

/// Admin listing filter.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyListFilter {
    pub revoked: Option<bool>,
    pub owner_user_id: Option<Uuid>,
    pub business_entity_id: Option<i64>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert_api_key(&self, record: &ApiKeyRecord) -> Result<(), StoreError>;

    /// Fetch a key filtered to non-revoked rows (the hot-path read).
    async fn find_active_api_key(&self, key_id: &str) -> Result<Option<ApiKeyRecord>, StoreError>;

    /// Fetch a key regardless of revocation (rotation retries need this).
    async fn find_api_key(&self, key_id: &str) -> Result<Option<ApiKeyRecord>, StoreError>;

    /// Mark a key revoked. Idempotent; returns whether the key exists.
    async fn revoke_api_key(&self, key_id: &str) -> Result<bool, StoreError>;

    async fn touch_api_key_last_used(
        &self,
        key_id: &str,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Delete rows with `revoked = true OR expires_at < now`. Safe to run
    /// concurrently with every other operation.
    async fn purge_api_keys(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn list_api_keys(
        &self,
        filter: &ApiKeyListFilter,
    ) -> Result<Vec<ApiKeyRecord>, StoreError>;

    async fn insert_webauthn_credential(
        &self,
        record: &WebAuthnCredentialRecord,
    ) -> Result<(), StoreError>;

    async fn list_webauthn_credentials(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<WebAuthnCredentialRecord>, StoreError>;

    async fn find_webauthn_credential(
        &self,
        cred_id: &[u8],
    ) -> Result<Option<WebAuthnCredentialRecord>, StoreError>;

    /// Advance the signature counter and refresh the stored verification
    /// material after a successful assertion.
    async fn update_webauthn_credential(
        &self,
        cred_id: &[u8],
        sign_count: i64,
        public_key: &[u8],
        when: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get_totp_enrollment(&self, user_id: Uuid)
        -> Result<Option<TotpEnrollment>, StoreError>;

    /// Create or replace the (unconfirmed) enrollment for a user.
    async fn upsert_totp_enrollment(
        &self,
        user_id: Uuid,
        seed_ciphertext: &[u8],
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Mark the enrollment confirmed; returns whether a row existed.
    async fn confirm_totp_enrollment(&self, user_id: Uuid) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn usability_requires_unrevoked_and_unexpired() {
        let now = Utc::now();
        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            key_id: "ingest_abc".into(),
            key_hash: "hash".into(),
            owner_user_id: None,
            business_entity_id: None,
            scopes: vec!["ingest".into()],
            rate_limit: "60/minute".into(),
            expires_at: now + Duration::days(90),
            revoked: false,
            created_at: now,
            last_used_at: None,
        };
        assert!(record.usable_at(now));
        assert!(!record.usable_at(now + Duration::days(91)));

        let revoked = ApiKeyRecord {
            revoked: true,
            ..record
        };
        assert!(!revoked.usable_at(now));
    }
}
