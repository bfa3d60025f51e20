//! In-memory credential store for tests and embedded use.
//!
//! Mirrors the Postgres implementation's semantics (idempotent revoke,
//! keyed sweep, upsert-resets-confirmation) so integration tests exercise
//! the same contracts the production store honors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{
    ApiKeyListFilter, ApiKeyRecord, CredentialStore, TotpEnrollment, WebAuthnCredentialRecord,
};
use crate::error::StoreError;

#[derive(Default)]
struct Tables {
    api_keys: HashMap<String, ApiKeyRecord>,
    webauthn_credentials: Vec<WebAuthnCredentialRecord>,
    totp_enrollments: HashMap<Uuid, TotpEnrollment>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Test helper: drop every API-key row without touching credentials.
    pub fn clear_api_keys(&self) {
        self.lock().api_keys.clear();
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_api_key(&self, record: &ApiKeyRecord) -> Result<(), StoreError> {
        self.lock()
            .api_keys
            .insert(record.key_id.clone(), record.clone());
        Ok(())
    }

    async fn find_active_api_key(&self, key_id: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        Ok(self
            .lock()
            .api_keys
            .get(key_id)
            .filter(|record| !record.revoked)
            .cloned())
    }

    async fn find_api_key(&self, key_id: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        Ok(self.lock().api_keys.get(key_id).cloned())
    }

    async fn revoke_api_key(&self, key_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.lock();
        match tables.api_keys.get_mut(key_id) {
            Some(record) => {
                record.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch_api_key_last_used(
        &self,
        key_id: &str,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(record) = self.lock().api_keys.get_mut(key_id) {
            record.last_used_at = Some(when);
        }
        Ok(())
    }

    async fn purge_api_keys(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.lock();
        let before = tables.api_keys.len();
        tables
            .api_keys
            .retain(|_, record| !record.revoked && record.expires_at >= now);
        Ok((before - tables.api_keys.len()) as u64)
    }

    async fn list_api_keys(
        &self,
        filter: &ApiKeyListFilter,
    ) -> Result<Vec<ApiKeyRecord>, StoreError> {
        let tables = self.lock();
        let mut records: Vec<ApiKeyRecord> = tables
            .api_keys
            .values()
            .filter(|record| {
                filter.revoked.is_none_or(|revoked| record.revoked == revoked)
                    && filter
                        .owner_user_id
                        .is_none_or(|owner| record.owner_user_id == Some(owner))
                    && filter
                        .business_entity_id
                        .is_none_or(|entity| record.business_entity_id == Some(entity))
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn insert_webauthn_credential(
        &self,
        record: &WebAuthnCredentialRecord,
    ) -> Result<(), StoreError> {
        self.lock().webauthn_credentials.push(record.clone());
        Ok(())
    }

    async fn list_webauthn_credentials(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<WebAuthnCredentialRecord>, StoreError> {
        Ok(self
            .lock()
            .webauthn_credentials
            .iter()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_webauthn_credential(
        &self,
        cred_id: &[u8],
    ) -> Result<Option<WebAuthnCredentialRecord>, StoreError> {
        Ok(self
            .lock()
            .webauthn_credentials
            .iter()
            .find(|record| record.cred_id == cred_id)
            .cloned())
    }

    async fn update_webauthn_credential(
        &self,
        cred_id: &[u8],
        sign_count: i64,
        public_key: &[u8],
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock();
        if let Some(record) = tables
            .webauthn_credentials
            .iter_mut()
            .find(|record| record.cred_id == cred_id)
        {
            record.sign_count = sign_count;
            record.public_key = public_key.to_vec();
            record.last_used_at = Some(when);
        }
        Ok(())
    }

    async fn get_totp_enrollment(
        &self,
        user_id: Uuid,
    ) -> Result<Option<TotpEnrollment>, StoreError> {
        Ok(self.lock().totp_enrollments.get(&user_id).cloned())
    }

    async fn upsert_totp_enrollment(
        &self,
        user_id: Uuid,
        seed_ciphertext: &[u8],
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.lock().totp_enrollments.insert(
            user_id,
            TotpEnrollment {
                user_id,
                seed_ciphertext: seed_ciphertext.to_vec(),
                confirmed: false,
                created_at,
            },
        );
        Ok(())
    }

    async fn confirm_totp_enrollment(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.lock();
        match tables.totp_enrollments.get_mut(&user_id) {
            Some(enrollment) => {
                enrollment.confirmed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(key_id: &str, revoked: bool, expires_in: Duration) -> ApiKeyRecord {
        let now = Utc::now();
        ApiKeyRecord {
            id: Uuid::new_v4(),
            key_id: key_id.into(),
            key_hash: "hash".into(),
            owner_user_id: None,
            business_entity_id: None,
            scopes: vec!["ingest".into()],
            rate_limit: "60/minute".into(),
            expires_at: now + expires_in,
            revoked,
            created_at: now,
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = MemoryStore::new();
        store
            .insert_api_key(&record("ingest_a", false, Duration::days(30)))
            .await
            .unwrap();
        assert!(store.revoke_api_key("ingest_a").await.unwrap());
        assert!(store.revoke_api_key("ingest_a").await.unwrap());
        assert!(!store.revoke_api_key("missing").await.unwrap());
        assert!(store.find_active_api_key("ingest_a").await.unwrap().is_none());
        assert!(store.find_api_key("ingest_a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_removes_revoked_and_expired() {
        let store = MemoryStore::new();
        store
            .insert_api_key(&record("live", false, Duration::days(30)))
            .await
            .unwrap();
        store
            .insert_api_key(&record("revoked", true, Duration::days(30)))
            .await
            .unwrap();
        store
            .insert_api_key(&record("expired", false, Duration::days(-1)))
            .await
            .unwrap();

        let purged = store.purge_api_keys(Utc::now()).await.unwrap();
        assert_eq!(purged, 2);
        assert!(store.find_api_key("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn totp_upsert_resets_confirmation() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store
            .upsert_totp_enrollment(user, b"seed-1", Utc::now())
            .await
            .unwrap();
        assert!(store.confirm_totp_enrollment(user).await.unwrap());
        assert!(store.get_totp_enrollment(user).await.unwrap().unwrap().confirmed);

        // Re-enrolling starts over unconfirmed.
        store
            .upsert_totp_enrollment(user, b"seed-2", Utc::now())
            .await
            .unwrap();
        let enrollment = store.get_totp_enrollment(user).await.unwrap().unwrap();
        assert!(!enrollment.confirmed);
        assert_eq!(enrollment.seed_ciphertext, b"seed-2");
    }
}
