//! Postgres implementation of the credential store.
//!
//! Tables: `api_keys`, `webauthn_credentials`, `totp_enrollments` (see
//! `migrations/`). Queries stay single-statement where possible; sweep and
//! revoke are keyed writes with no read-then-write races.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::{
    ApiKeyListFilter, ApiKeyRecord, CredentialStore, TotpEnrollment, WebAuthnCredentialRecord,
};
use crate::error::StoreError;

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl<'r> FromRow<'r, PgRow> for ApiKeyRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            key_id: row.try_get("key_id")?,
            key_hash: row.try_get("key_hash")?,
            owner_user_id: row.try_get("owner_user_id")?,
            business_entity_id: row.try_get("business_entity_id")?,
            scopes: row.try_get("scopes")?,
            rate_limit: row.try_get("rate_limit")?,
            expires_at: row.try_get("expires_at")?,
            revoked: row.try_get("revoked")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for WebAuthnCredentialRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            cred_id: row.try_get("cred_id")?,
            user_id: row.try_get("user_id")?,
            public_key: row.try_get("public_key")?,
            sign_count: row.try_get("sign_count")?,
            transports: row.try_get("transports")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for TotpEnrollment {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            seed_ciphertext: row.try_get("seed_ciphertext")?,
            confirmed: row.try_get("confirmed")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn insert_api_key(&self, record: &ApiKeyRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO api_keys
                (id, key_id, key_hash, owner_user_id, business_entity_id,
                 scopes, rate_limit, expires_at, revoked, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(record.id)
        .bind(&record.key_id)
        .bind(&record.key_hash)
        .bind(record.owner_user_id)
        .bind(record.business_entity_id)
        .bind(&record.scopes)
        .bind(&record.rate_limit)
        .bind(record.expires_at)
        .bind(record.revoked)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_active_api_key(&self, key_id: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        Ok(sqlx::query_as::<_, ApiKeyRecord>(
            "SELECT * FROM api_keys WHERE key_id = $1 AND revoked = FALSE",
        )
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_api_key(&self, key_id: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        Ok(
            sqlx::query_as::<_, ApiKeyRecord>("SELECT * FROM api_keys WHERE key_id = $1")
                .bind(key_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn revoke_api_key(&self, key_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE api_keys SET revoked = TRUE WHERE key_id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_api_key_last_used(
        &self,
        key_id: &str,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE key_id = $1")
            .bind(key_id)
            .bind(when)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_api_keys(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE revoked = TRUE OR expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_api_keys(
        &self,
        filter: &ApiKeyListFilter,
    ) -> Result<Vec<ApiKeyRecord>, StoreError> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM api_keys WHERE TRUE");
        if let Some(revoked) = filter.revoked {
            query.push(" AND revoked = ").push_bind(revoked);
        }
        if let Some(owner) = filter.owner_user_id {
            query.push(" AND owner_user_id = ").push_bind(owner);
        }
        if let Some(business_entity_id) = filter.business_entity_id {
            query
                .push(" AND business_entity_id = ")
                .push_bind(business_entity_id);
        }
        query.push(" ORDER BY created_at DESC");
        Ok(query
            .build_query_as::<ApiKeyRecord>()
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_webauthn_credential(
        &self,
        record: &WebAuthnCredentialRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO webauthn_credentials
                (cred_id, user_id, public_key, sign_count, transports, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(&record.cred_id)
        .bind(record.user_id)
        .bind(&record.public_key)
        .bind(record.sign_count)
        .bind(&record.transports)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_webauthn_credentials(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<WebAuthnCredentialRecord>, StoreError> {
        Ok(sqlx::query_as::<_, WebAuthnCredentialRecord>(
            "SELECT * FROM webauthn_credentials WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_webauthn_credential(
        &self,
        cred_id: &[u8],
    ) -> Result<Option<WebAuthnCredentialRecord>, StoreError> {
        Ok(sqlx::query_as::<_, WebAuthnCredentialRecord>(
            "SELECT * FROM webauthn_credentials WHERE cred_id = $1",
        )
        .bind(cred_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_webauthn_credential(
        &self,
        cred_id: &[u8],
        sign_count: i64,
        public_key: &[u8],
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE webauthn_credentials
            SET sign_count = $2, public_key = $3, last_used_at = $4
            WHERE cred_id = $1
            ",
        )
        .bind(cred_id)
        .bind(sign_count)
        .bind(public_key)
        .bind(when)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_totp_enrollment(
        &self,
        user_id: Uuid,
    ) -> Result<Option<TotpEnrollment>, StoreError> {
        Ok(sqlx::query_as::<_, TotpEnrollment>(
            "SELECT * FROM totp_enrollments WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn upsert_totp_enrollment(
        &self,
        user_id: Uuid,
        seed_ciphertext: &[u8],
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO totp_enrollments (user_id, seed_ciphertext, confirmed, created_at)
            VALUES ($1, $2, FALSE, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET seed_ciphertext = $2, confirmed = FALSE, created_at = $3
            ",
        )
        .bind(user_id)
        .bind(seed_ciphertext)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn confirm_totp_enrollment(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE totp_enrollments SET confirmed = TRUE WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
