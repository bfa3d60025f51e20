//! Fast-lookup cache seam and the fixed, versioned entry schema.
//!
//! The cache mirrors active and recently-rotated key state so the hot
//! authentication path normally never touches the durable store. Entries
//! use a tagged, versioned schema rather than free-form maps so a future
//! field cannot silently break deserialization: an entry with an unknown
//! version is treated as a miss, never as an error.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::CacheError;

pub use memory::MemoryCache;
pub use redis::RedisCache;

/// Current entry schema version. Bump when a field changes meaning.
pub const ENTRY_SCHEMA_VERSION: u8 = 1;

/// Key-value cache with per-key TTLs. All operations are independent,
/// single-key round-trips; no multi-key transactions exist or are needed.
#[async_trait]
pub trait TtlCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration)
        -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Atomically fetch and delete, closing the replay window for
    /// single-use values. Of two concurrent takers, exactly one observes
    /// the value.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
}

/// Cached API-key state.
///
/// `Active` mirrors a live key with TTL equal to its remaining validity.
/// `Grace` is written only on rotation, with a fixed short TTL, and
/// preserves the superseded key's hash and original expiry (plus scopes, so
/// scope-gated operations keep working through the grace window).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyCacheEntry {
    Active {
        v: u8,
        key_hash: String,
        expires_at: DateTime<Utc>,
        scopes: Vec<String>,
        owner_user_id: Option<uuid::Uuid>,
        business_entity_id: Option<i64>,
    },
    Grace {
        v: u8,
        key_hash: String,
        expires_at: DateTime<Utc>,
        scopes: Vec<String>,
    },
}

impl KeyCacheEntry {
    #[must_use]
    pub fn version(&self) -> u8 {
        match self {
            Self::Active { v, .. } | Self::Grace { v, .. } => *v,
        }
    }

    /// Serialize for storage.
    ///
    /// # Errors
    /// Returns an error if JSON encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(|err| CacheError::Backend(err.to_string()))
    }

    /// Decode a cached payload. Corrupt payloads and unknown schema
    /// versions are logged and treated as a miss so a rolling deploy with a
    /// newer schema never takes authentication down.
    #[must_use]
    pub fn decode(key: &str, bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<Self>(bytes) {
            Ok(entry) if entry.version() == ENTRY_SCHEMA_VERSION => Some(entry),
            Ok(entry) => {
                warn!(
                    key,
                    version = entry.version(),
                    "cache entry schema version mismatch, treating as miss"
                );
                None
            }
            Err(err) => {
                warn!(key, error = %err, "undecodable cache entry, treating as miss");
                None
            }
        }
    }
}

/// Cache key for an active API-key entry.
#[must_use]
pub fn active_key(key_id: &str) -> String {
    format!("ak:{key_id}")
}

/// Cache key for a rotation grace entry.
#[must_use]
pub fn grace_key(key_id: &str) -> String {
    format!("ak:grace:{key_id}")
}

/// Cache key for `WebAuthn` registration ceremony state.
#[must_use]
pub fn webauthn_registration_key(user_id: uuid::Uuid) -> String {
    format!("webauthn:reg:{user_id}")
}

/// Cache key for `WebAuthn` authentication ceremony state.
#[must_use]
pub fn webauthn_authentication_key(user_id: uuid::Uuid) -> String {
    format!("webauthn:authn:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_entry() -> KeyCacheEntry {
        KeyCacheEntry::Active {
            v: ENTRY_SCHEMA_VERSION,
            key_hash: "$argon2id$v=19$m=19456,t=2,p=1$abc$def".into(),
            expires_at: Utc::now(),
            scopes: vec!["ingest".into()],
            owner_user_id: Some(uuid::Uuid::new_v4()),
            business_entity_id: None,
        }
    }

    #[test]
    fn entry_roundtrip() {
        let entry = active_entry();
        let bytes = entry.encode().unwrap();
        assert_eq!(KeyCacheEntry::decode("ak:test", &bytes), Some(entry));
    }

    #[test]
    fn tag_distinguishes_variants() {
        let bytes = active_entry().encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["kind"], "active");
    }

    #[test]
    fn unknown_version_is_a_miss() {
        let entry = KeyCacheEntry::Grace {
            v: ENTRY_SCHEMA_VERSION + 1,
            key_hash: "hash".into(),
            expires_at: Utc::now(),
            scopes: vec![],
        };
        let bytes = entry.encode().unwrap();
        assert_eq!(KeyCacheEntry::decode("ak:grace:test", &bytes), None);
    }

    #[test]
    fn garbage_is_a_miss_not_an_error() {
        assert_eq!(KeyCacheEntry::decode("ak:test", b"{not json"), None);
    }

    #[test]
    fn key_namespaces_do_not_collide() {
        assert_ne!(active_key("abc"), grace_key("abc"));
        let user = uuid::Uuid::new_v4();
        assert_ne!(
            webauthn_registration_key(user),
            webauthn_authentication_key(user)
        );
    }
}
