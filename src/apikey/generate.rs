//! Secret and key-id generation plus adaptive hashing.

use argon2::password_hash::rand_core::OsRng as SaltRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::AuthError;

/// Random suffix length of a key id, in hex characters.
const KEY_ID_SUFFIX_HEX: usize = 12;

/// Maximum length of the scope-derived prefix.
const KEY_ID_PREFIX_MAX: usize = 16;

/// Generate a key secret: 32 random bytes, URL-safe base64 without padding.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a key id: sanitized scope prefix plus a random hex suffix.
/// The prefix exists purely for human triage; uniqueness comes from the
/// suffix.
#[must_use]
pub fn generate_key_id(scope_prefix: &str) -> String {
    let prefix: String = scope_prefix
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(KEY_ID_PREFIX_MAX)
        .collect::<String>()
        .to_lowercase();
    let prefix = if prefix.is_empty() { "key" } else { &prefix };

    let mut suffix = [0u8; KEY_ID_SUFFIX_HEX / 2];
    OsRng.fill_bytes(&mut suffix);
    format!("{prefix}_{}", hex::encode(suffix))
}

/// Hash a secret with Argon2 for persistence.
///
/// # Errors
/// Returns [`AuthError::Crypto`] if hashing fails.
pub fn hash_secret(secret: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut SaltRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Crypto(format!("secret hashing failed: {err}")))
}

/// Verify a presented secret against a stored hash. Comparison cost is the
/// full Argon2 derivation regardless of outcome; malformed stored hashes
/// count as mismatch.
#[must_use]
pub fn verify_secret(secret: &str, key_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(key_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_urlsafe_and_long_enough() {
        let secret = generate_secret();
        // 32 bytes -> 43 base64 chars, no padding, no '.' (the credential
        // separator) and no '+'/'/'.
        assert_eq!(secret.len(), 43);
        assert!(secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn secrets_are_unique() {
        assert_ne!(generate_secret(), generate_secret());
    }

    #[test]
    fn key_id_carries_scope_prefix() {
        let key_id = generate_key_id("ingest");
        assert!(key_id.starts_with("ingest_"));
        assert_eq!(key_id.len(), "ingest_".len() + 12);
    }

    #[test]
    fn key_id_prefix_is_sanitized() {
        let key_id = generate_key_id("Ingest:Master/2024!");
        assert!(key_id.starts_with("ingestmaster2024_"));

        let fallback = generate_key_id("???");
        assert!(fallback.starts_with("key_"));
    }

    #[test]
    fn hash_verifies_only_the_right_secret() {
        let secret = generate_secret();
        let hash = hash_secret(&secret).unwrap();
        assert!(verify_secret(&secret, &hash));
        assert!(!verify_secret("not-the-secret", &hash));
    }

    #[test]
    fn malformed_hash_is_a_mismatch() {
        assert!(!verify_secret("anything", "not-a-phc-string"));
    }
}
