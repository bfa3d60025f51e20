use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;

use crate::error::AuthError;

/// Encrypts a TOTP seed under the seed key with AAD bound to the user.
/// Returns `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns `AuthError::Crypto` if encryption fails.
pub fn encrypt_seed(key: &[u8; 32], seed: &[u8], user_id: Uuid) -> Result<Vec<u8>, AuthError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = construct_aad(user_id);
    let payload = Payload {
        msg: seed,
        aad: &aad,
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| AuthError::Crypto(format!("seed encryption failure: {e}")))?;

    let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts a stored seed. Expects `data` to be `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns `AuthError::Crypto` if the ciphertext is malformed, the AAD
/// does not match, or authentication fails.
pub fn decrypt_seed(key: &[u8; 32], data: &[u8], user_id: Uuid) -> Result<Vec<u8>, AuthError> {
    if data.len() < 12 {
        return Err(AuthError::Crypto("ciphertext too short".into()));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let aad = construct_aad(user_id);
    let payload = Payload {
        msg: ciphertext,
        aad: &aad,
    };

    cipher
        .decrypt(nonce, payload)
        .map_err(|e| AuthError::Crypto(format!("seed decryption failure: {e}")))
}

fn construct_aad(user_id: Uuid) -> Vec<u8> {
    format!("totp-seed:v1|{user_id}").into_bytes()
}
