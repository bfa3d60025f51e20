//! TOTP enrollment and verification.
//!
//! Seeds are generated server side, encrypted with `ChaCha20Poly1305`
//! under the configured seed key, and stored as `nonce || ciphertext`
//! with AAD bound to the owning user. An enrollment is unusable for
//! step-up until the first successful verification confirms it.

pub(crate) mod crypto;
mod service;

pub use service::{TotpProvisioning, TotpService};
