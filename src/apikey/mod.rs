//! API key issuance, rotation, and revocation.
//!
//! # Security model
//!
//! - **Key format**: the external credential is `"{key_id}.{secret}"`. The
//!   `key_id` is a scope-derived prefix plus a random hex suffix so an
//!   operator can triage a leaked key at a glance; the secret is 32 random
//!   bytes, URL-safe base64 (≥ 256 bits of entropy).
//! - **Hash storage**: only the Argon2 hash of the secret is persisted. The
//!   plaintext is returned exactly once at issuance and never logged.
//! - **Rotation**: the superseded key is revoked in the store and kept
//!   alive through a grace cache entry for a bounded, operator-configured
//!   window so in-flight clients roll over without downtime. Explicit
//!   revocation is absolute and writes no grace entry.

pub mod generate;
pub mod manager;

pub use manager::{ApiKeyManager, ApiKeySummary, IssueRequest, IssuedKey};
