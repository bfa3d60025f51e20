//! `WebAuthn` security-key step-up.
//!
//! Coordinates the two-step ceremonies: challenge generation, ephemeral
//! ceremony state in the TTL cache (single-use, consumed with an atomic
//! take), and verification of the browser's proof against stored
//! credentials. Uses `SecurityKey` types so hardware tokens act as a
//! second factor rather than a password replacement.

mod service;

pub use service::WebauthnService;
