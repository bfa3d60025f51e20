//! # Keygate (API-key & multi-factor credential authentication)
//!
//! `keygate` is the credential authentication core that gates access to
//! protected operations: API-key issuance and rotation, per-request
//! authentication, scoped authorization, and multi-factor step-up via TOTP
//! and `WebAuthn` security keys.
//!
//! ## Credential model
//!
//! - **API keys** are long-lived machine credentials presented as
//!   `"{key_id}.{secret}"`. Only an adaptive (Argon2) hash of the secret is
//!   ever persisted; the plaintext is returned exactly once at issuance.
//! - **Session tokens** are short-lived signed bearer tokens carrying
//!   identity plus `is_admin` / `mfa` / `auth_method` claims. They are fully
//!   self-contained: validity is signature + expiry, with no server-side
//!   revocation (bounded blast radius via short TTL).
//! - **Legacy ingestion token**: a single shared secret kept only for a
//!   transitional machine integration, disabled by configuration.
//!
//! ## Hot path
//!
//! Every authenticated request resolves its key through a TTL key-value
//! cache first and falls back to the durable store on miss, repopulating the
//! cache. Rotated keys stay valid for a bounded grace window through a
//! dedicated cache entry, so clients can roll credentials with zero
//! downtime. Cache outages degrade to store-only resolution; they never
//! fail requests that the store can answer.
//!
//! ## Security boundaries
//!
//! - Unknown key id and wrong secret are indistinguishable to callers: both
//!   perform a full-cost hash comparison and return the same error.
//! - `WebAuthn` challenges are single-use and consumed atomically; assertion
//!   signature counters must advance strictly, and a regression is surfaced
//!   as a distinct security event.
//! - TOTP seeds are encrypted at rest with a key supplied by an external
//!   secret manager, bound to the owning user via AEAD associated data.
//!
//! All components hang off an explicit [`AuthState`] built once at process
//! start; nothing reaches into ambient global state.

pub mod apikey;
pub mod authn;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod principal;
pub mod scope;
pub mod state;
pub mod store;
pub mod token;
pub mod totp;
pub mod webauthn;

pub use authn::RequestAuthenticator;
pub use config::AuthConfig;
pub use error::AuthError;
pub use principal::{AuthMethod, Principal, Subject};
pub use scope::Scopes;
pub use state::AuthState;
