use std::sync::Arc;

use secrecy::{ExposeSecret, SecretBox};
use subtle::{Choice, ConstantTimeEq};
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AuthError;
use crate::store::CredentialStore;
use crate::totp::crypto;

/// Material handed to the user once at enrollment time. Neither field is
/// ever persisted in plaintext.
#[derive(Debug)]
pub struct TotpProvisioning {
    pub secret_base32: String,
    pub otpauth_uri: String,
}

/// Server-side TOTP with encrypted seed storage.
pub struct TotpService {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    seed_key: SecretBox<[u8; 32]>,
    issuer: String,
}

impl TotpService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        seed_key: SecretBox<[u8; 32]>,
        issuer: String,
    ) -> Self {
        Self {
            store,
            clock,
            seed_key,
            issuer,
        }
    }

    /// Begins enrollment: generates a fresh seed, encrypts and stores it,
    /// and returns the provisioning URI for an authenticator app.
    ///
    /// Re-enrolling replaces any existing seed and resets confirmation,
    /// so a lost authenticator cannot keep the old seed alive.
    ///
    /// # Errors
    /// Returns an error if seed generation, encryption, or persistence fails.
    pub async fn enroll(
        &self,
        user_id: Uuid,
        account_name: &str,
    ) -> Result<TotpProvisioning, AuthError> {
        let secret = Secret::generate_secret();
        let seed = secret
            .to_bytes()
            .map_err(|e| AuthError::Crypto(format!("seed generation failure: {e:?}")))?;

        let ciphertext = crypto::encrypt_seed(self.seed_key.expose_secret(), &seed, user_id)?;
        self.store
            .upsert_totp_enrollment(user_id, &ciphertext, self.clock.now())
            .await?;

        let totp = self.build_totp(seed, account_name)?;
        debug!(user_id = %user_id, "totp enrollment started");

        Ok(TotpProvisioning {
            secret_base32: totp.get_secret_base32(),
            otpauth_uri: totp.get_url(),
        })
    }

    /// Verifies a code against the stored seed, accepting the current
    /// 30-second window and one window either side. The first successful
    /// verification confirms the enrollment.
    ///
    /// # Errors
    /// `EnrollmentNotStarted` when the user has no stored seed,
    /// `InvalidCredential` when the code matches no accepted window.
    pub async fn verify(&self, user_id: Uuid, code: &str) -> Result<(), AuthError> {
        let enrollment = self
            .store
            .get_totp_enrollment(user_id)
            .await?
            .ok_or(AuthError::EnrollmentNotStarted)?;

        let seed =
            crypto::decrypt_seed(self.seed_key.expose_secret(), &enrollment.seed_ciphertext, user_id)?;
        let totp = self.build_totp(seed, "user")?;

        let now = u64::try_from(self.clock.now().timestamp()).unwrap_or(0);

        // Compare against every accepted window without early exit.
        let mut matched = Choice::from(0u8);
        for ts in [now.saturating_sub(30), now, now + 30] {
            let candidate = totp.generate(ts);
            matched |= candidate.as_bytes().ct_eq(code.as_bytes());
        }

        if !bool::from(matched) {
            return Err(AuthError::InvalidCredential);
        }

        if !enrollment.confirmed {
            self.store.confirm_totp_enrollment(user_id).await?;
            debug!(user_id = %user_id, "totp enrollment confirmed");
        }

        Ok(())
    }

    fn build_totp(&self, seed: Vec<u8>, account_name: &str) -> Result<TOTP, AuthError> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            seed,
            Some(self.issuer.clone()),
            account_name.to_string(),
        )
        .map_err(|e| AuthError::Crypto(format!("totp init failure: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::memory::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn service() -> (Arc<MemoryStore>, Arc<ManualClock>, TotpService) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let svc = TotpService::new(
            store.clone(),
            clock.clone(),
            SecretBox::new(Box::new([7u8; 32])),
            "Keygate".to_string(),
        );
        (store, clock, svc)
    }

    fn code_at(secret_base32: &str, ts: i64) -> String {
        let seed = Secret::Encoded(secret_base32.to_string()).to_bytes().unwrap();
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            seed,
            Some("Keygate".to_string()),
            "user".to_string(),
        )
        .unwrap();
        totp.generate(u64::try_from(ts).unwrap())
    }

    #[tokio::test]
    async fn verify_without_enrollment_is_rejected() {
        let (_, _, svc) = service();
        assert!(matches!(
            svc.verify(Uuid::new_v4(), "123456").await,
            Err(AuthError::EnrollmentNotStarted)
        ));
    }

    #[tokio::test]
    async fn first_successful_verify_confirms_enrollment() {
        let (store, clock, svc) = service();
        let user_id = Uuid::new_v4();

        let prov = svc.enroll(user_id, "a@example.com").await.unwrap();
        assert!(prov.otpauth_uri.starts_with("otpauth://totp/"));
        assert!(!store.get_totp_enrollment(user_id).await.unwrap().unwrap().confirmed);

        let code = code_at(&prov.secret_base32, clock.now().timestamp());
        svc.verify(user_id, &code).await.unwrap();
        assert!(store.get_totp_enrollment(user_id).await.unwrap().unwrap().confirmed);
    }

    #[tokio::test]
    async fn adjacent_windows_accepted_distant_rejected() {
        let (_, clock, svc) = service();
        let user_id = Uuid::new_v4();
        let prov = svc.enroll(user_id, "a@example.com").await.unwrap();
        let now = clock.now().timestamp();

        svc.verify(user_id, &code_at(&prov.secret_base32, now - 30)).await.unwrap();
        svc.verify(user_id, &code_at(&prov.secret_base32, now + 30)).await.unwrap();

        let stale = code_at(&prov.secret_base32, now - 90);
        // Distinct windows can collide on a 6-digit code; only assert
        // rejection when the codes actually differ.
        if stale != code_at(&prov.secret_base32, now)
            && stale != code_at(&prov.secret_base32, now - 30)
            && stale != code_at(&prov.secret_base32, now + 30)
        {
            assert!(matches!(
                svc.verify(user_id, &stale).await,
                Err(AuthError::InvalidCredential)
            ));
        }
    }

    #[tokio::test]
    async fn wrong_code_is_rejected_and_enrollment_stays_unconfirmed() {
        let (store, clock, svc) = service();
        let user_id = Uuid::new_v4();
        let prov = svc.enroll(user_id, "a@example.com").await.unwrap();

        let good = code_at(&prov.secret_base32, clock.now().timestamp());
        let bad = if good == "000000" { "000001" } else { "000000" };
        assert!(matches!(
            svc.verify(user_id, bad).await,
            Err(AuthError::InvalidCredential)
        ));
        assert!(!store.get_totp_enrollment(user_id).await.unwrap().unwrap().confirmed);
    }

    #[tokio::test]
    async fn code_expires_once_outside_the_accepted_windows() {
        let (_, clock, svc) = service();
        let user_id = Uuid::new_v4();
        let prov = svc.enroll(user_id, "a@example.com").await.unwrap();

        let code = code_at(&prov.secret_base32, clock.now().timestamp());
        let later = [
            code_at(&prov.secret_base32, clock.now().timestamp() + 90),
            code_at(&prov.secret_base32, clock.now().timestamp() + 120),
            code_at(&prov.secret_base32, clock.now().timestamp() + 150),
        ];
        clock.advance(Duration::seconds(120));
        if !later.contains(&code) {
            assert!(svc.verify(user_id, &code).await.is_err());
        }
    }
}
