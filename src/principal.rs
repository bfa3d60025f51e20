//! Authenticated principal: the resolved identity plus its granted scopes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scope::Scopes;

/// Authentication method recorded on a session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Password,
    Totp,
    Webauthn,
}

/// Who authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// Interactive user carrying session-token claims.
    User {
        user_id: Uuid,
        is_admin: bool,
        mfa: bool,
        auth_method: AuthMethod,
    },
    /// Machine caller holding an issued API key.
    ApiKey {
        key_id: String,
        owner_user_id: Option<Uuid>,
        business_entity_id: Option<i64>,
    },
    /// Transitional shared-secret ingestion integration.
    LegacyIngestion,
}

/// The authenticated identity together with its granted scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: Subject,
    pub scopes: Scopes,
}

impl Principal {
    /// Admin flag from session claims; machine principals are never admin.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self.subject, Subject::User { is_admin: true, .. })
    }

    /// Whether multi-factor step-up has been satisfied on this session.
    #[must_use]
    pub fn mfa_satisfied(&self) -> bool {
        matches!(self.subject, Subject::User { mfa: true, .. })
    }

    /// The step-up method used, if this is a user session.
    #[must_use]
    pub fn auth_method(&self) -> Option<AuthMethod> {
        match self.subject {
            Subject::User { auth_method, .. } => Some(auth_method),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_principals_are_never_admin() {
        let principal = Principal {
            subject: Subject::ApiKey {
                key_id: "ingest_abc123".into(),
                owner_user_id: None,
                business_entity_id: None,
            },
            scopes: Scopes::from_iter(["ingest"]),
        };
        assert!(!principal.is_admin());
        assert!(!principal.mfa_satisfied());
        assert_eq!(principal.auth_method(), None);
    }

    #[test]
    fn auth_method_serializes_lowercase() {
        let json = serde_json::to_string(&AuthMethod::Webauthn).unwrap();
        assert_eq!(json, "\"webauthn\"");
    }
}
