//! Per-operation access gates.
//!
//! Gates replace decorator-style wrapping with an explicit, ordered chain
//! of pure checks attached to an operation by configuration. A chain fails
//! closed: evaluation stops at the first gate that rejects, and the
//! conventional order is authenticate → scopes → admin → MFA.

use crate::error::AuthError;
use crate::principal::{AuthMethod, Principal};
use crate::scope::{self, Scopes};

/// A single pure access check against an authenticated principal.
#[derive(Debug, Clone)]
pub enum Gate {
    /// The principal's grants must contain every listed scope.
    RequireScopes(Scopes),
    /// The session must carry the admin claim.
    RequireAdmin,
    /// Multi-factor step-up must be satisfied, optionally by a specific
    /// method (e.g. WebAuthn-only for destructive admin actions).
    RequireMfa { method: Option<AuthMethod> },
}

impl Gate {
    /// # Errors
    /// `InsufficientScope` for scope and admin failures, `MfaRequired`
    /// when step-up is missing or of the wrong method.
    pub fn check(&self, principal: &Principal) -> Result<(), AuthError> {
        match self {
            Self::RequireScopes(required) => scope::authorize(principal, required),
            Self::RequireAdmin => {
                if principal.is_admin() {
                    Ok(())
                } else {
                    Err(AuthError::InsufficientScope)
                }
            }
            Self::RequireMfa { method } => {
                if !principal.mfa_satisfied() {
                    return Err(AuthError::MfaRequired);
                }
                match method {
                    Some(required) if principal.auth_method() != Some(*required) => {
                        Err(AuthError::MfaRequired)
                    }
                    _ => Ok(()),
                }
            }
        }
    }
}

/// An ordered chain of gates for one operation.
#[derive(Debug, Clone, Default)]
pub struct GateChain {
    gates: Vec<Gate>,
}

impl GateChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn require_scopes(mut self, scopes: Scopes) -> Self {
        self.gates.push(Gate::RequireScopes(scopes));
        self
    }

    #[must_use]
    pub fn require_admin(mut self) -> Self {
        self.gates.push(Gate::RequireAdmin);
        self
    }

    #[must_use]
    pub fn require_mfa(mut self) -> Self {
        self.gates.push(Gate::RequireMfa { method: None });
        self
    }

    #[must_use]
    pub fn require_mfa_method(mut self, method: AuthMethod) -> Self {
        self.gates.push(Gate::RequireMfa {
            method: Some(method),
        });
        self
    }

    /// Evaluate every gate in order, stopping at the first rejection.
    ///
    /// # Errors
    /// Propagates the first failing gate's error.
    pub fn check(&self, principal: &Principal) -> Result<(), AuthError> {
        for gate in &self.gates {
            gate.check(principal)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::Subject;
    use uuid::Uuid;

    fn user(is_admin: bool, mfa: bool, auth_method: AuthMethod) -> Principal {
        Principal {
            subject: Subject::User {
                user_id: Uuid::new_v4(),
                is_admin,
                mfa,
                auth_method,
            },
            scopes: Scopes::new(),
        }
    }

    fn machine(scopes: &[&str]) -> Principal {
        Principal {
            subject: Subject::ApiKey {
                key_id: "ingest_abc".into(),
                owner_user_id: None,
                business_entity_id: None,
            },
            scopes: Scopes::from_iter(scopes.iter().copied()),
        }
    }

    #[test]
    fn admin_gate_rejects_non_admin_sessions() {
        let chain = GateChain::new().require_admin();
        assert!(chain.check(&user(true, false, AuthMethod::Password)).is_ok());
        assert!(matches!(
            chain.check(&user(false, false, AuthMethod::Password)),
            Err(AuthError::InsufficientScope)
        ));
        assert!(chain.check(&machine(&["ingest"])).is_err());
    }

    #[test]
    fn mfa_gate_requires_step_up() {
        let chain = GateChain::new().require_mfa();
        assert!(matches!(
            chain.check(&user(false, false, AuthMethod::Password)),
            Err(AuthError::MfaRequired)
        ));
        assert!(chain.check(&user(false, true, AuthMethod::Totp)).is_ok());
    }

    #[test]
    fn mfa_method_constraint_is_enforced() {
        let chain = GateChain::new().require_mfa_method(AuthMethod::Webauthn);
        assert!(matches!(
            chain.check(&user(false, true, AuthMethod::Totp)),
            Err(AuthError::MfaRequired)
        ));
        assert!(chain.check(&user(false, true, AuthMethod::Webauthn)).is_ok());
    }

    #[test]
    fn chain_fails_closed_at_first_rejection() {
        // Scope check precedes the admin check; a machine principal with
        // the wrong scope reports the scope failure.
        let chain = GateChain::new()
            .require_scopes(Scopes::from_iter(["ingest_master"]))
            .require_admin();
        assert!(matches!(
            chain.check(&machine(&["ingest"])),
            Err(AuthError::InsufficientScope)
        ));
    }

    #[test]
    fn full_admin_chain() {
        let chain = GateChain::new().require_admin().require_mfa();
        assert!(chain.check(&user(true, true, AuthMethod::Totp)).is_ok());
        assert!(matches!(
            chain.check(&user(true, false, AuthMethod::Password)),
            Err(AuthError::MfaRequired)
        ));
    }

    #[test]
    fn empty_chain_admits_any_principal() {
        assert!(GateChain::new().check(&machine(&[])).is_ok());
    }
}
