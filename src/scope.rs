//! Scope set type and the pure authorization check.
//!
//! Scopes are opaque capability tags. Authorization is plain set
//! containment: case-sensitive, exact string match, no wildcard expansion.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::AuthError;
use crate::principal::Principal;

/// An ordered set of capability tags granted to a principal or required by
/// an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scopes(BTreeSet<String>);

impl Scopes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a scope set from string-like items.
    pub fn from_iter<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(items.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// `required ⊆ self`, the whole authorization rule.
    #[must_use]
    pub fn contains_all(&self, required: &Scopes) -> bool {
        self.0.is_superset(&required.0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// First scope in lexicographic order, used to derive the human-readable
    /// key id prefix.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.0.iter().next().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl From<Vec<String>> for Scopes {
    fn from(scopes: Vec<String>) -> Self {
        Self(scopes.into_iter().collect())
    }
}

impl fmt::Display for Scopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{scope}")?;
            first = false;
        }
        Ok(())
    }
}

/// Check that the principal's granted scopes satisfy the operation's
/// required scope set. Pure and stateless.
///
/// # Errors
/// Returns [`AuthError::InsufficientScope`] when any required scope is
/// missing.
pub fn authorize(principal: &Principal, required: &Scopes) -> Result<(), AuthError> {
    if principal.scopes.contains_all(required) {
        Ok(())
    } else {
        Err(AuthError::InsufficientScope)
    }
}
