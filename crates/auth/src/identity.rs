//! The authenticated subject and the result of authentication.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bastion_core::{DomainError, DomainResult, IdentityId};

use crate::Role;

/// A user record as read from the identity datastore.
///
/// The datastore owns these records; the security layer reads them, stages
/// modified copies with `IdentityStore::put`, and never caches them across
/// requests.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    /// Normalized (trimmed, lowercase) email address.
    pub email: String,
    pub password_hash: Option<String>,
    pub roles: HashSet<Role>,
    pub active: bool,
    /// Static bearer credential for API access. Compared by equality only.
    pub authentication_token: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// A fresh, active, unconfirmed identity with no roles and no password.
    pub fn new(id: IdentityId, email: &str) -> Self {
        Self {
            id,
            email: normalize_email(email),
            password_hash: None,
            roles: HashSet::new(),
            active: true,
            authentication_token: None,
            confirmed_at: None,
        }
    }

    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    pub fn with_roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_authentication_token(mut self, token: impl Into<String>) -> Self {
        self.authentication_token = Some(token.into());
        self
    }

    pub fn confirmed(mut self, at: DateTime<Utc>) -> Self {
        self.confirmed_at = Some(at);
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    /// Mark the email as confirmed.
    ///
    /// Fails when already confirmed so callers can tell a first confirmation
    /// from a replayed link.
    pub fn confirm(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.confirmed_at.is_some() {
            return Err(DomainError::invariant("identity already confirmed"));
        }
        self.confirmed_at = Some(at);
        Ok(())
    }

    /// Sorted role names (stable output for logs and JSON).
    pub fn role_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.roles.iter().map(Role::as_str).collect();
        names.sort_unstable();
        names
    }
}

// Hand-written so password hashes and bearer tokens never reach the logs.
impl core::fmt::Debug for Identity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("roles", &self.role_names())
            .field("active", &self.active)
            .field("confirmed_at", &self.confirmed_at)
            .finish_non_exhaustive()
    }
}

/// Outcome of an authentication strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Authenticated(Identity),
    Anonymous,
}

impl Principal {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Principal::Authenticated(identity) => Some(identity),
            Principal::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::Authenticated(_))
    }
}

impl From<Option<Identity>> for Principal {
    fn from(value: Option<Identity>) -> Self {
        match value {
            Some(identity) => Principal::Authenticated(identity),
            None => Principal::Anonymous,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic syntactic check used by registration.
///
/// Returns the normalized address.
pub fn validate_email(email: &str) -> DomainResult<String> {
    let email = normalize_email(email);
    let Some((local, domain)) = email.split_once('@') else {
        return Err(DomainError::validation("invalid email address"));
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') || email.contains(char::is_whitespace) {
        return Err(DomainError::validation("invalid email address"));
    }
    Ok(email)
}
