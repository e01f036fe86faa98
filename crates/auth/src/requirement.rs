//! Role requirements and their evaluation.
//!
//! A route's policy is a list of [`PermissionRequirement`]s. The list is
//! conjunctive: every entry must hold. Each entry is either "all of these
//! roles" or "any of these roles".

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Role;

/// A single role requirement.
///
/// Callers always supply at least one role. Should an empty list slip through,
/// evaluation follows plain set semantics: an empty `AllOf` is satisfied by any
/// identity and an empty `AnyOf` by none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "roles", rename_all = "snake_case")]
pub enum PermissionRequirement {
    /// The identity must hold every listed role.
    AllOf(Vec<Role>),
    /// The identity must hold at least one listed role.
    AnyOf(Vec<Role>),
}

impl PermissionRequirement {
    pub fn all_of<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        Self::AllOf(roles.into_iter().map(Into::into).collect())
    }

    pub fn any_of<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        Self::AnyOf(roles.into_iter().map(Into::into).collect())
    }

    pub fn roles(&self) -> &[Role] {
        match self {
            Self::AllOf(roles) | Self::AnyOf(roles) => roles,
        }
    }

    /// Pure set check against the roles an identity holds.
    pub fn is_satisfied_by(&self, held: &HashSet<Role>) -> bool {
        match self {
            Self::AllOf(required) => required.iter().all(|r| held.contains(r)),
            Self::AnyOf(accepted) => accepted.iter().any(|r| held.contains(r)),
        }
    }
}

impl core::fmt::Display for PermissionRequirement {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (label, roles) = match self {
            Self::AllOf(roles) => ("all of", roles),
            Self::AnyOf(roles) => ("any of", roles),
        };
        let names: Vec<&str> = roles.iter().map(Role::as_str).collect();
        write!(f, "{label} [{}]", names.join(", "))
    }
}

/// The first requirement an identity failed, with what it actually holds.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("identity does not provide the required roles: {requirement}")]
pub struct PermissionDenied {
    pub requirement: PermissionRequirement,
    /// Held roles, sorted for stable diagnostics.
    pub held: Vec<Role>,
}

/// Evaluate a single requirement.
pub fn evaluate(requirement: &PermissionRequirement, held: &HashSet<Role>) -> bool {
    requirement.is_satisfied_by(held)
}

/// Evaluate a conjunctive list of requirements left to right.
///
/// Stops at the first unmet requirement. No side effects besides a `debug`
/// line naming the requested and held roles.
pub fn evaluate_all(
    requirements: &[PermissionRequirement],
    held: &HashSet<Role>,
) -> Result<(), PermissionDenied> {
    let Some(unmet) = requirements.iter().find(|req| !req.is_satisfied_by(held)) else {
        return Ok(());
    };

    let mut held_sorted: Vec<Role> = held.iter().cloned().collect();
    held_sorted.sort();

    tracing::debug!(
        requested = %unmet,
        provided = ?held_sorted.iter().map(Role::as_str).collect::<Vec<_>>(),
        "identity does not provide a required role"
    );

    Err(PermissionDenied {
        requirement: unmet.clone(),
        held: held_sorted,
    })
}
