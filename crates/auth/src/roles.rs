use std::borrow::{Borrow, Cow};

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// Roles are opaque, case-sensitive names. There is no hierarchy: holding
/// "admin" says nothing about "editor".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Role {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// Lets `HashSet<Role>` be queried with a plain `&str`.
impl Borrow<str> for Role {
    fn borrow(&self) -> &str {
        &self.0
    }
}
