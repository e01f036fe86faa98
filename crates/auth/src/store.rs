//! Capability traits for the external identity and session stores.
//!
//! The security layer never owns persistence. It reads identities through
//! [`IdentityStore::find`], stages changes with [`IdentityStore::put`], and
//! the API layer ends every request's unit of work with exactly one
//! [`IdentityStore::commit`] or [`IdentityStore::rollback`].

use std::sync::Arc;

use thiserror::Error;

use bastion_core::{IdentityId, SessionId};

use crate::Identity;

/// Field used to look up an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField<'a> {
    Id(IdentityId),
    Email(&'a str),
    AuthenticationToken(&'a str),
}

impl IdentityField<'_> {
    /// Field name only. Lookup values (tokens in particular) stay out of logs.
    pub fn name(&self) -> &'static str {
        match self {
            IdentityField::Id(_) => "id",
            IdentityField::Email(_) => "email",
            IdentityField::AuthenticationToken(_) => "authentication_token",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

pub trait IdentityStore: Send + Sync {
    fn find(&self, field: IdentityField<'_>) -> Result<Identity, StoreError>;

    /// Stage an insert or update. Visible to `find` immediately, durable after `commit`.
    fn put(&self, identity: Identity) -> Result<(), StoreError>;

    fn remove(&self, id: IdentityId) -> Result<(), StoreError>;

    fn commit(&self) -> Result<(), StoreError>;

    /// Discard everything staged since the last commit.
    fn rollback(&self) -> Result<(), StoreError>;
}

impl<S> IdentityStore for Arc<S>
where
    S: IdentityStore + ?Sized,
{
    fn find(&self, field: IdentityField<'_>) -> Result<Identity, StoreError> {
        (**self).find(field)
    }

    fn put(&self, identity: Identity) -> Result<(), StoreError> {
        (**self).put(identity)
    }

    fn remove(&self, id: IdentityId) -> Result<(), StoreError> {
        (**self).remove(id)
    }

    fn commit(&self) -> Result<(), StoreError> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<(), StoreError> {
        (**self).rollback()
    }
}

/// Login session capability.
pub trait SessionStore: Send + Sync {
    fn current(&self, session: SessionId) -> Result<Option<IdentityId>, StoreError>;

    fn login(&self, identity: IdentityId) -> Result<SessionId, StoreError>;

    fn logout(&self, session: SessionId) -> Result<(), StoreError>;
}

impl<S> SessionStore for Arc<S>
where
    S: SessionStore + ?Sized,
{
    fn current(&self, session: SessionId) -> Result<Option<IdentityId>, StoreError> {
        (**self).current(session)
    }

    fn login(&self, identity: IdentityId) -> Result<SessionId, StoreError> {
        (**self).login(identity)
    }

    fn logout(&self, session: SessionId) -> Result<(), StoreError> {
        (**self).logout(session)
    }
}
