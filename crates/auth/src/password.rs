//! Password hashing capability.

use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password must not be empty")]
    Empty,

    #[error("password hashing failed: {0}")]
    Hash(String),
}

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String, PasswordError>;

    /// `false` for a wrong password and for a hash that cannot be parsed.
    fn verify(&self, plaintext: &str, hash: &str) -> bool;
}

impl<H> PasswordHasher for Arc<H>
where
    H: PasswordHasher + ?Sized,
{
    fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        (**self).hash(plaintext)
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        (**self).verify(plaintext, hash)
    }
}
