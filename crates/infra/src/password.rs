use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};

use bastion_auth::{PasswordError, PasswordHasher};

/// Argon2id with the crate's default parameters, PHC string output.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2PasswordHasher;

impl Argon2PasswordHasher {
    pub fn new() -> Self {
        Self
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        if plaintext.is_empty() {
            return Err(PasswordError::Empty);
        }
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| PasswordError::Hash(e.to_string()))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            tracing::debug!("stored password hash is not a PHC string");
            return false;
        };
        Argon2::default().verify_password(plaintext.as_bytes(), &parsed).is_ok()
    }
}
