//! Purpose-scoped token encoding.
//!
//! Tokens are compact HS256 JWTs. The HMAC key is the application secret
//! joined with a per-purpose salt, so a login link can never be replayed as a
//! reset link even before the `purpose` claim is compared.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use bastion_core::IdentityId;

use crate::Identity;

/// The flow a token was minted for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Login,
    Confirm,
    Reset,
}

impl TokenPurpose {
    pub const ALL: [TokenPurpose; 3] = [TokenPurpose::Login, TokenPurpose::Confirm, TokenPurpose::Reset];

    pub fn as_str(self) -> &'static str {
        match self {
            TokenPurpose::Login => "login",
            TokenPurpose::Confirm => "confirm",
            TokenPurpose::Reset => "reset",
        }
    }

    fn salt(self) -> &'static [u8] {
        match self {
            TokenPurpose::Login => b"login-salt",
            TokenPurpose::Confirm => b"confirm-salt",
            TokenPurpose::Reset => b"reset-salt",
        }
    }

    /// Identity state a token of this purpose is bound to.
    ///
    /// Reset tokens die when the password hash changes; confirmation tokens
    /// die when the email changes. Login tokens are bound to nothing.
    pub fn fingerprint_of(self, identity: &Identity) -> Option<String> {
        match self {
            TokenPurpose::Login => None,
            TokenPurpose::Confirm => Some(fingerprint(&identity.email)),
            TokenPurpose::Reset => identity.password_hash.as_deref().map(fingerprint),
        }
    }
}

impl core::fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hex SHA-256 of a value, used to bind tokens to identity state without
/// putting that state in the (readable) token body.
pub fn fingerprint(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Payload carried inside every security token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: IdentityId,
    pub purpose: TokenPurpose,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub iat: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fp: Option<String>,
}

impl TokenClaims {
    pub fn for_identity(identity: &Identity, purpose: TokenPurpose, issued_at: DateTime<Utc>) -> Self {
        Self {
            sub: identity.id,
            purpose,
            iat: issued_at,
            fp: purpose.fingerprint_of(identity),
        }
    }
}

/// An encoded token. Opaque to everyone but the codec.
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityToken(String);

impl SecurityToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl core::fmt::Debug for SecurityToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SecurityToken(..)")
    }
}

impl core::fmt::Display for SecurityToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
#[error("token encoding failed: {0}")]
pub struct EncodeError(#[from] jsonwebtoken::errors::Error);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed token")]
    Malformed,

    #[error("token signature does not verify")]
    BadSignature,

    #[error("token purpose mismatch (expected {expected}, found {found})")]
    PurposeMismatch {
        expected: TokenPurpose,
        found: TokenPurpose,
    },
}

/// Signs and verifies purpose-scoped tokens.
///
/// No IO. Same secret + same claims always yields the same token.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl TokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn key_material(&self, purpose: TokenPurpose) -> Vec<u8> {
        let salt = purpose.salt();
        let mut key = Vec::with_capacity(self.secret.len() + 1 + salt.len());
        key.extend_from_slice(&self.secret);
        key.push(b'.');
        key.extend_from_slice(salt);
        key
    }

    fn validation() -> Validation {
        // Expiry is a lifecycle decision (per-purpose TTL + injected clock),
        // so the JWT layer checks the signature and structure only.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();
        validation
    }

    pub fn encode(&self, claims: &TokenClaims) -> Result<SecurityToken, EncodeError> {
        let key = EncodingKey::from_secret(&self.key_material(claims.purpose));
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &key)?;
        Ok(SecurityToken(token))
    }

    /// Verify and decode a token minted for `expected`.
    pub fn decode(&self, token: &str, expected: TokenPurpose) -> Result<TokenClaims, DecodeError> {
        let key = DecodingKey::from_secret(&self.key_material(expected));
        let data = jsonwebtoken::decode::<TokenClaims>(token, &key, &Self::validation()).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => DecodeError::BadSignature,
                _ => DecodeError::Malformed,
            }
        })?;

        if data.claims.purpose != expected {
            return Err(DecodeError::PurposeMismatch {
                expected,
                found: data.claims.purpose,
            });
        }

        Ok(data.claims)
    }
}

impl core::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn codec() -> TokenCodec {
        TokenCodec::new("test-secret")
    }

    fn claims(purpose: TokenPurpose) -> TokenClaims {
        TokenClaims {
            sub: IdentityId::new(),
            purpose,
            iat: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
            fp: None,
        }
    }

    #[test]
    fn round_trip_preserves_claims() {
        for purpose in TokenPurpose::ALL {
            let original = claims(purpose);
            let token = codec().encode(&original).unwrap();
            let decoded = codec().decode(token.as_str(), purpose).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn other_secret_fails_signature() {
        let token = codec().encode(&claims(TokenPurpose::Login)).unwrap();
        let err = TokenCodec::new("another-secret")
            .decode(token.as_str(), TokenPurpose::Login)
            .unwrap_err();
        assert_eq!(err, DecodeError::BadSignature);
    }

    #[test]
    fn token_for_one_purpose_does_not_verify_for_another() {
        let token = codec().encode(&claims(TokenPurpose::Login)).unwrap();
        assert!(codec().decode(token.as_str(), TokenPurpose::Reset).is_err());
        assert!(codec().decode(token.as_str(), TokenPurpose::Confirm).is_err());
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(codec().decode("bogus", TokenPurpose::Confirm).unwrap_err(), DecodeError::Malformed);
        assert_eq!(codec().decode("", TokenPurpose::Confirm).unwrap_err(), DecodeError::Malformed);
    }

    #[test]
    fn fingerprints_follow_purpose() {
        let identity = Identity::new(IdentityId::new(), "matt@lp.com").with_password_hash("hash-1");
        assert_eq!(TokenPurpose::Login.fingerprint_of(&identity), None);
        assert_eq!(TokenPurpose::Confirm.fingerprint_of(&identity), Some(fingerprint("matt@lp.com")));
        assert_eq!(TokenPurpose::Reset.fingerprint_of(&identity), Some(fingerprint("hash-1")));
        assert_ne!(fingerprint("hash-1"), fingerprint("hash-2"));
    }

    #[test]
    fn debug_does_not_leak_token_or_secret() {
        let token = codec().encode(&claims(TokenPurpose::Reset)).unwrap();
        assert_eq!(format!("{token:?}"), "SecurityToken(..)");
        assert!(!format!("{:?}", codec()).contains("test-secret"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: flipping any single byte of a token makes decode fail.
        #[test]
        fn single_byte_tampering_is_detected(
            index in any::<prop::sample::Index>(),
            mask in 1u8..0x80,
            purpose in prop::sample::select(TokenPurpose::ALL.to_vec()),
        ) {
            let token = codec().encode(&claims(purpose)).unwrap().into_string();
            let mut bytes = token.into_bytes();
            let i = index.index(bytes.len());
            bytes[i] ^= mask;
            let tampered = String::from_utf8(bytes).unwrap();

            prop_assert!(codec().decode(&tampered, purpose).is_err());
        }

        /// Property: any issue time within chrono's range survives a round trip.
        #[test]
        fn issued_at_round_trips_at_millisecond_resolution(millis in 0i64..4_102_444_800_000) {
            let mut original = claims(TokenPurpose::Confirm);
            original.iat = Utc.timestamp_millis_opt(millis).unwrap();
            let token = codec().encode(&original).unwrap();
            let decoded = codec().decode(token.as_str(), TokenPurpose::Confirm).unwrap();
            prop_assert_eq!(decoded.iat, original.iat);
        }
    }
}
