//! Issuing and evaluating purpose-scoped tokens.

use std::sync::Arc;

use chrono::Duration;

use bastion_core::Clock;

use crate::{
    Identity, IdentityField, IdentityStore, StoreError,
    codec::{EncodeError, SecurityToken, TokenClaims, TokenCodec, TokenPurpose},
};

/// Maximum token age per purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtls {
    pub login: Duration,
    pub confirm: Duration,
    pub reset: Duration,
}

impl TokenTtls {
    pub fn for_purpose(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::Login => self.login,
            TokenPurpose::Confirm => self.confirm,
            TokenPurpose::Reset => self.reset,
        }
    }
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self {
            login: Duration::days(1),
            confirm: Duration::days(5),
            reset: Duration::days(5),
        }
    }
}

/// Result of evaluating a token. Exactly one variant holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Valid(Identity),
    /// Authentic but older than the purpose TTL.
    Expired(Identity),
    /// Confirmation token for an identity that is already confirmed.
    AlreadyConsumed(Identity),
    /// Undecodable, forged, bound to stale identity state, or the identity is gone.
    Invalid,
}

impl TokenStatus {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            TokenStatus::Valid(i) | TokenStatus::Expired(i) | TokenStatus::AlreadyConsumed(i) => Some(i),
            TokenStatus::Invalid => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, TokenStatus::Valid(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            TokenStatus::Valid(_) => "valid",
            TokenStatus::Expired(_) => "expired",
            TokenStatus::AlreadyConsumed(_) => "already_consumed",
            TokenStatus::Invalid => "invalid",
        }
    }
}

/// Issues tokens and reports their status.
///
/// Evaluation is read-only: it never re-issues, never writes, and returns the
/// same status for the same inputs (store state + clock). Re-sending an
/// expired link is the calling flow's decision.
pub struct TokenLifecycleManager {
    codec: TokenCodec,
    ttls: TokenTtls,
    store: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
}

impl TokenLifecycleManager {
    pub fn new(codec: TokenCodec, ttls: TokenTtls, store: Arc<dyn IdentityStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            codec,
            ttls,
            store,
            clock,
        }
    }

    pub fn ttls(&self) -> &TokenTtls {
        &self.ttls
    }

    pub fn issue(&self, identity: &Identity, purpose: TokenPurpose) -> Result<SecurityToken, EncodeError> {
        let claims = TokenClaims::for_identity(identity, purpose, self.clock.now());
        self.codec.encode(&claims)
    }

    pub fn evaluate(&self, token: &str, purpose: TokenPurpose) -> TokenStatus {
        let claims = match self.codec.decode(token, purpose) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(%purpose, error = %e, "token rejected");
                return TokenStatus::Invalid;
            }
        };

        let identity = match self.store.find(IdentityField::Id(claims.sub)) {
            Ok(identity) => identity,
            Err(StoreError::NotFound) => {
                tracing::debug!(%purpose, identity_id = %claims.sub, "token references a missing identity");
                return TokenStatus::Invalid;
            }
            Err(e) => {
                tracing::warn!(%purpose, error = %e, "identity lookup failed during token evaluation");
                return TokenStatus::Invalid;
            }
        };

        if purpose.fingerprint_of(&identity) != claims.fp {
            tracing::debug!(%purpose, identity_id = %identity.id, "token bound to stale identity state");
            return TokenStatus::Invalid;
        }

        let age = self.clock.now() - claims.iat;
        if age > self.ttls.for_purpose(purpose) {
            return TokenStatus::Expired(identity);
        }

        if purpose == TokenPurpose::Confirm && identity.is_confirmed() {
            return TokenStatus::AlreadyConsumed(identity);
        }

        TokenStatus::Valid(identity)
    }
}

impl core::fmt::Debug for TokenLifecycleManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("ttls", &self.ttls)
            .finish_non_exhaustive()
    }
}
