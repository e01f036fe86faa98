//! `bastion-auth`: authentication and authorization policy.
//!
//! Token issue/evaluation, role requirements and per-request guard decisions.
//! No HTTP and no storage: identities, sessions, password hashing and mail are
//! reached through the capability traits in [`store`], [`password`] and [`mail`].

pub mod codec;
pub mod config;
pub mod guard;
pub mod identity;
pub mod lifecycle;
pub mod mail;
pub mod password;
pub mod requirement;
pub mod roles;
pub mod store;

pub use codec::{DecodeError, EncodeError, SecurityToken, TokenClaims, TokenCodec, TokenPurpose, fingerprint};
pub use config::{ConfigError, SecretKey, SecurityConfig, parse_duration};
pub use guard::{
    AccessGuard, AuthStrategy, BasicCredentials, DENIED_NOTICE, GuardDecision, GuardPolicy, GuardRequest,
};
pub use identity::{Identity, Principal, normalize_email, validate_email};
pub use lifecycle::{TokenLifecycleManager, TokenStatus, TokenTtls};
pub use mail::{MailError, MailMessage, MailTemplate, Mailer};
pub use password::{PasswordError, PasswordHasher};
pub use requirement::{PermissionDenied, PermissionRequirement, evaluate, evaluate_all};
pub use roles::Role;
pub use store::{IdentityField, IdentityStore, SessionStore, StoreError};
