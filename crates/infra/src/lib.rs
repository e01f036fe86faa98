//! Infrastructure adapters: identity/session stores, password hashing, mail.
//!
//! Everything here implements a capability trait from `bastion-auth`. The
//! in-memory stores are the dev/test backends; a database-backed store plugs
//! in behind the same traits.

pub mod identity_store;
pub mod mailer;
pub mod password;
pub mod session_store;

pub use identity_store::InMemoryIdentityStore;
pub use mailer::{OutboxMailer, TracingMailer};
pub use password::Argon2PasswordHasher;
pub use session_store::InMemorySessionStore;
