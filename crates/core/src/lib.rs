//! `bastion-core`: shared building blocks for the security layer.
//!
//! This crate contains **pure** primitives (no HTTP, no storage).

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{IdentityId, SessionId};
