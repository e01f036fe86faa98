//! Security signals emitted by the account flows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bastion_core::IdentityId;

use crate::Event;

/// Every signal the security layer emits.
///
/// Instruction signals carry the issued token so listeners (and tests) can
/// follow the link without reading mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEvent {
    UserRegistered {
        identity_id: IdentityId,
        /// Confirmation token, present when confirmation is enabled.
        confirm_token: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    ConfirmInstructionsSent {
        identity_id: IdentityId,
        token: String,
        occurred_at: DateTime<Utc>,
    },
    UserConfirmed {
        identity_id: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    LoginInstructionsSent {
        identity_id: IdentityId,
        token: String,
        occurred_at: DateTime<Utc>,
    },
    ResetPasswordInstructionsSent {
        identity_id: IdentityId,
        token: String,
        occurred_at: DateTime<Utc>,
    },
    PasswordReset {
        identity_id: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    PasswordChanged {
        identity_id: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    UserLoggedIn {
        identity_id: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    UserLoggedOut {
        identity_id: IdentityId,
        occurred_at: DateTime<Utc>,
    },
}

impl SecurityEvent {
    pub fn identity_id(&self) -> IdentityId {
        match self {
            SecurityEvent::UserRegistered { identity_id, .. }
            | SecurityEvent::ConfirmInstructionsSent { identity_id, .. }
            | SecurityEvent::UserConfirmed { identity_id, .. }
            | SecurityEvent::LoginInstructionsSent { identity_id, .. }
            | SecurityEvent::ResetPasswordInstructionsSent { identity_id, .. }
            | SecurityEvent::PasswordReset { identity_id, .. }
            | SecurityEvent::PasswordChanged { identity_id, .. }
            | SecurityEvent::UserLoggedIn { identity_id, .. }
            | SecurityEvent::UserLoggedOut { identity_id, .. } => *identity_id,
        }
    }

    /// The token carried by instruction signals, if any.
    pub fn token(&self) -> Option<&str> {
        match self {
            SecurityEvent::UserRegistered { confirm_token, .. } => confirm_token.as_deref(),
            SecurityEvent::ConfirmInstructionsSent { token, .. }
            | SecurityEvent::LoginInstructionsSent { token, .. }
            | SecurityEvent::ResetPasswordInstructionsSent { token, .. } => Some(token),
            _ => None,
        }
    }
}

impl Event for SecurityEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SecurityEvent::UserRegistered { .. } => "security.user.registered",
            SecurityEvent::ConfirmInstructionsSent { .. } => "security.confirm.instructions_sent",
            SecurityEvent::UserConfirmed { .. } => "security.user.confirmed",
            SecurityEvent::LoginInstructionsSent { .. } => "security.login.instructions_sent",
            SecurityEvent::ResetPasswordInstructionsSent { .. } => "security.reset.instructions_sent",
            SecurityEvent::PasswordReset { .. } => "security.password.reset",
            SecurityEvent::PasswordChanged { .. } => "security.password.changed",
            SecurityEvent::UserLoggedIn { .. } => "security.user.logged_in",
            SecurityEvent::UserLoggedOut { .. } => "security.user.logged_out",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SecurityEvent::UserRegistered { occurred_at, .. }
            | SecurityEvent::ConfirmInstructionsSent { occurred_at, .. }
            | SecurityEvent::UserConfirmed { occurred_at, .. }
            | SecurityEvent::LoginInstructionsSent { occurred_at, .. }
            | SecurityEvent::ResetPasswordInstructionsSent { occurred_at, .. }
            | SecurityEvent::PasswordReset { occurred_at, .. }
            | SecurityEvent::PasswordChanged { occurred_at, .. }
            | SecurityEvent::UserLoggedIn { occurred_at, .. }
            | SecurityEvent::UserLoggedOut { occurred_at, .. } => *occurred_at,
        }
    }
}
