//! Outbound mail capability.
//!
//! Rendering is out of scope: a message names its template and carries the
//! link the recipient must follow. Delivery backends live in `bastion-infra`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailTemplate {
    Welcome,
    ConfirmationInstructions,
    LoginInstructions,
    ResetInstructions,
    ResetNotice,
    ChangeNotice,
}

impl MailTemplate {
    pub fn subject(self) -> &'static str {
        match self {
            MailTemplate::Welcome => "Welcome",
            MailTemplate::ConfirmationInstructions => "Please confirm your email",
            MailTemplate::LoginInstructions => "Login instructions",
            MailTemplate::ResetInstructions => "Password reset instructions",
            MailTemplate::ResetNotice => "Your password has been reset",
            MailTemplate::ChangeNotice => "Your password has been changed",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub template: MailTemplate,
    /// Action link (confirmation, login or reset). Contains a live token.
    pub link: Option<String>,
}

impl MailMessage {
    pub fn new(to: impl Into<String>, template: MailTemplate) -> Self {
        Self {
            to: to.into(),
            subject: template.subject().to_string(),
            template,
            link: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

impl core::fmt::Debug for MailMessage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MailMessage")
            .field("to", &self.to)
            .field("template", &self.template)
            .field("has_link", &self.link.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

pub trait Mailer: Send + Sync {
    fn send(&self, message: MailMessage) -> Result<(), MailError>;
}

impl<M> Mailer for Arc<M>
where
    M: Mailer + ?Sized,
{
    fn send(&self, message: MailMessage) -> Result<(), MailError> {
        (**self).send(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_the_action_link() {
        let message = MailMessage::new("matt@lp.com", MailTemplate::ResetInstructions)
            .with_link("http://localhost/reset/eyJ.secret.token");
        let rendered = format!("{message:?}");
        assert!(!rendered.contains("eyJ"));
        assert!(rendered.contains("has_link: true"));
        assert_eq!(message.subject, "Password reset instructions");
    }
}
