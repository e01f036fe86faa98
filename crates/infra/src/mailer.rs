use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use bastion_auth::{MailError, MailMessage, Mailer};

/// Keeps every sent message in memory (tests, dev inspection of links).
#[derive(Debug, Default)]
pub struct OutboxMailer {
    outbox: Mutex<Vec<MailMessage>>,
    failing: AtomicBool,
}

impl OutboxMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.outbox.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Remove and return everything sent so far.
    pub fn take(&self) -> Vec<MailMessage> {
        self.outbox.lock().map(|mut o| std::mem::take(&mut *o)).unwrap_or_default()
    }

    pub fn last_to(&self, recipient: &str) -> Option<MailMessage> {
        let outbox = self.outbox.lock().ok()?;
        outbox.iter().rev().find(|m| m.to == recipient).cloned()
    }
}

impl Mailer for OutboxMailer {
    fn send(&self, message: MailMessage) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Delivery("outbox rejected message".to_string()));
        }
        let mut outbox = self
            .outbox
            .lock()
            .map_err(|_| MailError::Delivery("outbox lock poisoned".to_string()))?;
        outbox.push(message);
        Ok(())
    }
}

/// Logs messages instead of delivering them. Links are never logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMailer;

impl Mailer for TracingMailer {
    fn send(&self, message: MailMessage) -> Result<(), MailError> {
        tracing::info!(
            to = %message.to,
            template = ?message.template,
            subject = %message.subject,
            "mail queued"
        );
        Ok(())
    }
}
