//! Service wiring and the account flows.
//!
//! Flows stage identity changes with `IdentityStore::put` and report whether a
//! commit is due; the commit itself happens in the commit middleware once the
//! response is known to be successful.

use std::sync::Arc;

use bastion_auth::{
    AccessGuard, ConfigError, Identity, IdentityField, IdentityStore, MailMessage, MailTemplate, Mailer,
    PasswordHasher, SecurityConfig, SecurityToken, SessionStore, StoreError, TokenCodec, TokenLifecycleManager,
    TokenPurpose, TokenStatus, validate_email,
};
use bastion_core::{Clock, IdentityId, SessionId, SystemClock};
use bastion_events::{InMemoryEventBus, SecurityEvent, publish_best_effort};
use bastion_infra::{Argon2PasswordHasher, InMemoryIdentityStore, InMemorySessionStore, TracingMailer};

use crate::app::errors::{FieldErrors, FlowError};
use crate::app::messages::{self, Notice};
use crate::context::SessionContext;

/// Pluggable backends behind the capability traits.
pub struct Backends {
    pub identities: Arc<dyn IdentityStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub mailer: Arc<dyn Mailer>,
    pub events: Arc<InMemoryEventBus<SecurityEvent>>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// In-memory stores, argon2 hashing and a logging mailer.
    pub fn in_memory() -> Self {
        Self {
            identities: Arc::new(InMemoryIdentityStore::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
            hasher: Arc::new(Argon2PasswordHasher::new()),
            mailer: Arc::new(TracingMailer),
            events: Arc::new(InMemoryEventBus::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Shared application services.
pub struct AppServices {
    pub config: Arc<SecurityConfig>,
    pub identities: Arc<dyn IdentityStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub mailer: Arc<dyn Mailer>,
    pub events: Arc<InMemoryEventBus<SecurityEvent>>,
    pub clock: Arc<dyn Clock>,
    pub tokens: TokenLifecycleManager,
    pub guard: AccessGuard,
    /// Held by the unit-of-work middleware for the whole of an account request,
    /// so staged identity writes never interleave.
    pub unit_of_work: tokio::sync::Mutex<()>,
}

pub fn build_services(config: SecurityConfig) -> Result<AppServices, ConfigError> {
    AppServices::new(config, Backends::in_memory())
}

/// Session effect of a flow, applied to the response cookie.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Keep,
    Start(SessionId),
    End,
}

/// Successful flow result: where to send the user and what changed.
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub location: String,
    pub notice: Option<Notice>,
    pub session: SessionChange,
    /// Staged identity changes must be committed with the response.
    pub commit: bool,
    /// Identity the flow acted on, reported in JSON responses.
    pub identity: Option<Identity>,
}

impl FlowOutcome {
    fn redirect(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            notice: None,
            session: SessionChange::Keep,
            commit: false,
            identity: None,
        }
    }

    fn notice(mut self, notice: Notice) -> Self {
        self.notice = Some(notice);
        self
    }

    fn session(mut self, session: SessionChange) -> Self {
        self.session = session;
        self
    }

    fn committing(mut self) -> Self {
        self.commit = true;
        self
    }

    fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }
}

/// Result of checking a reset link before showing or accepting the form.
#[derive(Debug, Clone)]
pub enum ResetCheck {
    Ready(Identity),
    Rejected(FlowOutcome),
}

#[derive(Debug, Clone, Default)]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    pub password_confirm: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChangePasswordForm {
    pub password: String,
    pub new_password: String,
    pub new_password_confirm: String,
}

impl AppServices {
    pub fn new(config: SecurityConfig, backends: Backends) -> Result<Self, ConfigError> {
        let ttls = config.ttls()?;
        let codec = TokenCodec::new(config.secret_key.expose());
        let tokens = TokenLifecycleManager::new(codec, ttls, backends.identities.clone(), backends.clock.clone());
        let guard = AccessGuard::new(backends.identities.clone(), backends.hasher.clone(), &config);

        Ok(Self {
            config: Arc::new(config),
            identities: backends.identities,
            sessions: backends.sessions,
            hasher: backends.hasher,
            mailer: backends.mailer,
            events: backends.events,
            clock: backends.clock,
            tokens,
            guard,
            unit_of_work: tokio::sync::Mutex::new(()),
        })
    }

    /// Identity behind a session cookie, if the session and identity still exist.
    pub fn resolve_session(&self, session: SessionId) -> Option<Identity> {
        let identity_id = match self.sessions.current(session) {
            Ok(Some(id)) => id,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "session lookup failed");
                return None;
            }
        };

        match self.identities.find(IdentityField::Id(identity_id)) {
            Ok(identity) => Some(identity),
            Err(StoreError::NotFound) => None,
            Err(e) => {
                tracing::warn!(error = %e, "identity lookup for session failed");
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Login / logout / registration
    // ─────────────────────────────────────────────────────────────────────

    pub fn login(
        &self,
        email: &str,
        password: &str,
        next: Option<&str>,
        session: &SessionContext,
    ) -> Result<FlowOutcome, FlowError> {
        let mut errors = FieldErrors::new();
        if email.trim().is_empty() {
            errors.push("email", messages::EMAIL_NOT_PROVIDED);
        }
        if password.is_empty() {
            errors.push("password", messages::PASSWORD_NOT_PROVIDED);
        }
        errors.into_result()?;

        let identity = self
            .find_by_email(email)?
            .ok_or_else(|| FlowError::invalid("email", messages::USER_DOES_NOT_EXIST))?;

        let Some(hash) = identity.password_hash.as_deref() else {
            return Err(FlowError::invalid("password", messages::PASSWORD_NOT_SET));
        };
        if !self.hasher.verify(password, hash) {
            return Err(FlowError::invalid("password", messages::INVALID_PASSWORD));
        }
        if self.config.requires_confirmation() && !identity.is_confirmed() {
            return Err(FlowError::invalid("email", messages::CONFIRMATION_REQUIRED));
        }
        if !identity.active {
            return Err(FlowError::invalid("email", messages::DISABLED_ACCOUNT));
        }

        let location = self.post_login_location(next)?;
        let change = self.login_identity(&identity, session)?;
        Ok(FlowOutcome::redirect(location)
            .session(change)
            .identity(identity)
            .committing())
    }

    pub fn logout(&self, session: &SessionContext, next: Option<&str>) -> Result<FlowOutcome, FlowError> {
        if let Some(session_id) = session.session_id() {
            self.sessions.logout(session_id)?;
        }
        if let Some(identity) = session.identity() {
            self.publish(SecurityEvent::UserLoggedOut {
                identity_id: identity.id,
                occurred_at: self.clock.now(),
            });
        }

        let location = safe_next(next).unwrap_or_else(|| self.config.post_logout_view.clone());
        Ok(FlowOutcome::redirect(location).session(SessionChange::End))
    }

    pub fn register(&self, form: &RegisterForm, session: &SessionContext) -> Result<FlowOutcome, FlowError> {
        let mut errors = FieldErrors::new();
        let email = if form.email.trim().is_empty() {
            errors.push("email", messages::EMAIL_NOT_PROVIDED);
            None
        } else {
            match validate_email(&form.email) {
                Ok(email) => Some(email),
                Err(_) => {
                    errors.push("email", messages::INVALID_EMAIL_ADDRESS);
                    None
                }
            }
        };
        if let Some(email) = &email {
            if self.find_by_email(email)?.is_some() {
                errors.push("email", messages::EMAIL_ALREADY_ASSOCIATED);
            }
        }
        if form.password.is_empty() {
            errors.push("password", messages::PASSWORD_NOT_PROVIDED);
        }
        if let Some(confirm) = &form.password_confirm {
            if confirm != &form.password {
                errors.push("password_confirm", messages::RETYPE_PASSWORD_MISMATCH);
            }
        }
        errors.into_result()?;
        let Some(email) = email else {
            return Err(FlowError::invalid("email", messages::EMAIL_NOT_PROVIDED));
        };

        let identity = Identity::new(IdentityId::new(), &email)
            .with_password_hash(self.hasher.hash(&form.password)?)
            .with_roles(self.config.default_roles.iter().cloned());
        match self.identities.put(identity.clone()) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(FlowError::invalid("email", messages::EMAIL_ALREADY_ASSOCIATED)),
            Err(e) => return Err(e.into()),
        }

        let confirm_token = if self.config.confirmable {
            Some(self.tokens.issue(&identity, TokenPurpose::Confirm)?)
        } else {
            None
        };

        if self.config.send_register_email {
            let mut message = MailMessage::new(&identity.email, MailTemplate::Welcome);
            if let Some(token) = &confirm_token {
                message = message.with_link(self.token_link(&self.config.confirm_url, token));
            }
            self.deliver(message);
        }

        self.publish(SecurityEvent::UserRegistered {
            identity_id: identity.id,
            confirm_token: confirm_token.map(SecurityToken::into_string),
            occurred_at: self.clock.now(),
        });
        tracing::info!(identity_id = %identity.id, "identity registered");

        let mut outcome = FlowOutcome::redirect(self.config.post_register_location())
            .identity(identity.clone())
            .committing();
        if self.config.confirmable {
            outcome = outcome.notice(messages::CONFIRM_REGISTRATION);
        }
        if !self.config.confirmable || self.config.login_without_confirmation {
            outcome = outcome.session(self.login_identity(&identity, session)?);
        }
        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Confirmation
    // ─────────────────────────────────────────────────────────────────────

    pub fn send_confirmation(&self, email: &str) -> Result<FlowOutcome, FlowError> {
        let identity = self.require_identity(email)?;
        if identity.is_confirmed() {
            return Err(FlowError::invalid("email", messages::ALREADY_CONFIRMED));
        }

        self.send_confirmation_instructions(&identity)?;
        Ok(FlowOutcome::redirect(self.config.confirm_url.clone())
            .notice(messages::CONFIRMATION_REQUEST)
            .identity(identity))
    }

    pub fn confirm_email(&self, token: &str, session: &SessionContext) -> Result<FlowOutcome, FlowError> {
        match self.tokens.evaluate(token, TokenPurpose::Confirm) {
            TokenStatus::Invalid => Ok(FlowOutcome::redirect(self.config.confirm_error_location())
                .notice(messages::INVALID_CONFIRMATION_TOKEN)),
            TokenStatus::Expired(identity) => {
                tracing::info!(identity_id = %identity.id, "confirmation link expired; re-sending");
                self.send_confirmation_instructions(&identity)?;
                Ok(FlowOutcome::redirect(self.config.confirm_error_location())
                    .notice(messages::CONFIRMATION_EXPIRED)
                    .identity(identity))
            }
            TokenStatus::AlreadyConsumed(identity) => {
                let change = self.login_identity(&identity, session)?;
                Ok(FlowOutcome::redirect(self.config.post_confirm_location())
                    .notice(messages::ALREADY_CONFIRMED)
                    .session(change)
                    .identity(identity))
            }
            TokenStatus::Valid(mut identity) => {
                let now = self.clock.now();
                if identity.confirm(now).is_err() {
                    return Ok(FlowOutcome::redirect(self.config.post_confirm_location())
                        .notice(messages::ALREADY_CONFIRMED));
                }
                self.identities.put(identity.clone())?;
                let change = self.login_identity(&identity, session)?;

                self.publish(SecurityEvent::UserConfirmed {
                    identity_id: identity.id,
                    occurred_at: now,
                });
                tracing::info!(identity_id = %identity.id, "email confirmed");

                Ok(FlowOutcome::redirect(self.config.post_confirm_location())
                    .notice(messages::EMAIL_CONFIRMED)
                    .session(change)
                    .identity(identity)
                    .committing())
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Recovery
    // ─────────────────────────────────────────────────────────────────────

    pub fn forgot_password(&self, email: &str) -> Result<FlowOutcome, FlowError> {
        let identity = self.require_identity(email)?;
        self.send_reset_instructions(&identity)?;
        Ok(FlowOutcome::redirect(self.config.reset_url.clone())
            .notice(messages::PASSWORD_RESET_REQUEST)
            .identity(identity))
    }

    pub fn check_reset_token(&self, token: &str) -> Result<ResetCheck, FlowError> {
        let rejected = |notice| ResetCheck::Rejected(FlowOutcome::redirect(self.config.reset_url.clone()).notice(notice));

        match self.tokens.evaluate(token, TokenPurpose::Reset) {
            TokenStatus::Valid(identity) => Ok(ResetCheck::Ready(identity)),
            TokenStatus::Expired(identity) => {
                tracing::info!(identity_id = %identity.id, "reset link expired; re-sending");
                self.send_reset_instructions(&identity)?;
                Ok(rejected(messages::PASSWORD_RESET_EXPIRED))
            }
            TokenStatus::Invalid | TokenStatus::AlreadyConsumed(_) => Ok(rejected(messages::INVALID_RESET_PASSWORD_TOKEN)),
        }
    }

    pub fn reset_password(
        &self,
        token: &str,
        password: &str,
        password_confirm: &str,
        session: &SessionContext,
    ) -> Result<FlowOutcome, FlowError> {
        let mut identity = match self.check_reset_token(token)? {
            ResetCheck::Ready(identity) => identity,
            ResetCheck::Rejected(outcome) => return Ok(outcome),
        };

        let mut errors = FieldErrors::new();
        if password.is_empty() {
            errors.push("password", messages::PASSWORD_NOT_PROVIDED);
        }
        if password != password_confirm {
            errors.push("password_confirm", messages::RETYPE_PASSWORD_MISMATCH);
        }
        errors.into_result()?;

        identity.password_hash = Some(self.hasher.hash(password)?);
        self.identities.put(identity.clone())?;

        if self.config.send_password_reset_notice {
            self.deliver(MailMessage::new(&identity.email, MailTemplate::ResetNotice));
        }
        self.publish(SecurityEvent::PasswordReset {
            identity_id: identity.id,
            occurred_at: self.clock.now(),
        });
        tracing::info!(identity_id = %identity.id, "password reset");

        let change = self.login_identity(&identity, session)?;
        Ok(FlowOutcome::redirect(self.config.post_reset_location())
            .notice(messages::PASSWORD_RESET)
            .session(change)
            .identity(identity)
            .committing())
    }

    pub fn change_password(&self, identity: &Identity, form: &ChangePasswordForm) -> Result<FlowOutcome, FlowError> {
        let current_ok = identity
            .password_hash
            .as_deref()
            .is_some_and(|hash| self.hasher.verify(&form.password, hash));

        let mut errors = FieldErrors::new();
        if !current_ok {
            errors.push("password", messages::INVALID_PASSWORD);
        }
        if form.new_password.is_empty() {
            errors.push("new_password", messages::PASSWORD_NOT_PROVIDED);
        } else if current_ok && form.new_password == form.password {
            errors.push("new_password", messages::PASSWORD_IS_THE_SAME);
        }
        if form.new_password != form.new_password_confirm {
            errors.push("new_password_confirm", messages::RETYPE_PASSWORD_MISMATCH);
        }
        errors.into_result()?;

        let mut updated = identity.clone();
        updated.password_hash = Some(self.hasher.hash(&form.new_password)?);
        self.identities.put(updated.clone())?;

        if self.config.send_password_change_notice {
            self.deliver(MailMessage::new(&updated.email, MailTemplate::ChangeNotice));
        }
        self.publish(SecurityEvent::PasswordChanged {
            identity_id: updated.id,
            occurred_at: self.clock.now(),
        });
        tracing::info!(identity_id = %updated.id, "password changed");

        Ok(FlowOutcome::redirect(self.config.post_change_location())
            .notice(messages::PASSWORD_CHANGE)
            .identity(updated)
            .committing())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Passwordless
    // ─────────────────────────────────────────────────────────────────────

    pub fn send_login_instructions(&self, email: &str) -> Result<FlowOutcome, FlowError> {
        let identity = self.require_identity(email)?;
        if !identity.active {
            return Err(FlowError::invalid("email", messages::DISABLED_ACCOUNT));
        }

        self.mail_login_link(&identity)?;
        Ok(FlowOutcome::redirect(self.config.login_url.clone())
            .notice(messages::LOGIN_EMAIL_SENT)
            .identity(identity))
    }

    pub fn token_login(&self, token: &str, session: &SessionContext) -> Result<FlowOutcome, FlowError> {
        match self.tokens.evaluate(token, TokenPurpose::Login) {
            TokenStatus::Valid(identity) => {
                let change = self.login_identity(&identity, session)?;
                Ok(FlowOutcome::redirect(self.config.post_login_view.clone())
                    .notice(messages::PASSWORDLESS_LOGIN_SUCCESSFUL)
                    .session(change)
                    .identity(identity)
                    .committing())
            }
            TokenStatus::Expired(identity) => {
                tracing::info!(identity_id = %identity.id, "login link expired; re-sending");
                self.mail_login_link(&identity)?;
                Ok(FlowOutcome::redirect(self.config.login_url.clone()).notice(messages::LOGIN_EXPIRED))
            }
            TokenStatus::Invalid | TokenStatus::AlreadyConsumed(_) => {
                Ok(FlowOutcome::redirect(self.config.login_url.clone()).notice(messages::INVALID_LOGIN_TOKEN))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    fn find_by_email(&self, email: &str) -> Result<Option<Identity>, FlowError> {
        match self.identities.find(IdentityField::Email(email.trim())) {
            Ok(identity) => Ok(Some(identity)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn require_identity(&self, email: &str) -> Result<Identity, FlowError> {
        if email.trim().is_empty() {
            return Err(FlowError::invalid("email", messages::EMAIL_NOT_PROVIDED));
        }
        self.find_by_email(email)?
            .ok_or_else(|| FlowError::invalid("email", messages::USER_DOES_NOT_EXIST))
    }

    /// Start a session for `identity` unless the request already has one for it.
    /// Inactive identities never get a session.
    fn login_identity(&self, identity: &Identity, session: &SessionContext) -> Result<SessionChange, FlowError> {
        if !identity.active {
            return Ok(SessionChange::Keep);
        }
        if session.identity().is_some_and(|current| current.id == identity.id) {
            return Ok(SessionChange::Keep);
        }
        if let Some(previous) = session.session_id() {
            self.sessions.logout(previous)?;
        }

        let session_id = self.sessions.login(identity.id)?;
        self.publish(SecurityEvent::UserLoggedIn {
            identity_id: identity.id,
            occurred_at: self.clock.now(),
        });
        Ok(SessionChange::Start(session_id))
    }

    fn post_login_location(&self, next: Option<&str>) -> Result<String, FlowError> {
        match next.filter(|n| !n.is_empty()) {
            None => Ok(self.config.post_login_view.clone()),
            Some(candidate) => safe_next(Some(candidate)).ok_or_else(|| FlowError::invalid("next", messages::INVALID_REDIRECT)),
        }
    }

    fn token_link(&self, base: &str, token: &SecurityToken) -> String {
        self.config.external_link(&format!("{}/{}", base.trim_end_matches('/'), token.as_str()))
    }

    fn send_confirmation_instructions(&self, identity: &Identity) -> Result<(), FlowError> {
        let token = self.tokens.issue(identity, TokenPurpose::Confirm)?;
        let link = self.token_link(&self.config.confirm_url, &token);
        self.deliver(MailMessage::new(&identity.email, MailTemplate::ConfirmationInstructions).with_link(link));
        self.publish(SecurityEvent::ConfirmInstructionsSent {
            identity_id: identity.id,
            token: token.into_string(),
            occurred_at: self.clock.now(),
        });
        Ok(())
    }

    fn send_reset_instructions(&self, identity: &Identity) -> Result<(), FlowError> {
        let token = self.tokens.issue(identity, TokenPurpose::Reset)?;
        let link = self.token_link(&self.config.reset_url, &token);
        self.deliver(MailMessage::new(&identity.email, MailTemplate::ResetInstructions).with_link(link));
        self.publish(SecurityEvent::ResetPasswordInstructionsSent {
            identity_id: identity.id,
            token: token.into_string(),
            occurred_at: self.clock.now(),
        });
        Ok(())
    }

    fn mail_login_link(&self, identity: &Identity) -> Result<(), FlowError> {
        let token = self.tokens.issue(identity, TokenPurpose::Login)?;
        let link = self.token_link(&self.config.login_url, &token);
        self.deliver(MailMessage::new(&identity.email, MailTemplate::LoginInstructions).with_link(link));
        self.publish(SecurityEvent::LoginInstructionsSent {
            identity_id: identity.id,
            token: token.into_string(),
            occurred_at: self.clock.now(),
        });
        Ok(())
    }

    /// Mail is best-effort: a delivery failure is logged and the flow continues.
    fn deliver(&self, message: MailMessage) {
        let template = message.template;
        if let Err(e) = self.mailer.send(message) {
            tracing::warn!(?template, error = %e, "mail delivery failed");
        }
    }

    fn publish(&self, event: SecurityEvent) {
        publish_best_effort(&*self.events, event);
    }
}

/// Accept only same-site relative paths as redirect targets.
pub fn safe_next(next: Option<&str>) -> Option<String> {
    let next = next?.trim();
    let relative = next.starts_with('/') && !next.starts_with("//") && !next.contains('\\');
    relative.then(|| next.to_string())
}
