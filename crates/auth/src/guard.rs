//! Per-request access decisions.
//!
//! A route is protected by a [`GuardPolicy`]: one authentication strategy plus
//! a conjunctive list of role requirements. [`AccessGuard::check`] resolves the
//! principal for the request and returns a [`GuardDecision`] that the HTTP layer
//! turns into a response (or lets the handler run).
//!
//! Authentication failures are uniform. A revoked bearer token, a malformed
//! header, a store outage and a wrong password all end as `Anonymous`.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{
    Identity, IdentityField, IdentityStore, PasswordHasher, PermissionDenied, PermissionRequirement, Principal, Role,
    SecurityConfig, normalize_email, requirement::evaluate_all,
};

/// Notice attached to a soft denial.
pub const DENIED_NOTICE: &str = "You do not have permission to view this resource.";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Identity resolved from the login session.
    Session,
    /// Static bearer token from a header or query parameter.
    Token,
    /// `Authorization: Basic` credentials verified against the password hash.
    Basic,
}

/// How a route is protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardPolicy {
    pub strategy: AuthStrategy,
    pub requirements: Vec<PermissionRequirement>,
}

impl GuardPolicy {
    pub fn login_required() -> Self {
        Self {
            strategy: AuthStrategy::Session,
            requirements: Vec::new(),
        }
    }

    /// Session login plus every listed role.
    pub fn roles_required<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        Self::login_required().and_roles_required(roles)
    }

    /// Session login plus at least one listed role.
    pub fn roles_accepted<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        Self::login_required().and_roles_accepted(roles)
    }

    pub fn auth_token_required() -> Self {
        Self {
            strategy: AuthStrategy::Token,
            requirements: Vec::new(),
        }
    }

    pub fn http_auth_required() -> Self {
        Self {
            strategy: AuthStrategy::Basic,
            requirements: Vec::new(),
        }
    }

    pub fn and_roles_required<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        self.requirements.push(PermissionRequirement::all_of(roles));
        self
    }

    pub fn and_roles_accepted<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        self.requirements.push(PermissionRequirement::any_of(roles));
        self
    }
}

/// Decoded `Authorization: Basic` credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    /// Parse an `Authorization` header value. `None` for anything that is not
    /// well-formed Basic credentials.
    pub fn from_authorization_header(value: &str) -> Option<Self> {
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

impl core::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Request-scoped inputs to a guard decision, extracted by the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct GuardRequest {
    /// Path and query of the protected request, used for `next`.
    pub requested_url: String,
    pub referrer: Option<String>,
    /// Identity behind the login session, if any.
    pub session_identity: Option<Identity>,
    pub header_token: Option<String>,
    pub query_token: Option<String>,
    pub basic: Option<BasicCredentials>,
}

impl GuardRequest {
    pub fn new(requested_url: impl Into<String>) -> Self {
        Self {
            requested_url: requested_url.into(),
            ..Self::default()
        }
    }

    /// Header wins over the query parameter. Empty values count as absent.
    pub fn bearer_token(&self) -> Option<&str> {
        self.header_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.query_token.as_deref().filter(|t| !t.is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow(Identity),
    RedirectToLogin { location: String },
    /// 401. `challenge` is the `WWW-Authenticate` value when one applies.
    Unauthorized { challenge: Option<String> },
    /// Authenticated but lacking roles: redirect with a notice rather than 403.
    Denied { location: String, denied: PermissionDenied },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow(_))
    }
}

#[derive(Debug, Clone)]
struct GuardSettings {
    login_url: String,
    unauthorized_view: String,
    basic_realm: String,
}

pub struct AccessGuard {
    store: Arc<dyn IdentityStore>,
    hasher: Arc<dyn PasswordHasher>,
    settings: GuardSettings,
}

impl AccessGuard {
    pub fn new(store: Arc<dyn IdentityStore>, hasher: Arc<dyn PasswordHasher>, config: &SecurityConfig) -> Self {
        Self {
            store,
            hasher,
            settings: GuardSettings {
                login_url: config.login_url.clone(),
                unauthorized_view: config.unauthorized_view.clone(),
                basic_realm: config.basic_realm.clone(),
            },
        }
    }

    /// Resolve the principal for one strategy. Inactive identities are anonymous.
    pub fn authenticate(&self, strategy: AuthStrategy, request: &GuardRequest) -> Principal {
        let identity = match strategy {
            AuthStrategy::Session => request.session_identity.clone(),
            AuthStrategy::Token => request.bearer_token().and_then(|token| self.identity_for_token(token)),
            AuthStrategy::Basic => request.basic.as_ref().and_then(|creds| self.identity_for_basic(creds)),
        };

        Principal::from(identity.filter(|identity| identity.active))
    }

    pub fn authorize(&self, identity: &Identity, requirements: &[PermissionRequirement]) -> Result<(), PermissionDenied> {
        evaluate_all(requirements, &identity.roles)
    }

    pub fn check(&self, policy: &GuardPolicy, request: &GuardRequest) -> GuardDecision {
        let identity = match self.authenticate(policy.strategy, request) {
            Principal::Authenticated(identity) => identity,
            Principal::Anonymous => {
                tracing::debug!(strategy = ?policy.strategy, url = %request.requested_url, "unauthenticated request");
                return self.unauthenticated(policy.strategy, request);
            }
        };

        match self.authorize(&identity, &policy.requirements) {
            Ok(()) => GuardDecision::Allow(identity),
            Err(denied) => {
                tracing::debug!(identity_id = %identity.id, url = %request.requested_url, "access denied");
                GuardDecision::Denied {
                    location: request
                        .referrer
                        .clone()
                        .unwrap_or_else(|| self.settings.unauthorized_view.clone()),
                    denied,
                }
            }
        }
    }

    /// Login view with `next` pointing back at `requested_url`.
    pub fn login_redirect(&self, requested_url: &str) -> String {
        let login_url = &self.settings.login_url;
        match serde_urlencoded::to_string(&[("next", requested_url)]) {
            Ok(query) => {
                let sep = if login_url.contains('?') { '&' } else { '?' };
                format!("{login_url}{sep}{query}")
            }
            Err(_) => login_url.clone(),
        }
    }

    pub fn basic_challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.settings.basic_realm)
    }

    fn unauthenticated(&self, strategy: AuthStrategy, request: &GuardRequest) -> GuardDecision {
        match strategy {
            AuthStrategy::Session => GuardDecision::RedirectToLogin {
                location: self.login_redirect(&request.requested_url),
            },
            AuthStrategy::Token => GuardDecision::Unauthorized { challenge: None },
            AuthStrategy::Basic => GuardDecision::Unauthorized {
                challenge: Some(self.basic_challenge()),
            },
        }
    }

    fn identity_for_token(&self, token: &str) -> Option<Identity> {
        let field = IdentityField::AuthenticationToken(token);
        match self.store.find(field) {
            Ok(identity) if identity.authentication_token.as_deref() == Some(token) => Some(identity),
            Ok(_) => None,
            Err(e) => {
                log_lookup_failure(field, &e);
                None
            }
        }
    }

    fn identity_for_basic(&self, creds: &BasicCredentials) -> Option<Identity> {
        let email = normalize_email(&creds.username);
        let field = IdentityField::Email(&email);
        let identity = match self.store.find(field) {
            Ok(identity) => identity,
            Err(e) => {
                log_lookup_failure(field, &e);
                return None;
            }
        };

        let hash = identity.password_hash.as_deref()?;
        self.hasher.verify(&creds.password, hash).then_some(identity)
    }
}

fn log_lookup_failure(field: IdentityField<'_>, error: &crate::StoreError) {
    match error {
        crate::StoreError::NotFound => tracing::debug!(field = field.name(), "no identity for credentials"),
        other => tracing::warn!(field = field.name(), error = %other, "identity lookup failed"),
    }
}

impl core::fmt::Debug for AccessGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccessGuard")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
