//! Security settings.
//!
//! Defaults match a stock deployment; `from_env` overrides individual values
//! from `BASTION_*` variables. Nothing here is global: the API layer builds one
//! `SecurityConfig` at startup and hands it to whoever needs it.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::TokenTtls;

const ENV_PREFIX: &str = "BASTION_";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid duration for {key}: '{value}' (expected '<n> <unit>')")]
    InvalidDuration { key: &'static str, value: String },

    #[error("invalid boolean for {key}: '{value}'")]
    InvalidBool { key: &'static str, value: String },

    #[error("{key} must not be empty")]
    Empty { key: &'static str },
}

/// Application secret. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub secret_key: SecretKey,

    pub login_within: String,
    pub confirm_email_within: String,
    pub reset_password_within: String,

    pub token_authentication_header: String,
    pub token_authentication_key: String,
    pub basic_realm: String,

    /// Scheme and host used to build links in outgoing mail.
    pub external_url: String,

    pub login_url: String,
    pub logout_url: String,
    pub register_url: String,
    pub reset_url: String,
    pub change_url: String,
    pub confirm_url: String,

    pub post_login_view: String,
    pub post_logout_view: String,
    pub post_register_view: Option<String>,
    pub post_confirm_view: Option<String>,
    pub post_reset_view: Option<String>,
    pub post_change_view: Option<String>,
    pub confirm_error_view: Option<String>,
    pub unauthorized_view: String,

    pub default_roles: Vec<String>,

    pub confirmable: bool,
    pub recoverable: bool,
    pub changeable: bool,
    pub registerable: bool,
    pub passwordless: bool,
    pub login_without_confirmation: bool,
    pub send_register_email: bool,
    pub send_password_reset_notice: bool,
    pub send_password_change_notice: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: SecretKey::new("dev-secret"),
            login_within: "1 days".to_string(),
            confirm_email_within: "5 days".to_string(),
            reset_password_within: "5 days".to_string(),
            token_authentication_header: "X-Auth-Token".to_string(),
            token_authentication_key: "auth_token".to_string(),
            basic_realm: "Login Required".to_string(),
            external_url: "http://localhost".to_string(),
            login_url: "/login".to_string(),
            logout_url: "/logout".to_string(),
            register_url: "/register".to_string(),
            reset_url: "/reset".to_string(),
            change_url: "/change".to_string(),
            confirm_url: "/confirm".to_string(),
            post_login_view: "/".to_string(),
            post_logout_view: "/".to_string(),
            post_register_view: None,
            post_confirm_view: None,
            post_reset_view: None,
            post_change_view: None,
            confirm_error_view: None,
            unauthorized_view: "/".to_string(),
            default_roles: Vec::new(),
            confirmable: false,
            recoverable: false,
            changeable: false,
            registerable: false,
            passwordless: false,
            login_without_confirmation: false,
            send_register_email: true,
            send_password_reset_notice: true,
            send_password_change_notice: true,
        }
    }
}

impl SecurityConfig {
    /// Defaults overridden by `BASTION_<OPTION>` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        if config.secret_key == SecurityConfig::default().secret_key {
            tracing::warn!("BASTION_SECRET_KEY not set; using insecure dev default");
        }
        Ok(config)
    }

    /// Like `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(v) = get("SECRET_KEY") {
            if v.is_empty() {
                return Err(ConfigError::Empty { key: "SECRET_KEY" });
            }
            config.secret_key = SecretKey::new(v);
        }

        override_string(&get, "LOGIN_WITHIN", &mut config.login_within);
        override_string(&get, "CONFIRM_EMAIL_WITHIN", &mut config.confirm_email_within);
        override_string(&get, "RESET_PASSWORD_WITHIN", &mut config.reset_password_within);
        override_string(&get, "TOKEN_AUTHENTICATION_HEADER", &mut config.token_authentication_header);
        override_string(&get, "TOKEN_AUTHENTICATION_KEY", &mut config.token_authentication_key);
        override_string(&get, "BASIC_REALM", &mut config.basic_realm);
        override_string(&get, "EXTERNAL_URL", &mut config.external_url);
        override_string(&get, "LOGIN_URL", &mut config.login_url);
        override_string(&get, "LOGOUT_URL", &mut config.logout_url);
        override_string(&get, "REGISTER_URL", &mut config.register_url);
        override_string(&get, "RESET_URL", &mut config.reset_url);
        override_string(&get, "CHANGE_URL", &mut config.change_url);
        override_string(&get, "CONFIRM_URL", &mut config.confirm_url);
        override_string(&get, "POST_LOGIN_VIEW", &mut config.post_login_view);
        override_string(&get, "POST_LOGOUT_VIEW", &mut config.post_logout_view);
        override_string(&get, "UNAUTHORIZED_VIEW", &mut config.unauthorized_view);

        override_optional(&get, "POST_REGISTER_VIEW", &mut config.post_register_view);
        override_optional(&get, "POST_CONFIRM_VIEW", &mut config.post_confirm_view);
        override_optional(&get, "POST_RESET_VIEW", &mut config.post_reset_view);
        override_optional(&get, "POST_CHANGE_VIEW", &mut config.post_change_view);
        override_optional(&get, "CONFIRM_ERROR_VIEW", &mut config.confirm_error_view);

        if let Some(v) = get("DEFAULT_ROLES") {
            config.default_roles = v
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }

        override_bool(&get, "CONFIRMABLE", &mut config.confirmable)?;
        override_bool(&get, "RECOVERABLE", &mut config.recoverable)?;
        override_bool(&get, "CHANGEABLE", &mut config.changeable)?;
        override_bool(&get, "REGISTERABLE", &mut config.registerable)?;
        override_bool(&get, "PASSWORDLESS", &mut config.passwordless)?;
        override_bool(&get, "LOGIN_WITHOUT_CONFIRMATION", &mut config.login_without_confirmation)?;
        override_bool(&get, "SEND_REGISTER_EMAIL", &mut config.send_register_email)?;
        override_bool(&get, "SEND_PASSWORD_RESET_NOTICE", &mut config.send_password_reset_notice)?;
        override_bool(&get, "SEND_PASSWORD_CHANGE_NOTICE", &mut config.send_password_change_notice)?;

        config.ttls()?;
        Ok(config)
    }

    /// Parsed per-purpose token lifetimes.
    pub fn ttls(&self) -> Result<TokenTtls, ConfigError> {
        Ok(TokenTtls {
            login: parse_within("LOGIN_WITHIN", &self.login_within)?,
            confirm: parse_within("CONFIRM_EMAIL_WITHIN", &self.confirm_email_within)?,
            reset: parse_within("RESET_PASSWORD_WITHIN", &self.reset_password_within)?,
        })
    }

    /// Absolute link for mail bodies.
    pub fn external_link(&self, path: &str) -> String {
        format!("{}{}", self.external_url.trim_end_matches('/'), path)
    }

    pub fn confirm_error_location(&self) -> &str {
        self.confirm_error_view.as_deref().unwrap_or(&self.confirm_url)
    }

    pub fn post_confirm_location(&self) -> &str {
        self.post_confirm_view.as_deref().unwrap_or(&self.post_login_view)
    }

    pub fn post_register_location(&self) -> &str {
        self.post_register_view.as_deref().unwrap_or(&self.post_login_view)
    }

    pub fn post_reset_location(&self) -> &str {
        self.post_reset_view.as_deref().unwrap_or(&self.post_login_view)
    }

    pub fn post_change_location(&self) -> &str {
        self.post_change_view.as_deref().unwrap_or(&self.post_login_view)
    }

    /// True when an unconfirmed identity must not log in.
    pub fn requires_confirmation(&self) -> bool {
        self.confirmable && !self.login_without_confirmation
    }
}

fn override_string(get: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut String) {
    if let Some(v) = get(name) {
        *slot = v;
    }
}

fn override_optional(get: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut Option<String>) {
    if let Some(v) = get(name) {
        *slot = if v.is_empty() { None } else { Some(v) };
    }
}

fn override_bool(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    slot: &mut bool,
) -> Result<(), ConfigError> {
    let Some(v) = get(name) else {
        return Ok(());
    };
    *slot = match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => return Err(ConfigError::InvalidBool { key: name, value: v }),
    };
    Ok(())
}

fn parse_within(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        key,
        value: value.to_string(),
    })
}

/// Parse `"<n> <unit>"`, e.g. `"5 days"` or `"30 minutes"`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let mut parts = value.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if parts.next().is_some() || amount < 0 {
        return None;
    }

    let unit = unit.strip_suffix('s').unwrap_or(unit);
    // Out-of-range amounts are rejected, not clamped.
    match unit {
        "millisecond" => Duration::try_milliseconds(amount),
        "second" => Duration::try_seconds(amount),
        "minute" => Duration::try_minutes(amount),
        "hour" => Duration::try_hours(amount),
        "day" => Duration::try_days(amount),
        "week" => Duration::try_weeks(amount),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_stock() {
        let config = SecurityConfig::default();
        let ttls = config.ttls().unwrap();
        assert_eq!(ttls.login, Duration::days(1));
        assert_eq!(ttls.confirm, Duration::days(5));
        assert_eq!(ttls.reset, Duration::days(5));
        assert_eq!(config.token_authentication_header, "X-Auth-Token");
        assert_eq!(config.token_authentication_key, "auth_token");
        assert_eq!(config.login_url, "/login");
        assert_eq!(config.confirm_error_location(), "/confirm");
        assert_eq!(config.post_confirm_location(), "/");
    }

    #[test]
    fn durations_accept_singular_and_plural_units() {
        assert_eq!(parse_duration("1 day"), Some(Duration::days(1)));
        assert_eq!(parse_duration("30 minutes"), Some(Duration::minutes(30)));
        assert_eq!(parse_duration("2 weeks"), Some(Duration::weeks(2)));
        assert_eq!(parse_duration("250 milliseconds"), Some(Duration::milliseconds(250)));
        assert_eq!(parse_duration("five days"), None);
        assert_eq!(parse_duration("5"), None);
        assert_eq!(parse_duration("5 fortnights"), None);
        assert_eq!(parse_duration("-1 days"), None);
    }

    #[test]
    fn huge_durations_are_rejected_without_panicking() {
        assert_eq!(parse_duration("9999999999999999 days"), None);
        assert_eq!(parse_duration("9223372036854775807 weeks"), None);

        let err = SecurityConfig::from_lookup(lookup(&[("BASTION_LOGIN_WITHIN", "9999999999999999 days")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { key: "LOGIN_WITHIN", .. }));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = SecurityConfig::from_lookup(lookup(&[
            ("BASTION_SECRET_KEY", "s3cr3t"),
            ("BASTION_CONFIRM_EMAIL_WITHIN", "2 hours"),
            ("BASTION_CONFIRMABLE", "true"),
            ("BASTION_DEFAULT_ROLES", "member, reader"),
            ("BASTION_CONFIRM_ERROR_VIEW", "/confirm-error"),
        ]))
        .unwrap();

        assert_eq!(config.secret_key.expose(), "s3cr3t");
        assert_eq!(config.ttls().unwrap().confirm, Duration::hours(2));
        assert!(config.confirmable);
        assert!(config.requires_confirmation());
        assert_eq!(config.default_roles, vec!["member", "reader"]);
        assert_eq!(config.confirm_error_location(), "/confirm-error");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = SecurityConfig::from_lookup(lookup(&[("BASTION_RESET_PASSWORD_WITHIN", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { key: "RESET_PASSWORD_WITHIN", .. }));

        let err = SecurityConfig::from_lookup(lookup(&[("BASTION_PASSWORDLESS", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBool { .. }));

        let err = SecurityConfig::from_lookup(lookup(&[("BASTION_SECRET_KEY", "")])).unwrap_err();
        assert_eq!(err, ConfigError::Empty { key: "SECRET_KEY" });
    }

    #[test]
    fn debug_never_prints_the_secret() {
        let config = SecurityConfig::from_lookup(lookup(&[("BASTION_SECRET_KEY", "hunter2")])).unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn external_links_join_cleanly() {
        let mut config = SecurityConfig::default();
        config.external_url = "https://example.com/".into();
        assert_eq!(config.external_link("/confirm/abc"), "https://example.com/confirm/abc");
    }
}
