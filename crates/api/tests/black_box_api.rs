use std::sync::Arc;

use base64::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use reqwest::header::{LOCATION, SET_COOKIE, WWW_AUTHENTICATE};
use serde_json::json;

use bastion_api::app::build_app;
use bastion_api::app::services::{AppServices, Backends};
use bastion_auth::{Identity, MailTemplate, PasswordHasher, SecurityConfig};
use bastion_core::{FixedClock, IdentityId};
use bastion_events::{EventBus, InMemoryEventBus, SecurityEvent};
use bastion_infra::{Argon2PasswordHasher, InMemoryIdentityStore, InMemorySessionStore, OutboxMailer};

const NOTICE: &str = "x-security-notice";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    identities: Arc<InMemoryIdentityStore>,
    mailer: Arc<OutboxMailer>,
    clock: Arc<FixedClock>,
    events: Arc<InMemoryEventBus<SecurityEvent>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(config: SecurityConfig) -> Self {
        let identities = Arc::new(InMemoryIdentityStore::new());
        let mailer = Arc::new(OutboxMailer::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let events = Arc::new(InMemoryEventBus::new());

        let backends = Backends {
            identities: identities.clone(),
            sessions: Arc::new(InMemorySessionStore::new()),
            hasher: Arc::new(Argon2PasswordHasher::new()),
            mailer: mailer.clone(),
            events: events.clone(),
            clock: clock.clone(),
        };
        let services = AppServices::new(config, backends).expect("valid config");

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        Self {
            base_url,
            client,
            identities,
            mailer,
            clock,
            events,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn seed(&self, email: &str, password: &str, roles: &[&'static str]) -> Identity {
        let identity = Identity::new(IdentityId::new(), email)
            .with_password_hash(Argon2PasswordHasher::new().hash(password).unwrap())
            .with_roles(roles.iter().copied())
            .with_authentication_token(format!("token-{email}"))
            .confirmed(Utc::now());
        self.identities.seed(identity.clone()).unwrap();
        identity
    }

    async fn login(&self, email: &str, password: &str) -> String {
        let res = self
            .client
            .post(self.url("/login"))
            .form(&[("email", email), ("password", password)])
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        session_cookie(&res).expect("login sets a session cookie")
    }

    async fn get(&self, path: &str, session: Option<&str>) -> reqwest::Response {
        let mut req = self.client.get(self.url(path));
        if let Some(session) = session {
            req = req.header("cookie", format!("session={session}"));
        }
        req.send().await.unwrap()
    }

    /// Path part of the last mailed link to `email`.
    fn mailed_path(&self, email: &str, template: MailTemplate) -> String {
        let message = self.mailer.last_to(email).expect("mail was sent");
        assert_eq!(message.template, template);
        let link = message.link.expect("mail carries a link");
        link.strip_prefix("http://localhost").unwrap_or(&link).to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn session_cookie(res: &reqwest::Response) -> Option<String> {
    res.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.strip_prefix("session="))
        .map(|v| v.split(';').next().unwrap_or_default().to_string())
        .find(|v| !v.is_empty())
}

fn header<'a>(res: &'a reqwest::Response, name: impl reqwest::header::AsHeaderName) -> &'a str {
    res.headers().get(name).and_then(|v| v.to_str().ok()).unwrap_or_default()
}

fn account_config() -> SecurityConfig {
    SecurityConfig {
        secret_key: bastion_auth::SecretKey::new("black-box-secret"),
        registerable: true,
        confirmable: true,
        recoverable: true,
        changeable: true,
        ..SecurityConfig::default()
    }
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::spawn(SecurityConfig::default()).await;
    let res = server.get("/health", None).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn anonymous_session_route_redirects_to_login_with_next() {
    let server = TestServer::spawn(SecurityConfig::default()).await;

    let res = server.get("/profile", None).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, LOCATION), "/login?next=%2Fprofile");
    assert_eq!(header(&res, NOTICE), "LOGIN");
}

#[tokio::test]
async fn login_honours_next_and_opens_protected_routes() {
    let server = TestServer::spawn(SecurityConfig::default()).await;
    server.seed("matt@lp.com", "password", &[]);

    let res = server
        .client
        .post(server.url("/login?next=/profile"))
        .form(&[("email", "matt@lp.com"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, LOCATION), "/profile");
    let session = session_cookie(&res).unwrap();

    let res = server.get("/profile", Some(&session)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["email"], "matt@lp.com");
}

#[tokio::test]
async fn login_rejects_bad_credentials_and_offsite_next() {
    let server = TestServer::spawn(SecurityConfig::default()).await;
    server.seed("matt@lp.com", "password", &[]);

    let res = server
        .client
        .post(server.url("/login"))
        .form(&[("email", "matt@lp.com"), ("password", "wrong")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(session_cookie(&res).is_none());
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["response"]["errors"]["password"][0], "Invalid password.");

    let res = server
        .client
        .post(server.url("/login"))
        .form(&[("email", "matt@lp.com"), ("password", "password"), ("next", "http://evil.example/")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(session_cookie(&res).is_none());
}

#[tokio::test]
async fn json_login_answers_with_the_envelope() {
    let server = TestServer::spawn(SecurityConfig::default()).await;
    let identity = server.seed("matt@lp.com", "password", &[]);

    let res = server
        .client
        .post(server.url("/login"))
        .json(&json!({ "email": "matt@lp.com", "password": "password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(session_cookie(&res).is_some());

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["meta"]["code"], 200);
    assert_eq!(body["response"]["user"]["id"], identity.id.to_string());
    assert_eq!(body["response"]["user"]["authentication_token"], "token-matt@lp.com");
}

#[tokio::test]
async fn missing_roles_redirect_back_with_a_notice() {
    let server = TestServer::spawn(SecurityConfig::default()).await;
    server.seed("jill@lp.com", "password", &["editor"]);
    let session = server.login("jill@lp.com", "password").await;

    let res = server
        .client
        .get(server.url("/admin"))
        .header("cookie", format!("session={session}"))
        .header("referer", "/profile")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, LOCATION), "/profile");
    assert_eq!(header(&res, NOTICE), "UNAUTHORIZED");

    // No referrer: the unauthorized view.
    let res = server.get("/admin_and_editor", Some(&session)).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, LOCATION), "/");

    let res = server.get("/admin_or_editor", Some(&session)).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn token_routes_answer_401_without_a_token() {
    let server = TestServer::spawn(SecurityConfig::default()).await;
    server.seed("matt@lp.com", "password", &[]);

    let res = server.get("/token", None).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(res.headers().get(WWW_AUTHENTICATE).is_none());

    let res = server
        .client
        .get(server.url("/token"))
        .header("X-Auth-Token", "token-matt@lp.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = server.get("/token?auth_token=token-matt%40lp.com", None).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .client
        .get(server.url("/token"))
        .header("X-Auth-Token", "not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_route_with_roles_denies_softly() {
    let server = TestServer::spawn(SecurityConfig::default()).await;
    server.seed("matt@lp.com", "password", &[]);

    let res = server
        .client
        .get(server.url("/token/editor"))
        .header("X-Auth-Token", "token-matt@lp.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, NOTICE), "UNAUTHORIZED");
}

#[tokio::test]
async fn basic_auth_route_challenges_with_the_realm() {
    let server = TestServer::spawn(SecurityConfig::default()).await;
    server.seed("joe@lp.com", "password", &[]);

    let res = server.get("/http", None).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(header(&res, WWW_AUTHENTICATE), "Basic realm=\"Login Required\"");

    let wrong = base64::engine::general_purpose::STANDARD.encode("joe@lp.com:nope");
    let res = server
        .client
        .get(server.url("/http"))
        .header("authorization", format!("Basic {wrong}"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server
        .client
        .get(server.url("/http"))
        .basic_auth("joe@lp.com", Some("password"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn inactive_identity_is_anonymous_everywhere() {
    let server = TestServer::spawn(SecurityConfig::default()).await;
    let identity = Identity::new(IdentityId::new(), "tiya@lp.com")
        .with_authentication_token("tiya-token")
        .deactivated();
    server.identities.seed(identity).unwrap();

    let res = server
        .client
        .get(server.url("/token"))
        .header("X-Auth-Token", "tiya-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_ends_the_session_and_follows_next() {
    let server = TestServer::spawn(SecurityConfig::default()).await;
    server.seed("matt@lp.com", "password", &[]);
    let session = server.login("matt@lp.com", "password").await;

    let res = server.get("/logout?next=/goodbye", Some(&session)).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, LOCATION), "/goodbye");
    assert!(header(&res, SET_COOKIE).contains("Max-Age=0"));

    let res = server.get("/profile", Some(&session)).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert!(header(&res, LOCATION).starts_with("/login"));
}

#[tokio::test]
async fn authenticated_users_skip_the_login_form() {
    let server = TestServer::spawn(SecurityConfig::default()).await;
    server.seed("matt@lp.com", "password", &[]);
    let session = server.login("matt@lp.com", "password").await;

    let res = server
        .client
        .post(server.url("/login"))
        .header("cookie", format!("session={session}"))
        .form(&[("email", "matt@lp.com"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, LOCATION), "/");
    assert!(session_cookie(&res).is_none());
}

#[tokio::test]
async fn register_then_confirm_logs_the_user_in() {
    let server = TestServer::spawn(account_config()).await;

    let res = server
        .client
        .post(server.url("/register"))
        .form(&[("email", "Dude@LP.com"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, NOTICE), "CONFIRM_REGISTRATION");
    assert!(session_cookie(&res).is_none());
    assert_eq!(server.identities.commit_count(), 1);

    // Unconfirmed users cannot log in.
    let res = server
        .client
        .post(server.url("/login"))
        .form(&[("email", "dude@lp.com"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let path = server.mailed_path("dude@lp.com", MailTemplate::Welcome);
    let res = server.get(&path, None).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, NOTICE), "EMAIL_CONFIRMED");
    let session = session_cookie(&res).expect("confirmation logs in");

    let res = server.get("/profile", Some(&session)).await;
    assert_eq!(res.status(), StatusCode::OK);

    // The same link again: already confirmed, not an error. It logs in but
    // changes no identity, so nothing is committed.
    let commits = server.identities.commit_count();
    let res = server.get(&path, None).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, NOTICE), "ALREADY_CONFIRMED");
    assert!(session_cookie(&res).is_some());
    assert_eq!(server.identities.commit_count(), commits);
    assert!(!server.identities.has_pending_changes());
}

#[tokio::test]
async fn register_rejects_duplicate_email() {
    let server = TestServer::spawn(account_config()).await;
    server.seed("matt@lp.com", "password", &[]);

    let res = server
        .client
        .post(server.url("/register"))
        .json(&json!({ "email": "MATT@lp.com", "password": "password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(
        body["response"]["errors"]["email"][0],
        "This email is already associated with an account."
    );
}

#[tokio::test]
async fn expired_confirmation_link_sends_a_new_one() {
    let server = TestServer::spawn(account_config()).await;

    let res = server
        .client
        .post(server.url("/register"))
        .form(&[("email", "dude@lp.com"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    let stale = server.mailed_path("dude@lp.com", MailTemplate::Welcome);

    server.clock.advance(ChronoDuration::days(6));

    let res = server.get(&stale, None).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, LOCATION), "/confirm");
    assert_eq!(header(&res, NOTICE), "CONFIRMATION_EXPIRED");
    assert!(session_cookie(&res).is_none());

    let fresh = server.mailed_path("dude@lp.com", MailTemplate::ConfirmationInstructions);
    assert_ne!(fresh, stale);
    let res = server.get(&fresh, None).await;
    assert_eq!(header(&res, NOTICE), "EMAIL_CONFIRMED");
}

#[tokio::test]
async fn reset_link_works_once() {
    let server = TestServer::spawn(account_config()).await;
    server.seed("joe@lp.com", "password", &[]);

    let res = server
        .client
        .post(server.url("/reset"))
        .form(&[("email", "joe@lp.com")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, NOTICE), "PASSWORD_RESET_REQUEST");
    let path = server.mailed_path("joe@lp.com", MailTemplate::ResetInstructions);

    let res = server.get(&path, None).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .client
        .post(server.url(&path))
        .form(&[("password", "newpassword"), ("password_confirm", "newpassword")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, NOTICE), "PASSWORD_RESET");
    assert!(session_cookie(&res).is_some());

    // The password hash changed, so the link no longer matches.
    let res = server
        .client
        .post(server.url(&path))
        .form(&[("password", "another"), ("password_confirm", "another")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, LOCATION), "/reset");
    assert_eq!(header(&res, NOTICE), "INVALID_RESET_PASSWORD_TOKEN");

    server.login("joe@lp.com", "newpassword").await;
}

#[tokio::test]
async fn change_password_requires_login_and_the_current_password() {
    let server = TestServer::spawn(account_config()).await;
    server.seed("matt@lp.com", "password", &[]);

    let res = server
        .client
        .post(server.url("/change"))
        .form(&[("password", "password"), ("new_password", "x"), ("new_password_confirm", "x")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert!(header(&res, LOCATION).starts_with("/login?next="));

    let session = server.login("matt@lp.com", "password").await;
    let res = server
        .client
        .post(server.url("/change"))
        .header("cookie", format!("session={session}"))
        .form(&[
            ("password", "password"),
            ("new_password", "newpassword"),
            ("new_password_confirm", "newpassword"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, NOTICE), "PASSWORD_CHANGE");
    assert_eq!(
        server.mailer.last_to("matt@lp.com").map(|m| m.template),
        Some(MailTemplate::ChangeNotice)
    );

    server.login("matt@lp.com", "newpassword").await;
}

#[tokio::test]
async fn failed_commit_turns_the_response_into_a_500() {
    let server = TestServer::spawn(account_config()).await;
    server.identities.fail_commits(true);

    let res = server
        .client
        .post(server.url("/register"))
        .form(&[("email", "dude@lp.com"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "commit_failed");
    assert_eq!(server.identities.commit_count(), 0);
    assert!(!server.identities.has_pending_changes());

    // The unsaved registration must not surface in a later unit of work.
    server.identities.fail_commits(false);
    let res = server
        .client
        .post(server.url("/login"))
        .form(&[("email", "dude@lp.com"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(session_cookie(&res).is_none());
    assert_eq!(server.identities.commit_count(), 0);

    let res = server
        .client
        .post(server.url("/register"))
        .form(&[("email", "dude@lp.com"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(server.identities.commit_count(), 1);
}

#[tokio::test]
async fn rejected_requests_leave_nothing_staged() {
    let server = TestServer::spawn(account_config()).await;
    server.seed("matt@lp.com", "password", &[]);

    let res = server
        .client
        .post(server.url("/register"))
        .form(&[("email", "dude@lp.com"), ("password", "password"), ("password_confirm", "different")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = server
        .client
        .post(server.url("/login"))
        .form(&[("email", "matt@lp.com"), ("password", "wrong")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    assert!(!server.identities.has_pending_changes());
    assert_eq!(server.identities.commit_count(), 0);
}

#[tokio::test]
async fn mail_failure_does_not_fail_the_flow() {
    let server = TestServer::spawn(account_config()).await;
    server.seed("joe@lp.com", "password", &[]);
    server.mailer.set_failing(true);

    let res = server
        .client
        .post(server.url("/reset"))
        .form(&[("email", "joe@lp.com")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, NOTICE), "PASSWORD_RESET_REQUEST");
}

#[tokio::test]
async fn passwordless_login_by_mailed_link() {
    let server = TestServer::spawn(SecurityConfig {
        passwordless: true,
        ..SecurityConfig::default()
    })
    .await;
    server.seed("matt@lp.com", "password", &[]);

    let res = server
        .client
        .post(server.url("/login"))
        .form(&[("email", "matt@lp.com")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, NOTICE), "LOGIN_EMAIL_SENT");
    assert!(session_cookie(&res).is_none());

    // Sending the link commits nothing; following it commits once.
    let calls = server.identities.commit_calls();
    let path = server.mailed_path("matt@lp.com", MailTemplate::LoginInstructions);
    let res = server.get(&path, None).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, NOTICE), "PASSWORDLESS_LOGIN_SUCCESSFUL");
    let session = session_cookie(&res).unwrap();
    assert_eq!(server.identities.commit_calls(), calls + 1);

    let res = server.get("/profile", Some(&session)).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server.get("/login/garbage", None).await;
    assert_eq!(header(&res, NOTICE), "INVALID_LOGIN_TOKEN");
}

#[tokio::test]
async fn expired_login_link_sends_a_new_one() {
    let server = TestServer::spawn(SecurityConfig {
        passwordless: true,
        ..SecurityConfig::default()
    })
    .await;
    server.seed("matt@lp.com", "password", &[]);

    let res = server
        .client
        .post(server.url("/login"))
        .form(&[("email", "matt@lp.com")])
        .send()
        .await
        .unwrap();
    assert_eq!(header(&res, NOTICE), "LOGIN_EMAIL_SENT");
    let stale = server.mailed_path("matt@lp.com", MailTemplate::LoginInstructions);

    server.clock.advance(ChronoDuration::days(1) + ChronoDuration::milliseconds(1));

    let res = server.get(&stale, None).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, LOCATION), "/login");
    assert_eq!(header(&res, NOTICE), "LOGIN_EXPIRED");
    assert!(session_cookie(&res).is_none());
    assert_eq!(server.mailer.sent().len(), 2);

    let fresh = server.mailed_path("matt@lp.com", MailTemplate::LoginInstructions);
    assert_ne!(fresh, stale);
    let res = server.get(&fresh, None).await;
    assert_eq!(header(&res, NOTICE), "PASSWORDLESS_LOGIN_SUCCESSFUL");
    assert!(session_cookie(&res).is_some());
}

#[tokio::test]
async fn expired_reset_link_sends_new_instructions() {
    let server = TestServer::spawn(account_config()).await;
    server.seed("joe@lp.com", "password", &[]);

    let res = server
        .client
        .post(server.url("/reset"))
        .form(&[("email", "joe@lp.com")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    let stale = server.mailed_path("joe@lp.com", MailTemplate::ResetInstructions);

    server.clock.advance(ChronoDuration::days(6));

    let res = server.get(&stale, None).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, LOCATION), "/reset");
    assert_eq!(header(&res, NOTICE), "PASSWORD_RESET_EXPIRED");
    assert_eq!(server.mailer.sent().len(), 2);

    // Submitting the stale form is rejected the same way and changes nothing.
    let res = server
        .client
        .post(server.url(&stale))
        .form(&[("password", "newpassword"), ("password_confirm", "newpassword")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(header(&res, NOTICE), "PASSWORD_RESET_EXPIRED");
    assert!(session_cookie(&res).is_none());
    assert_eq!(server.identities.commit_count(), 0);

    let fresh = server.mailed_path("joe@lp.com", MailTemplate::ResetInstructions);
    assert_ne!(fresh, stale);
    let res = server.get(&fresh, None).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn account_flows_publish_signals() {
    let server = TestServer::spawn(account_config()).await;
    let signals = server.events.subscribe();

    let res = server
        .client
        .post(server.url("/register"))
        .form(&[("email", "dude@lp.com"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    let confirm = server.mailed_path("dude@lp.com", MailTemplate::Welcome);
    server.get(&confirm, None).await;

    let res = server
        .client
        .post(server.url("/reset"))
        .form(&[("email", "dude@lp.com")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    let reset = server.mailed_path("dude@lp.com", MailTemplate::ResetInstructions);
    let res = server
        .client
        .post(server.url(&reset))
        .form(&[("password", "newpassword"), ("password_confirm", "newpassword")])
        .send()
        .await
        .unwrap();
    assert_eq!(header(&res, NOTICE), "PASSWORD_RESET");

    let received = signals.drain();
    let registered = received
        .iter()
        .find(|e| matches!(e, SecurityEvent::UserRegistered { .. }))
        .expect("registration signal");
    let identity_id = registered.identity_id();
    let confirm_token = confirm.rsplit('/').next().unwrap();
    assert_eq!(registered.token(), Some(confirm_token));

    assert!(received.iter().any(|e| matches!(e, SecurityEvent::UserConfirmed { identity_id: id, .. } if *id == identity_id)));
    assert!(received.iter().any(|e| matches!(e, SecurityEvent::PasswordReset { identity_id: id, .. } if *id == identity_id)));

    let reset_token = reset.rsplit('/').next().unwrap();
    let instructions = received
        .iter()
        .find(|e| matches!(e, SecurityEvent::ResetPasswordInstructionsSent { .. }))
        .expect("reset instructions signal");
    assert_eq!(instructions.identity_id(), identity_id);
    assert_eq!(instructions.token(), Some(reset_token));
}

#[tokio::test]
async fn disabled_features_are_not_routed() {
    let server = TestServer::spawn(SecurityConfig::default()).await;

    let res = server
        .client
        .post(server.url("/register"))
        .form(&[("email", "dude@lp.com"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
