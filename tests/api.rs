//! End-to-end flows over the full router, backed by the in-memory stores.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::util::ServiceExt;

use gatehouse::activity::{ActivityLog, ActivityStore, MemoryActivityStore};
use gatehouse::auth::InMemoryChallengeStore;
use gatehouse::config::Configuration;
use gatehouse::crypto::PasswordHasher;
use gatehouse::mail::{MailSink, RecordingMailer, Template};
use gatehouse::token::SessionTokenCodec;
use gatehouse::user::{AccountStore, MemoryAccountStore, Role};
use gatehouse::{AppState, app};

struct TestServer {
    state: AppState,
    accounts: Arc<MemoryAccountStore>,
    mailer: Arc<RecordingMailer>,
}

fn server() -> TestServer {
    let accounts = Arc::new(MemoryAccountStore::new());
    let mailer = Arc::new(RecordingMailer::default());
    let activities = Arc::new(MemoryActivityStore::new());

    let state = AppState {
        config: Arc::new(Configuration::with_urls(
            "Gatehouse",
            "https://account.example.com",
            "http://localhost:5173",
        )),
        accounts: Arc::clone(&accounts) as Arc<dyn AccountStore>,
        activity: ActivityLog::new(
            Arc::clone(&activities) as Arc<dyn ActivityStore>
        ),
        mail: Arc::clone(&mailer) as Arc<dyn MailSink>,
        hasher: Arc::new(
            PasswordHasher::new(Some(gatehouse::config::Argon2 {
                memory_cost: 1024,
                iterations: 1,
                parallelism: 1,
                hash_length: 32,
            }))
            .unwrap(),
        ),
        tokens: SessionTokenCodec::new("integration-secret", 3600),
        challenges: Arc::new(InMemoryChallengeStore::new()),
    };

    TestServer {
        state,
        accounts,
        mailer,
    }
}

impl TestServer {
    fn app(&self) -> Router {
        app(self.state.clone())
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder
                .header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let response = self
            .app()
            .oneshot(builder.body(Body::from(body)).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        (status, value)
    }

    async fn register(&self, username: &str, email: &str, password: &str) {
        let (status, _) = self
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "username": username,
                    "email": email,
                    "password": password,
                    "firstName": "Test",
                    "lastName": "User"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    /// Extract the token from the last verification mail sent to `email`.
    fn mailed_token(&self, email: &str, template: Template) -> String {
        let (sent_template, params) = self
            .mailer
            .last_for(email)
            .expect("no mail recorded for recipient");
        assert_eq!(sent_template, template);

        let link = params.link.expect("mail carries no link");
        link.split("token=").nth(1).unwrap().to_owned()
    }

    async fn verify(&self, email: &str) {
        let token = self.mailed_token(email, Template::Verification);
        let (status, _) = self
            .request(
                Method::GET,
                &format!("/verify-email?token={token}"),
                None,
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    async fn login(&self, username: &str, password: &str) -> (StatusCode, Value) {
        self.request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"username": username, "password": password})),
        )
        .await
    }
}

#[tokio::test]
async fn scenario_register_verify_login() {
    let server = server();

    server
        .register("alice", "alice@ex.com", "p@ss")
        .await;
    server.verify("alice@ex.com").await;

    let (status, body) = server.login("alice", "p@ss").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["emailVerified"], true);
    assert_eq!(body["twoFactorPassed"], false);
    assert!(body["token"].as_str().is_some());
}

#[tokio::test]
async fn scenario_login_before_verify() {
    let server = server();

    server
        .register("alice", "alice@ex.com", "p@ss")
        .await;

    let (status, body) = server.login("alice", "p@ss").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Email is not verified");
}

#[tokio::test]
async fn scenario_reset_password() {
    let server = server();
    server.register("alice", "alice@ex.com", "p@ss").await;
    server.verify("alice@ex.com").await;

    let (status, _) = server
        .request(
            Method::POST,
            "/api/auth/forgot-password",
            None,
            Some(json!({"email": "alice@ex.com"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let token = server.mailed_token("alice@ex.com", Template::PasswordReset);
    let (status, _) = server
        .request(
            Method::POST,
            "/api/reset-password",
            None,
            Some(json!({"token": token, "newPassword": "newPw1"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server.login("alice", "newPw1").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server.login("alice", "p@ss").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scenario_two_factor_flow() {
    let server = server();
    server.register("alice", "alice@ex.com", "p@ss").await;
    server.verify("alice@ex.com").await;

    let (_, body) = server.login("alice", "p@ss").await;
    let session = body["token"].as_str().unwrap().to_owned();

    let (status, setup) = server
        .request(
            Method::POST,
            "/api/auth/enable-2fa",
            Some(&session),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(setup["secret"].as_str().is_some());
    assert!(
        setup["qrCodeUrl"]
            .as_str()
            .unwrap()
            .starts_with("otpauth://totp/")
    );

    // With the second factor on, login hands back a challenge, no token.
    let (status, body) = server.login("alice", "p@ss").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requiresTwoFactor"], true);
    assert!(body.get("token").is_none());
    let user_id = body["userId"].as_i64().unwrap();

    let (_, params) = server.mailer.last_for("alice@ex.com").unwrap();
    let code = params.code.unwrap();

    let (status, _) = server
        .request(
            Method::POST,
            "/api/auth/verify-2fa",
            None,
            Some(json!({"userId": user_id, "code": "999999"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .request(
            Method::POST,
            "/api/auth/verify-2fa",
            None,
            Some(json!({"userId": user_id, "code": code})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["twoFactorPassed"], true);
    assert!(body["token"].as_str().is_some());
}

#[tokio::test]
async fn scenario_admin_cannot_self_delete() {
    let server = server();

    let admin = server
        .accounts
        .save(gatehouse::user::Account {
            username: "admin".into(),
            email: "admin@ex.com".into(),
            password_hash: server.state.hasher.hash("adminPw").unwrap(),
            email_verified: true,
            roles: vec![Role::Admin],
            ..Default::default()
        })
        .await
        .unwrap();
    server.register("alice", "alice@ex.com", "p@ss").await;
    let alice = server
        .accounts
        .find_by_username("alice")
        .await
        .unwrap()
        .unwrap();

    let token = server.state.tokens.issue(&admin).unwrap();

    let (status, _) = server
        .request(
            Method::DELETE,
            &format!("/api/admin/users/{}", admin.id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .request(
            Method::DELETE,
            &format!("/api/admin/users/{}", alice.id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (template, _) = server.mailer.last_for("alice@ex.com").unwrap();
    assert_eq!(template, Template::AccountDeletion);
}

#[tokio::test]
async fn scenario_authorization_matrix() {
    let server = server();
    server.register("alice", "alice@ex.com", "p@ss").await;
    server.verify("alice@ex.com").await;
    server.register("bob", "bob@ex.com", "p@ss").await;

    let alice = server
        .accounts
        .find_by_username("alice")
        .await
        .unwrap()
        .unwrap();
    let bob = server
        .accounts
        .find_by_username("bob")
        .await
        .unwrap()
        .unwrap();
    let (_, body) = server.login("alice", "p@ss").await;
    let token = body["token"].as_str().unwrap().to_owned();

    let (status, _) = server
        .request(Method::GET, "/api/admin/users", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server
        .request(
            Method::GET,
            &format!("/api/users/{}", alice.id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server
        .request(
            Method::GET,
            &format!("/api/users/{}", bob.id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
