//! End-to-end HTTP scenarios against the router with in-memory stores.

use anyhow::{Context, Result, anyhow};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use chrono::{TimeDelta, Utc};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tower::ServiceExt;
use warden::{
    api,
    auth::{
        AuthConfig, AuthDeps, AuthService, LoginMode,
        clock::ManualClock,
        credentials::DirectoryRecord,
        directory::MemoryUserDirectory,
        kv::MemoryStore,
        otp::Notifier,
        session::MemorySessionRepository,
    },
};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn last_code_for(&self, destination: &str) -> Option<String> {
        let sent = self.sent.lock().ok()?;
        sent.iter()
            .rev()
            .find(|(to, _)| to == destination)
            .and_then(|(_, message)| {
                message
                    .split_whitespace()
                    .find(|w| w.len() == 6 && w.chars().all(|c| c.is_ascii_digit()))
                    .map(str::to_string)
            })
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, destination: &str, message: &str) -> bool {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((destination.to_string(), message.to_string()));
        }
        true
    }
}

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    directory: Arc<MemoryUserDirectory>,
}

fn record(id: &str, username: &str, role: &str, contact: &str) -> DirectoryRecord {
    DirectoryRecord {
        id: id.to_string(),
        username: username.to_string(),
        display_name: username.to_string(),
        secret: "correct horse".to_string(),
        role: role.to_string(),
        status: "Active".to_string(),
        contact: Some(contact.to_string()),
    }
}

fn test_app(config: AuthConfig) -> Result<TestApp> {
    let directory = Arc::new(MemoryUserDirectory::new());
    directory.insert(record("u-root", "root", "super_admin", "root@warden.dev"));
    directory.insert(record("u-ops", "ops", "admin", "ops@warden.dev"));

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let notifier = Arc::new(RecordingNotifier::default());
    let service = AuthService::new(
        config,
        &SecretString::from("integration-secret".to_string()),
        AuthDeps {
            directory: directory.clone(),
            sessions: Arc::new(MemorySessionRepository::new()),
            challenges: Arc::new(MemoryStore::new()),
            verified: Arc::new(MemoryStore::new()),
            notifier: notifier.clone(),
            clock: clock.clone(),
        },
    )?;

    Ok(TestApp {
        router: api::app(Arc::new(service), api::cors_layer(&[])?),
        clock,
        notifier,
        directory,
    })
}

impl TestApp {
    async fn post(&self, uri: &str, body: Value) -> Result<Response> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, "warden-tests")
            .body(Body::from(body.to_string()))?;
        Ok(self.router.clone().oneshot(request).await?)
    }

    async fn get(&self, uri: &str, bearer: Option<&str>) -> Result<Response> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        Ok(self.router.clone().oneshot(builder.body(Body::empty())?).await?)
    }

    async fn wait_for_code(&self, destination: &str) -> Result<String> {
        for _ in 0..200 {
            if let Some(code) = self.notifier.last_code_for(destination) {
                return Ok(code);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Err(anyhow!("no code delivered to {destination}"))
    }

    /// Password, code and token exchange. Returns the token pair body.
    async fn sign_in(&self, username: &str, contact: &str) -> Result<Value> {
        let response = self
            .post(
                "/v1/auth/login",
                json!({"username": username, "password": "correct horse"}),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let code = self.wait_for_code(contact).await?;
        let response = self
            .post(
                "/v1/auth/otp/verify",
                json!({"username": username, "otp": code}),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let response = self
            .post("/v1/auth/token", json!({"username": username}))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }
}

async fn body_json(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn error_code(response: Response) -> Result<String> {
    let body = body_json(response).await?;
    body["error"]
        .as_str()
        .map(str::to_string)
        .context("missing error code")
}

fn field<'a>(body: &'a Value, name: &str) -> Result<&'a str> {
    body[name]
        .as_str()
        .with_context(|| format!("missing field {name}"))
}

#[tokio::test]
async fn operator_signs_in_refreshes_and_logs_out() -> Result<()> {
    let app = test_app(AuthConfig::new())?;

    let pair = app.sign_in("root", "root@warden.dev").await?;
    assert_eq!(pair["token_type"], "Bearer");
    assert_eq!(pair["role"], "super_admin");
    assert_eq!(pair["username"], "root");
    assert_eq!(pair["expires_in"], 3600);
    let access = field(&pair, "access_token")?.to_string();
    let refresh = field(&pair, "refresh_token")?.to_string();

    let response = app.get("/v1/auth/me", Some(&access)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let me = body_json(response).await?;
    assert_eq!(me["id"], "u-root");
    assert_eq!(me["role"], "super_admin");

    let response = app.get("/v1/auth/admin", Some(&access)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post("/v1/auth/refresh", json!({"refresh_token": refresh}))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let refreshed = body_json(response).await?;
    assert!(refreshed["access_token"].is_string());
    assert!(refreshed.get("refresh_token").is_none());

    let response = app
        .post("/v1/auth/logout", json!({"refresh_token": refresh}))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .post("/v1/auth/refresh", json!({"refresh_token": refresh}))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await?, "SESSION_NOT_FOUND");

    let response = app.get("/v1/auth/me", Some(&access)).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await?, "SESSION_EXPIRED");
    Ok(())
}

#[tokio::test]
async fn bad_credentials_look_identical() -> Result<()> {
    let app = test_app(AuthConfig::new())?;

    let wrong_password = app
        .post(
            "/v1/auth/login",
            json!({"username": "root", "password": "nope"}),
        )
        .await?;
    let unknown_user = app
        .post(
            "/v1/auth/login",
            json!({"username": "ghost", "password": "nope"}),
        )
        .await?;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(wrong_password).await?,
        body_json(unknown_user).await?
    );

    app.directory.set_status("ops", "Suspended");
    let inactive = app
        .post(
            "/v1/auth/login",
            json!({"username": "ops", "password": "correct horse"}),
        )
        .await?;
    assert_eq!(error_code(inactive).await?, "INVALID_CREDENTIALS");
    Ok(())
}

#[tokio::test]
async fn tokens_require_a_confirmed_code() -> Result<()> {
    let app = test_app(AuthConfig::new())?;

    let response = app
        .post(
            "/v1/auth/login",
            json!({"username": "root", "password": "correct horse"}),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post("/v1/auth/token", json!({"username": "root"}))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await?, "OTP_NOT_VERIFIED");

    let code = app.wait_for_code("root@warden.dev").await?;
    let wrong = if code == "123456" { "654321" } else { "123456" };
    let response = app
        .post(
            "/v1/auth/otp/verify",
            json!({"username": "root", "otp": wrong}),
        )
        .await?;
    assert_eq!(error_code(response).await?, "CHALLENGE_MISMATCH");

    // The pending code survives a mismatch.
    let response = app
        .post("/v1/auth/otp/verify", json!({"username": "root", "otp": code}))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post("/v1/auth/otp/verify", json!({"username": "root", "otp": code}))
        .await?;
    assert_eq!(error_code(response).await?, "CHALLENGE_NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn admin_endpoint_requires_super_admin() -> Result<()> {
    let app = test_app(AuthConfig::new())?;
    let pair = app.sign_in("ops", "ops@warden.dev").await?;
    let access = field(&pair, "access_token")?;

    let response = app.get("/v1/auth/admin", Some(access)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await?, "UNAUTHORIZED");

    let response = app.get("/v1/auth/me", Some(access)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn idle_session_rejects_live_access_token() -> Result<()> {
    let app = test_app(AuthConfig::new().with_session_idle_timeout_seconds(600))?;
    let pair = app.sign_in("root", "root@warden.dev").await?;
    let access = field(&pair, "access_token")?;

    app.clock.advance(TimeDelta::minutes(8));
    let response = app.get("/v1/auth/me", Some(access)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.clock.advance(TimeDelta::minutes(11));
    let response = app.get("/v1/auth/me", Some(access)).await?;
    assert_eq!(error_code(response).await?, "SESSION_EXPIRED");

    let response = app
        .post(
            "/v1/auth/refresh",
            json!({"refresh_token": field(&pair, "refresh_token")?}),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn expired_access_token_is_reported() -> Result<()> {
    let app = test_app(AuthConfig::new())?;
    let pair = app.sign_in("root", "root@warden.dev").await?;

    app.clock.advance(TimeDelta::minutes(61));
    let response = app
        .get("/v1/auth/me", Some(field(&pair, "access_token")?))
        .await?;
    assert_eq!(error_code(response).await?, "EXPIRED_TOKEN");

    let response = app.get("/v1/auth/me", None).await?;
    assert_eq!(error_code(response).await?, "INVALID_TOKEN");
    Ok(())
}

#[tokio::test]
async fn direct_mode_returns_tokens_from_login() -> Result<()> {
    let app = test_app(AuthConfig::new().with_login_mode(LoginMode::Direct))?;
    let response = app
        .post(
            "/v1/auth/login",
            json!({"username": "ROOT", "password": "correct horse"}),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["username"], "root");
    assert!(body["refresh_token"].is_string());
    Ok(())
}

#[tokio::test]
async fn malformed_requests_are_rejected() -> Result<()> {
    let app = test_app(AuthConfig::new())?;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/auth/login")
        .body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post("/v1/auth/login", json!({"username": " ", "password": "x"}))
        .await?;
    assert_eq!(error_code(response).await?, "INVALID_REQUEST");

    let response = app
        .post("/v1/auth/logout", json!({"refresh_token": "not-a-jwt"}))
        .await?;
    assert_eq!(error_code(response).await?, "INVALID_TOKEN");
    Ok(())
}

#[tokio::test]
async fn health_reports_version_and_request_id() -> Result<()> {
    let app = test_app(AuthConfig::new())?;

    let response = app.get("/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    assert!(response.headers().contains_key("x-request-id"));

    let body = body_json(response).await?;
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(body["sessions"], "ok");
    Ok(())
}
