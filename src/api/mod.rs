use crate::auth::{
    AuthConfig, AuthDeps, AuthService,
    clock::SystemClock,
    directory::PgUserDirectory,
    kv::MemoryStore,
    otp::LogNotifier,
    session::PgSessionRepository,
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::options,
};
use secrecy::SecretString;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

pub(crate) mod handlers;
mod openapi;

pub use handlers::auth::types;
pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    pub auth: AuthConfig,
    pub signing_secret: SecretString,
    pub allowed_origins: Vec<String>,
}

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Connect to Postgres, build the auth service and serve until Ctrl-C.
///
/// # Errors
/// Returns an error if the database is unreachable, the auth configuration is
/// rejected, or the listener cannot bind.
pub async fn new(server: ServerConfig) -> Result<()> {
    let pool = connect(&server.dsn).await?;
    let deps = AuthDeps {
        directory: Arc::new(PgUserDirectory::new(pool.clone())),
        sessions: Arc::new(PgSessionRepository::new(pool)),
        challenges: Arc::new(MemoryStore::new()),
        verified: Arc::new(MemoryStore::new()),
        notifier: Arc::new(LogNotifier),
        clock: Arc::new(SystemClock),
    };
    let service = Arc::new(
        AuthService::new(server.auth, &server.signing_secret, deps)
            .context("Failed to initialize auth service")?,
    );

    let sweepers = service.spawn_sweeper();
    let app = app(service, cors_layer(&server.allowed_origins)?);

    let listener = TcpListener::bind(format!("::0:{}", server.port)).await?;
    info!("Listening on [::]:{}", server.port);

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    for sweeper in sweepers {
        sweeper.abort();
    }

    Ok(served?)
}

async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(120))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Routes plus the request-id, tracing and CORS layers, wired to `service`.
pub fn app(service: Arc<AuthService>, cors: CorsLayer) -> Router {
    let (router, _openapi) = router().split_for_parts();
    router
        .route("/health", options(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    REQUEST_ID,
                    |_req: &_| HeaderValue::from_str(&Ulid::new().to_string()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(REQUEST_ID))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(service)),
        )
}

/// CORS for the browser console. No origins configured means any origin.
///
/// # Errors
/// Returns an error if an origin is not a valid header value.
pub fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let origins = allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin.trim_end_matches('/'))
                    .with_context(|| format!("Invalid allowed origin: {origin}"))
            })
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(origin))
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(&REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_accepts_listed_origins() {
        let origins = vec![
            "https://console.warden.dev/".to_string(),
            "http://localhost:5173".to_string(),
        ];
        assert!(cors_layer(&origins).is_ok());
        assert!(cors_layer(&[]).is_ok());
    }

    #[test]
    fn cors_rejects_invalid_origin() {
        let origins = vec!["https://bad\norigin".to_string()];
        assert!(cors_layer(&origins).is_err());
    }
}
