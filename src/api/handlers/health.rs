use crate::{GIT_COMMIT_HASH, auth::AuthService};
use axum::{
    extract::Extension,
    http::{HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;

const X_APP: HeaderName = HeaderName::from_static("x-app");

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    Ok,
    Error,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    sessions: StoreStatus,
}

impl Health {
    fn current(sessions: StoreStatus) -> Self {
        Self {
            commit: GIT_COMMIT_HASH.to_string(),
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            sessions,
        }
    }

    /// `name:version:short-commit`
    fn app_header(&self) -> Option<HeaderValue> {
        let commit = self.commit.get(..7).unwrap_or_default();
        HeaderValue::from_str(&format!("{}:{}:{commit}", self.name, self.version))
            .inspect_err(|err| warn!("Unusable X-App header: {err}"))
            .ok()
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Session store is reachable", body = Health),
        (status = 503, description = "Session store is unreachable", body = Health)
    ),
    tag = "health"
)]
pub async fn health(method: Method, service: Extension<Arc<AuthService>>) -> Response {
    let (status, sessions) = match service.ping().await {
        Ok(()) => (StatusCode::OK, StoreStatus::Ok),
        Err(err) => {
            error!("Session store ping failed: {err:?}");
            (StatusCode::SERVICE_UNAVAILABLE, StoreStatus::Error)
        }
    };
    let health = Health::current(sessions);

    let mut response = if method == Method::GET {
        (status, Json(&health)).into_response()
    } else {
        status.into_response()
    };
    if let Some(value) = health.app_header() {
        response.headers_mut().insert(X_APP, value);
    }
    response
}
