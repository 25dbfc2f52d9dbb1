//! API handlers and shared request helpers.

pub mod auth;
pub mod health;

use axum::http::{
    HeaderMap,
    header::{AUTHORIZATION, USER_AGENT},
};

use crate::auth::SessionContext;

/// Upper bound in bytes.
const MAX_DEVICE_LEN: usize = 256;

/// Read `Authorization: Bearer <token>`.
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Session context for a new login, tagged with the client's user agent.
pub(crate) fn session_context(headers: &HeaderMap) -> SessionContext {
    let device = headers.get(USER_AGENT).and_then(|value| {
        let agent = String::from_utf8_lossy(value.as_bytes());
        let agent = truncate_at_char_boundary(agent.trim(), MAX_DEVICE_LEN);
        (!agent.is_empty()).then(|| agent.to_string())
    });
    SessionContext { device }
}

fn truncate_at_char_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let end = (0..=max_bytes)
        .rev()
        .find(|&index| value.is_char_boundary(index))
        .unwrap_or(0);
    &value[..end]
}
