//! Operator authentication and session lifecycle.
//!
//! Flow Overview: a password check admits an operator to a one-time code
//! challenge, a verified challenge admits them to a token pair, and every
//! token pair is tracked by a revocable session row with an idle timeout.
//!
//! - [`auth`] holds the HTTP-independent core.
//! - [`api`] exposes it over axum.
//! - [`cli`] parses configuration and starts the server.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
