//! Auth handlers.
//!
//! Login is two steps by default: `POST /v1/auth/login` checks the password
//! and sends a one-time code, `POST /v1/auth/otp/verify` confirms it, and
//! `POST /v1/auth/token` exchanges the confirmation for a token pair. Each
//! pair is backed by a session that `refresh` and `logout` act on.

pub(crate) mod login;
pub(crate) mod principal;
pub(crate) mod session;
pub mod types;
