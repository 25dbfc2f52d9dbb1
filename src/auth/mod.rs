//! Operator authentication: credentials, one-time codes, tokens and sessions.

pub mod clock;
pub mod config;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod kv;
pub mod otp;
pub mod resolver;
pub mod service;
pub mod session;
pub mod token;

pub use config::{AuthConfig, LoginMode, SessionBinding};
pub use credentials::{Principal, PrincipalContext, Role, SecretScheme, require_role};
pub use error::AuthError;
pub use service::{AuthDeps, AuthService, LoginOutcome, RefreshedTokens, TokenPair};
pub use session::SessionContext;
