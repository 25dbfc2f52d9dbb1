//! Principals, the user directory seam, and password verification.
//!
//! Flow Overview: normalize the identifier, look it up in the directory,
//! compare the presented secret with the configured scheme, then check the
//! account status. Every failure collapses into `InvalidCredentials` so a
//! caller cannot tell an unknown operator from a wrong password.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr, sync::Arc};
use tracing::{debug, warn};
use utoipa::ToSchema;

use super::error::AuthError;

const ACTIVE_STATUS: &str = "active";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    User,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "super_admin" | "superadmin" => Ok(Self::SuperAdmin),
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// An authenticated operator as known to the directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    /// Where one-time codes are delivered, when the directory has an address.
    pub contact: Option<String>,
}

/// What downstream handlers see for an authenticated request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PrincipalContext {
    pub id: String,
    pub username: String,
    pub role: Role,
}

impl From<&Principal> for PrincipalContext {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.id.clone(),
            username: principal.username.clone(),
            role: principal.role,
        }
    }
}

/// Reject every role except `required`.
///
/// # Errors
/// Returns `Unauthorized` when the roles differ.
pub fn require_role(context: &PrincipalContext, required: Role) -> Result<(), AuthError> {
    if context.role == required {
        Ok(())
    } else {
        Err(AuthError::Unauthorized)
    }
}

/// Raw directory row.
#[derive(Clone)]
pub struct DirectoryRecord {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub secret: String,
    pub role: String,
    pub status: String,
    pub contact: Option<String>,
}

impl fmt::Debug for DirectoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryRecord")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("role", &self.role)
            .field("status", &self.status)
            .field("secret", &"[redacted]")
            .finish_non_exhaustive()
    }
}

impl DirectoryRecord {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case(ACTIVE_STATUS)
    }

    /// Convert into a principal, failing when the stored role is unknown.
    ///
    /// # Errors
    /// Returns `InvalidCredentials` for an unrecognised role.
    pub fn to_principal(&self) -> Result<Principal, AuthError> {
        let role = self.role.parse::<Role>().map_err(|err| {
            warn!(user_id = %self.id, "Directory record has unusable role: {err}");
            AuthError::InvalidCredentials
        })?;

        Ok(Principal {
            id: self.id.clone(),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            role,
            contact: self.contact.clone(),
        })
    }
}

/// External operator directory. Read-only from this subsystem.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up by normalized identifier.
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<DirectoryRecord>>;

    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<DirectoryRecord>>;
}

/// How stored secrets are compared with presented ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SecretScheme {
    /// Stored value is the secret itself.
    #[default]
    Plain,
    /// Stored value is an Argon2 PHC string.
    Argon2,
}

impl FromStr for SecretScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "argon2" => Ok(Self::Argon2),
            other => Err(format!("unknown secret scheme: {other}")),
        }
    }
}

impl SecretScheme {
    #[must_use]
    pub fn matches(self, presented: &str, stored: &str) -> bool {
        match self {
            // Digests have equal length, so the comparison does not leak the stored length.
            Self::Plain => constant_time_eq(
                Sha256::digest(presented.as_bytes()).as_slice(),
                Sha256::digest(stored.as_bytes()).as_slice(),
            ),
            Self::Argon2 => match PasswordHash::new(stored) {
                Ok(hash) => Argon2::default()
                    .verify_password(presented.as_bytes(), &hash)
                    .is_ok(),
                Err(err) => {
                    warn!("Stored secret is not a valid PHC string: {err}");
                    false
                }
            },
        }
    }
}

#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[must_use]
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

#[derive(Clone)]
pub struct CredentialVerifier {
    directory: Arc<dyn UserDirectory>,
    scheme: SecretScheme,
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>, scheme: SecretScheme) -> Self {
        Self { directory, scheme }
    }

    /// Check an identifier and secret against the directory.
    ///
    /// # Errors
    /// `InvalidCredentials` for any mismatch, `Storage` if the directory is unreachable.
    pub async fn verify(&self, identifier: &str, secret: &str) -> Result<Principal, AuthError> {
        let username = normalize_identifier(identifier);
        if username.is_empty() || secret.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let Some(record) = self.directory.find_by_username(&username).await? else {
            debug!("Login rejected: unknown identifier");
            return Err(AuthError::InvalidCredentials);
        };

        if !self.scheme.matches(secret, &record.secret) {
            warn!(user_id = %record.id, "Login rejected: secret mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        if !record.is_active() {
            warn!(user_id = %record.id, status = %record.status, "Login rejected: inactive account");
            return Err(AuthError::InvalidCredentials);
        }

        record.to_principal()
    }
}
