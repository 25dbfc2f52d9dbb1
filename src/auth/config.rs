//! Runtime configuration for the authentication core.

use std::{str::FromStr, time::Duration};

use super::credentials::SecretScheme;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: u64 = 15 * 24 * 60 * 60;
const DEFAULT_SESSION_IDLE_TIMEOUT_SECONDS: u64 = 120 * 60;
const DEFAULT_OTP_TTL_SECONDS: u64 = 120;
const DEFAULT_OTP_RETENTION_SECONDS: u64 = 120;
const DEFAULT_OTP_VERIFIED_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_OTP_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// What `request-login` does after the password check succeeds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoginMode {
    /// Send a one-time code and wait for it to be confirmed.
    #[default]
    Otp,
    /// Skip the second factor and return a token pair immediately.
    Direct,
}

/// Whether access tokens are checked against their live session on every request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionBinding {
    #[default]
    Bound,
    Stateless,
}

impl FromStr for LoginMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "otp" => Ok(Self::Otp),
            "direct" => Ok(Self::Direct),
            other => Err(format!("unknown login mode: {other}")),
        }
    }
}

impl FromStr for SessionBinding {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bound" => Ok(Self::Bound),
            "stateless" => Ok(Self::Stateless),
            other => Err(format!("unknown session binding: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    access_token_ttl_seconds: u64,
    refresh_token_ttl_seconds: u64,
    session_idle_timeout_seconds: u64,
    otp_ttl_seconds: u64,
    otp_retention_seconds: u64,
    otp_verified_ttl_seconds: u64,
    otp_sweep_interval_seconds: u64,
    login_mode: LoginMode,
    session_binding: SessionBinding,
    rotate_refresh_tokens: bool,
    secret_scheme: SecretScheme,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            session_idle_timeout_seconds: DEFAULT_SESSION_IDLE_TIMEOUT_SECONDS,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            otp_retention_seconds: DEFAULT_OTP_RETENTION_SECONDS,
            otp_verified_ttl_seconds: DEFAULT_OTP_VERIFIED_TTL_SECONDS,
            otp_sweep_interval_seconds: DEFAULT_OTP_SWEEP_INTERVAL_SECONDS,
            login_mode: LoginMode::default(),
            session_binding: SessionBinding::default(),
            rotate_refresh_tokens: false,
            secret_scheme: SecretScheme::default(),
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_idle_timeout_seconds(mut self, seconds: u64) -> Self {
        self.session_idle_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: u64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_verified_ttl_seconds(mut self, seconds: u64) -> Self {
        self.otp_verified_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.otp_sweep_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_login_mode(mut self, mode: LoginMode) -> Self {
        self.login_mode = mode;
        self
    }

    #[must_use]
    pub fn with_session_binding(mut self, binding: SessionBinding) -> Self {
        self.session_binding = binding;
        self
    }

    #[must_use]
    pub fn with_rotate_refresh_tokens(mut self, rotate: bool) -> Self {
        self.rotate_refresh_tokens = rotate;
        self
    }

    #[must_use]
    pub fn with_secret_scheme(mut self, scheme: SecretScheme) -> Self {
        self.secret_scheme = scheme;
        self
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_seconds)
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_seconds)
    }

    /// Absolute session lifetime; sessions never outlive their refresh token.
    #[must_use]
    pub fn session_absolute_ttl(&self) -> Duration {
        self.refresh_token_ttl()
    }

    #[must_use]
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_seconds)
    }

    #[must_use]
    pub fn otp_ttl(&self) -> Duration {
        Duration::from_secs(self.otp_ttl_seconds)
    }

    /// How long an expired challenge stays readable so verify can report `Expired`.
    #[must_use]
    pub fn otp_retention(&self) -> Duration {
        Duration::from_secs(self.otp_retention_seconds)
    }

    #[must_use]
    pub fn otp_verified_ttl(&self) -> Duration {
        Duration::from_secs(self.otp_verified_ttl_seconds)
    }

    #[must_use]
    pub fn otp_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.otp_sweep_interval_seconds)
    }

    #[must_use]
    pub fn login_mode(&self) -> LoginMode {
        self.login_mode
    }

    #[must_use]
    pub fn session_binding(&self) -> SessionBinding {
        self.session_binding
    }

    #[must_use]
    pub fn rotate_refresh_tokens(&self) -> bool {
        self.rotate_refresh_tokens
    }

    #[must_use]
    pub fn secret_scheme(&self) -> SecretScheme {
        self.secret_scheme
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operator_policy() {
        let config = AuthConfig::new();
        assert_eq!(config.access_token_ttl(), Duration::from_secs(3600));
        assert_eq!(config.refresh_token_ttl(), Duration::from_secs(1_296_000));
        assert_eq!(config.session_absolute_ttl(), config.refresh_token_ttl());
        assert_eq!(config.session_idle_timeout(), Duration::from_secs(7200));
        assert_eq!(config.otp_ttl(), Duration::from_secs(120));
        assert_eq!(config.otp_verified_ttl(), Duration::from_secs(300));
        assert_eq!(config.login_mode(), LoginMode::Otp);
        assert_eq!(config.session_binding(), SessionBinding::Bound);
        assert!(!config.rotate_refresh_tokens());
    }

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!("OTP".parse::<LoginMode>(), Ok(LoginMode::Otp));
        assert_eq!(" direct ".parse::<LoginMode>(), Ok(LoginMode::Direct));
        assert_eq!("Stateless".parse::<SessionBinding>(), Ok(SessionBinding::Stateless));
        assert!("sometimes".parse::<SessionBinding>().is_err());
    }
}
