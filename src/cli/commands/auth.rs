use anyhow::{Context, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command, builder::BoolishValueParser};
use secrecy::SecretString;

use crate::auth::{AuthConfig, LoginMode, SecretScheme, SessionBinding};

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl-seconds";
pub const ARG_SESSION_IDLE_TIMEOUT: &str = "session-idle-timeout-seconds";
pub const ARG_OTP_TTL: &str = "otp-ttl-seconds";
pub const ARG_OTP_VERIFIED_TTL: &str = "otp-verified-ttl-seconds";
pub const ARG_OTP_SWEEP_INTERVAL: &str = "otp-sweep-interval-seconds";
pub const ARG_LOGIN_MODE: &str = "login-mode";
pub const ARG_SESSION_BINDING: &str = "session-binding";
pub const ARG_ROTATE_REFRESH_TOKENS: &str = "rotate-refresh-tokens";
pub const ARG_SECRET_SCHEME: &str = "secret-scheme";
pub const ARG_ALLOWED_ORIGINS: &str = "allowed-origins";

#[derive(Debug)]
pub struct Options {
    pub config: AuthConfig,
    pub signing_secret: SecretString,
    pub allowed_origins: Vec<String>,
}

impl Options {
    /// Parse auth arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or a mode is unknown.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("missing required argument: --{id}"))
        };
        let seconds = |id: &str| -> anyhow::Result<u64> {
            matches
                .get_one::<u64>(id)
                .copied()
                .with_context(|| format!("missing required argument: --{id}"))
        };

        let login_mode = read_required(ARG_LOGIN_MODE)?
            .parse::<LoginMode>()
            .map_err(|e| anyhow!("--{ARG_LOGIN_MODE}: {e}"))?;
        let session_binding = read_required(ARG_SESSION_BINDING)?
            .parse::<SessionBinding>()
            .map_err(|e| anyhow!("--{ARG_SESSION_BINDING}: {e}"))?;
        let secret_scheme = read_required(ARG_SECRET_SCHEME)?
            .parse::<SecretScheme>()
            .map_err(|e| anyhow!("--{ARG_SECRET_SCHEME}: {e}"))?;

        let config = AuthConfig::new()
            .with_access_token_ttl_seconds(seconds(ARG_ACCESS_TOKEN_TTL)?)
            .with_refresh_token_ttl_seconds(seconds(ARG_REFRESH_TOKEN_TTL)?)
            .with_session_idle_timeout_seconds(seconds(ARG_SESSION_IDLE_TIMEOUT)?)
            .with_otp_ttl_seconds(seconds(ARG_OTP_TTL)?)
            .with_otp_verified_ttl_seconds(seconds(ARG_OTP_VERIFIED_TTL)?)
            .with_otp_sweep_interval_seconds(seconds(ARG_OTP_SWEEP_INTERVAL)?)
            .with_login_mode(login_mode)
            .with_session_binding(session_binding)
            .with_rotate_refresh_tokens(matches.get_flag(ARG_ROTATE_REFRESH_TOKENS))
            .with_secret_scheme(secret_scheme);

        let allowed_origins = matches
            .get_many::<String>(ARG_ALLOWED_ORIGINS)
            .map(|values| {
                values
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            config,
            signing_secret: SecretString::from(read_required(ARG_JWT_SECRET)?),
            allowed_origins,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_otp_args(command);
    with_mode_args(command)
}

fn seconds_arg(id: &'static str, env: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(u64).range(1..))
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("Shared secret used to sign and verify tokens (HS256)")
                .env("WARDEN_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(seconds_arg(
            ARG_ACCESS_TOKEN_TTL,
            "WARDEN_ACCESS_TOKEN_TTL_SECONDS",
            "3600",
            "Access token lifetime in seconds",
        ))
        .arg(seconds_arg(
            ARG_REFRESH_TOKEN_TTL,
            "WARDEN_REFRESH_TOKEN_TTL_SECONDS",
            "1296000",
            "Refresh token and session lifetime in seconds",
        ))
        .arg(seconds_arg(
            ARG_SESSION_IDLE_TIMEOUT,
            "WARDEN_SESSION_IDLE_TIMEOUT_SECONDS",
            "7200",
            "Session idle timeout in seconds",
        ))
}

fn with_otp_args(command: Command) -> Command {
    command
        .arg(seconds_arg(
            ARG_OTP_TTL,
            "WARDEN_OTP_TTL_SECONDS",
            "120",
            "One-time code lifetime in seconds",
        ))
        .arg(seconds_arg(
            ARG_OTP_VERIFIED_TTL,
            "WARDEN_OTP_VERIFIED_TTL_SECONDS",
            "300",
            "How long a confirmed code admits token issuance, in seconds",
        ))
        .arg(seconds_arg(
            ARG_OTP_SWEEP_INTERVAL,
            "WARDEN_OTP_SWEEP_INTERVAL_SECONDS",
            "60",
            "Interval between sweeps of expired codes, in seconds",
        ))
}

fn with_mode_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOGIN_MODE)
                .long(ARG_LOGIN_MODE)
                .help("Login flow: otp (password then one-time code) or direct")
                .env("WARDEN_LOGIN_MODE")
                .default_value("otp")
                .value_parser(["otp", "direct"]),
        )
        .arg(
            Arg::new(ARG_SESSION_BINDING)
                .long(ARG_SESSION_BINDING)
                .help("bound: access tokens require a live session; stateless: signature and expiry only")
                .env("WARDEN_SESSION_BINDING")
                .default_value("bound")
                .value_parser(["bound", "stateless"]),
        )
        .arg(
            Arg::new(ARG_ROTATE_REFRESH_TOKENS)
                .long(ARG_ROTATE_REFRESH_TOKENS)
                .help("Issue a new refresh token on every refresh")
                .env("WARDEN_ROTATE_REFRESH_TOKENS")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_SECRET_SCHEME)
                .long(ARG_SECRET_SCHEME)
                .help("How stored passwords are compared: plain or argon2")
                .env("WARDEN_SECRET_SCHEME")
                .default_value("plain")
                .value_parser(["plain", "argon2"]),
        )
        .arg(
            Arg::new(ARG_ALLOWED_ORIGINS)
                .long(ARG_ALLOWED_ORIGINS)
                .help("Comma separated CORS origins (default: any)")
                .env("WARDEN_ALLOWED_ORIGINS")
                .value_delimiter(','),
        )
}
