//! One-time code challenges.
//!
//! Flow Overview: `issue` stores a fresh six-digit code under the operator's
//! login identifier, replacing any earlier one, and hands the code to the
//! notifier on a blocking thread without waiting for delivery. `verify` checks
//! the code and, on success, swaps the challenge for a short-lived verified
//! marker. `take_verified` consumes that marker when tokens are issued.
//!
//! Races between a new `issue` and an in-flight `verify` are settled by the
//! compare-and-swap on removal: the verify only succeeds if the exact
//! challenge it read is still the stored one. The marker is written before
//! that swap and withdrawn if it fails, so no marker outlives a re-issue.

use rand::{Rng, rngs::OsRng};
use regex::Regex;
use std::{fmt, sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::{
    config::AuthConfig,
    credentials::{Principal, constant_time_eq, normalize_identifier},
    error::AuthError,
    kv::{self, KeyValueStore, MemoryStore},
};

const CODE_MIN: u32 = 100_000;
const CODE_MAX: u32 = 999_999;

/// Outbound delivery of one-time codes.
pub trait Notifier: Send + Sync {
    /// Best effort. Returns whether the message was handed off.
    fn send(&self, destination: &str, message: &str) -> bool;
}

/// Development notifier that writes messages to the log instead of sending them.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, destination: &str, message: &str) -> bool {
        info!(destination, "otp delivery stub");
        debug!(destination, message, "otp delivery stub payload");
        true
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    pub id: Ulid,
    pub code: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl fmt::Debug for OtpChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpChallenge")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Admission ticket left behind by a successful verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedMarker {
    pub challenge_id: Ulid,
}

pub struct OtpChallengeStore {
    challenges: Arc<dyn KeyValueStore<OtpChallenge>>,
    verified: Arc<dyn KeyValueStore<VerifiedMarker>>,
    notifier: Arc<dyn Notifier>,
    ttl: Duration,
    retention: Duration,
    verified_ttl: Duration,
}

impl OtpChallengeStore {
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        challenges: Arc<dyn KeyValueStore<OtpChallenge>>,
        verified: Arc<dyn KeyValueStore<VerifiedMarker>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            challenges,
            verified,
            notifier,
            ttl: config.otp_ttl(),
            retention: config.otp_retention(),
            verified_ttl: config.otp_verified_ttl(),
        }
    }

    /// Store backed by process-local maps.
    #[must_use]
    pub fn in_memory(config: &AuthConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            notifier,
        )
    }

    /// Create a challenge for `principal`, replacing any pending one.
    ///
    /// # Errors
    /// Returns `Storage` if the challenge cannot be written.
    pub async fn issue(&self, principal: &Principal) -> Result<String, AuthError> {
        let key = normalize_identifier(&principal.username);
        let code = generate_code();
        let now = Instant::now();
        let challenge = OtpChallenge {
            id: Ulid::new(),
            code: code.clone(),
            created_at: now,
            expires_at: now + self.ttl,
        };

        // Kept past expiry so a late verify reports Expired rather than NotFound.
        self.challenges
            .put(&key, challenge, self.ttl + self.retention)
            .await?;
        // A new challenge supersedes any earlier admission.
        self.verified.delete(&key).await?;

        debug!(user_id = %principal.id, "Issued one-time code");
        self.notify(principal, &code);

        Ok(code)
    }

    fn notify(&self, principal: &Principal, code: &str) {
        let notifier = Arc::clone(&self.notifier);
        let destination = principal
            .contact
            .clone()
            .unwrap_or_else(|| principal.username.clone());
        let message = format!(
            "Your verification code for {} access is: {code}\n\nValid for {}.",
            principal.role,
            describe_ttl(self.ttl)
        );
        let user_id = principal.id.clone();

        tokio::task::spawn_blocking(move || {
            if notifier.send(&destination, &message) {
                debug!(%user_id, "One-time code handed to notifier");
            } else {
                warn!(%user_id, "Notifier failed to deliver one-time code");
            }
        });
    }

    /// Check `code` against the pending challenge for `principal_id`.
    ///
    /// # Errors
    /// `ChallengeNotFound`, `ChallengeExpired` or `ChallengeMismatch`; `Storage`
    /// if the backing store fails.
    pub async fn verify(&self, principal_id: &str, code: &str) -> Result<(), AuthError> {
        let key = normalize_identifier(principal_id);
        let Some(challenge) = self.challenges.get(&key).await? else {
            return Err(AuthError::ChallengeNotFound);
        };

        if Instant::now() > challenge.expires_at {
            self.challenges
                .compare_and_swap(&key, &challenge, None)
                .await?;
            debug!(challenge_id = %challenge.id, "One-time code expired");
            return Err(AuthError::ChallengeExpired);
        }

        let code = code.trim();
        if !is_well_formed(code) || !constant_time_eq(code.as_bytes(), challenge.code.as_bytes())
        {
            return Err(AuthError::ChallengeMismatch);
        }

        // The marker goes in before the challenge is released, so an `issue`
        // that follows the swap always finds and clears it.
        let marker = VerifiedMarker {
            challenge_id: challenge.id,
        };
        self.verified
            .put(&key, marker.clone(), self.verified_ttl)
            .await?;

        if !self
            .challenges
            .compare_and_swap(&key, &challenge, None)
            .await?
        {
            // Lost the race against a newer issue.
            self.verified.compare_and_swap(&key, &marker, None).await?;
            return Err(AuthError::ChallengeMismatch);
        }

        Ok(())
    }

    /// Consume the verified marker for `principal_id`.
    ///
    /// # Errors
    /// Returns `Storage` if the backing store fails.
    pub async fn take_verified(&self, principal_id: &str) -> Result<bool, AuthError> {
        let key = normalize_identifier(principal_id);
        Ok(self.verified.delete(&key).await?.is_some())
    }

    /// Start background eviction for both challenges and markers.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration) -> [JoinHandle<()>; 2] {
        [
            kv::spawn_sweeper("otp_challenges", Arc::clone(&self.challenges), interval),
            kv::spawn_sweeper("otp_verified", Arc::clone(&self.verified), interval),
        ]
    }
}

fn generate_code() -> String {
    OsRng.gen_range(CODE_MIN..=CODE_MAX).to_string()
}

fn is_well_formed(code: &str) -> bool {
    Regex::new(r"^\d{6}$").is_ok_and(|regex| regex.is_match(code))
}

fn describe_ttl(ttl: Duration) -> String {
    let secs = ttl.as_secs();
    match secs {
        60 => "1 minute".to_string(),
        s if s % 60 == 0 => format!("{} minutes", s / 60),
        s => format!("{s} seconds"),
    }
}
