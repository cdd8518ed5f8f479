//! Retry policy for submissions and proof lookups
//!
//! Bounded exponential backoff, with failures sorted by their error text.
//! Running out of attempts fails the current pass only: the record keeps its
//! state and the next pass starts over.

use std::future::Future;
use std::time::Duration;

use eyre::Result;
use tracing::{debug, warn};

use crate::config::RetrySettings;

/// Backoff schedule for one kind of operation
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Upper bound for any single wait
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Submission retries (`RETRY_ATTEMPTS`, `RETRY_DELAY_MS`)
    pub fn submissions(settings: &RetrySettings) -> Self {
        Self::from_attempts(settings.attempts, settings.delay_ms)
    }

    /// Proof lookup retries (`PROOF_RETRY_ATTEMPTS`, `PROOF_RETRY_DELAY_MS`)
    pub fn proofs(settings: &RetrySettings) -> Self {
        Self::from_attempts(settings.proof_attempts, settings.proof_delay_ms)
    }

    fn from_attempts(attempts: u32, delay_ms: u64) -> Self {
        let initial_backoff = Duration::from_millis(delay_ms);
        Self {
            max_retries: attempts.saturating_sub(1),
            initial_backoff,
            max_backoff: initial_backoff.max(Duration::from_secs(60)),
            backoff_multiplier: 2.0,
        }
    }

    /// Wait before retry number `retry` (0 is the first retry)
    pub fn backoff_for_attempt(&self, retry: u32) -> Duration {
        let grown = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(retry as i32);
        Duration::from_secs_f64(grown.min(self.max_backoff.as_secs_f64()))
    }

    /// Whether retry number `retry` is still allowed
    pub fn should_retry(&self, retry: u32) -> bool {
        retry < self.max_retries
    }

    /// Wait before the next attempt, or None to give up.
    ///
    /// `failed` counts the attempts made so far, all of which failed.
    fn next_wait(&self, failure: Failure, failed: u32) -> Option<Duration> {
        let retry = failed.saturating_sub(1);
        match failure {
            Failure::Permanent | Failure::AlreadyKnown => None,
            _ if !self.should_retry(retry) => None,
            // A gap in the nonce sequence closes once pending transactions land
            Failure::NonceGap => Some(self.max_backoff),
            Failure::Transient | Failure::Unknown => Some(self.backoff_for_attempt(retry)),
        }
    }
}

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// RPC or network trouble
    Transient,
    /// The node already has this transaction (nonce too low)
    AlreadyKnown,
    /// Nonce too high
    NonceGap,
    /// Reverts, bad proofs, funding problems, or a transaction that was
    /// broadcast but not confirmed
    Permanent,
    Unknown,
}

const BROADCAST: &[&str] = &["already broadcast"];

const TRANSIENT: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "rate limit",
    "too many requests",
    "502",
    "503",
    "temporarily unavailable",
    "underpriced",
];

const ALREADY_KNOWN: &[&str] = &["nonce too low", "already known", "already been processed"];

const PERMANENT: &[&str] = &[
    "reverted",
    "insufficient funds",
    "out of gas",
    "invalid signature",
    "invalid parameters",
    "message has already been received",
    "provided message could not be verified",
];

/// Sort an error message into a [`Failure`]
pub fn classify_error(error: &str) -> Failure {
    let text = error.to_lowercase();
    let hit = |patterns: &[&str]| patterns.iter().any(|p| text.contains(p));

    // Checked first: a timeout while waiting for a receipt is not a reason to
    // broadcast again
    if hit(BROADCAST) {
        Failure::Permanent
    } else if hit(TRANSIENT) {
        Failure::Transient
    } else if hit(ALREADY_KNOWN) {
        Failure::AlreadyKnown
    } else if text.contains("nonce too high") {
        Failure::NonceGap
    } else if hit(PERMANENT) {
        Failure::Permanent
    } else {
        Failure::Unknown
    }
}

/// Run `operation` until it succeeds or `config` says to stop.
///
/// The closure gets the 0-based attempt number. On giving up, the last error
/// is returned with `"<what> failed after N attempt(s)"` as context, so
/// typed errors stay reachable through `downcast_ref`.
pub async fn with_retry<F, T, Fut>(config: &RetryConfig, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failed = 0u32;

    loop {
        let err = match operation(failed).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        failed += 1;

        let message = format!("{:#}", err);
        let failure = classify_error(&message);
        match config.next_wait(failure, failed) {
            Some(wait) => {
                warn!(
                    attempt = failed,
                    max = config.max_retries + 1,
                    ?wait,
                    ?failure,
                    error = %message,
                    "{} failed, retrying",
                    what
                );
                tokio::time::sleep(wait).await;
            }
            None => {
                debug!(?failure, attempts = failed, "{} not retried further", what);
                return Err(err.wrap_err(format!("{} failed after {} attempt(s)", what, failed)));
            }
        }
    }
}
