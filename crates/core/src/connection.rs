//! Connection lifecycle shared by the remote cache and the event broker.
//!
//! Both clients move through the same four states:
//!
//! ```text
//! Disconnected ──> Connecting ──> Connected
//!      │  ^             │             │
//!      │  └─────────────┘ (failed)    │ (runtime failure, cache only)
//!      │                │             v
//!      └────────────────┴────────> Degraded   (terminal)
//! ```
//!
//! The cache manager ends in `Degraded` when the remote store cannot be used
//! and serves everything from the local store from then on. The event bus
//! never degrades: a failed connect goes back to `Disconnected` and the error
//! is returned to the caller.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current state of a remote connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    /// The remote is abandoned for the rest of the session.
    Degraded = 3,
}

impl ConnectionState {
    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Disconnected, Degraded)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Degraded)
                | (Connected, Disconnected)
                | (Connected, Degraded)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        }
    }
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Degraded,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Invalid connection transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Lock-free holder of a [`ConnectionState`] that only accepts valid transitions.
#[derive(Debug)]
pub struct ConnectionStateCell {
    state: AtomicU8,
}

impl ConnectionStateCell {
    pub fn new(initial: ConnectionState) -> Self {
        Self {
            state: AtomicU8::new(initial as u8),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    /// Moves to `to` from whatever the current state is.
    ///
    /// Returns the previous state on success.
    pub fn transition(
        &self,
        to: ConnectionState,
    ) -> std::result::Result<ConnectionState, TransitionError> {
        let mut current = self.get();
        loop {
            if !current.can_transition_to(to) {
                return Err(TransitionError { from: current, to });
            }
            match self.state.compare_exchange(
                current as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = ConnectionState::from(actual),
            }
        }
    }

    /// Moves to `to` only if the current state is exactly `from`.
    ///
    /// Returns false when another caller changed the state first.
    pub fn transition_from(&self, from: ConnectionState, to: ConnectionState) -> bool {
        if !from.can_transition_to(to) {
            return false;
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enters `Degraded` from any state.
    ///
    /// Returns true if this call performed the transition, false if the cell
    /// was already degraded.
    pub fn degrade(&self) -> bool {
        self.transition(ConnectionState::Degraded).is_ok()
    }
}

impl Default for ConnectionStateCell {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}

/// How a failed remote operation is retried.
///
/// Attempt `n` (0-based) that fails is followed by a pause of
/// `initial_backoff * multiplier^n`, capped at `max_backoff`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Upper bound on a single attempt. `None` waits indefinitely.
    pub attempt_timeout: Option<Duration>,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Policy for establishing the remote cache connection at startup:
    /// three attempts of at most five seconds each, no pause in between.
    pub fn connection_setup() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Some(Duration::from_secs(5)),
            initial_backoff: Duration::ZERO,
            multiplier: 1,
            max_backoff: Duration::ZERO,
        }
    }

    /// Policy for publishing to the broker: up to eight retries starting at
    /// 100ms and doubling.
    pub fn publish() -> Self {
        Self {
            max_attempts: 9,
            attempt_timeout: None,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2,
            max_backoff: Duration::from_secs(30),
        }
    }

    /// Sets the number of retries after the first attempt.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_attempts = retries.saturating_add(1);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Pause after the failed attempt with 0-based index `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff.max(self.initial_backoff))
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if self.attempt_timeout == Some(Duration::ZERO) {
            return Err("attempt_timeout must be greater than 0".to_string());
        }
        if self.multiplier == 0 {
            return Err("multiplier must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Runs `operation` until it succeeds or the attempts run out.
    ///
    /// Each attempt is bounded by `attempt_timeout`. `on_failure` is called
    /// with the 1-based attempt number after every failed attempt, before the
    /// backoff pause.
    pub async fn run<T, E, F, Fut, L>(
        &self,
        mut operation: F,
        mut on_failure: L,
    ) -> std::result::Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        L: FnMut(u32, &AttemptError<E>),
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let outcome = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result.map_err(AttemptError::Failed),
                    Err(_) => Err(AttemptError::TimedOut(limit)),
                },
                None => operation().await.map_err(AttemptError::Failed),
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            on_failure(attempt + 1, &error);
            attempt += 1;

            if attempt >= attempts {
                return Err(RetryExhausted {
                    attempts,
                    last: error,
                });
            }

            let pause = self.backoff_for(attempt - 1);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::connection_setup()
    }
}

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError<E> {
    Failed(E),
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Failed(error) => write!(f, "{}", error),
            AttemptError::TimedOut(limit) => write!(f, "timed out after {:?}", limit),
        }
    }
}

/// Every attempt allowed by a [`RetryPolicy`] failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last: AttemptError<E>,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.last)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryExhausted<E> {}
