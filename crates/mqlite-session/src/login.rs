//! Host-supplied login status and the retry backoff used to reopen a session.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Current login as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStatus {
    /// Credential passed to CONNECT as the password.
    pub jwt: String,
    pub user_id: Option<String>,
}

/// Why the host could not produce a login status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    /// The user is logged out; retrying will not help.
    #[error("Unauthorized")]
    Unauthorized,

    /// Backend unreachable or failing; worth retrying later.
    #[error("Login status unavailable: {0}")]
    Unavailable(String),
}

/// Source of login status, implemented by the host application.
#[async_trait]
pub trait LoginProvider: Send + Sync {
    async fn status(&self) -> Result<LoginStatus, LoginError>;
}

/// Doubling retry delay: starts at `initial`, doubles while it is at most half
/// of `max`, then stays at its last value.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl RetryBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; advances the backoff for the next failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        if self.current <= self.max / 2 {
            self.current *= 2;
        }
        delay
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
