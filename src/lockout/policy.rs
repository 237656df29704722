//! Limiter policy shared by every key.

use std::time::{Duration, Instant};

use crate::error::{Result, TurnstileError};

/// Failure threshold, sliding window and lockout length.
///
/// A `Policy` can only be built through [`Policy::new`], so every instance
/// holds strictly positive values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    max_attempts: usize,
    window: Duration,
    lockout_duration: Duration,
}

impl Policy {
    /// Create a validated policy.
    ///
    /// Fails with [`TurnstileError::InvalidConfiguration`] if any field is zero,
    /// or if the lockout is too long to be added to the current instant.
    pub fn new(max_attempts: usize, window: Duration, lockout_duration: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(TurnstileError::InvalidConfiguration(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(TurnstileError::InvalidConfiguration(
                "window must be greater than zero".to_string(),
            ));
        }
        if lockout_duration.is_zero() {
            return Err(TurnstileError::InvalidConfiguration(
                "lockout_duration must be greater than zero".to_string(),
            ));
        }
        if Instant::now().checked_add(lockout_duration).is_none() {
            return Err(TurnstileError::InvalidConfiguration(format!(
                "lockout_duration of {}s is too large",
                lockout_duration.as_secs()
            )));
        }

        Ok(Self {
            max_attempts,
            window,
            lockout_duration,
        })
    }

    /// Failures allowed within the window before lockout.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Sliding lookback horizon for counting failures.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// How long a key stays locked once tripped.
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }
}
