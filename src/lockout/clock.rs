//! Time sources for the limiter.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Supplies the current instant.
///
/// Implementations must be monotonically non-decreasing from the caller's
/// point of view.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Production clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Time is tracked as an offset from an anchor captured at construction,
/// so instants handed out compare and subtract like real ones.
#[derive(Debug)]
pub struct ManualClock {
    anchor: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at its anchor instant.
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset += by;
    }

    /// Jump to `offset` past the anchor. Going backwards is ignored.
    pub fn set(&self, offset: Duration) {
        let mut current = self.offset.lock();
        if offset > *current {
            *current = offset;
        }
    }

    /// Time elapsed since the anchor.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.anchor + *self.offset.lock()
    }
}
