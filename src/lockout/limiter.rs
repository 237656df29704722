//! Core attempt limiter implementation.

use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tracing::{info, trace};

use super::clock::{Clock, SystemClock};
use super::entry::EntryStore;
use super::policy::Policy;
use crate::error::{Result, TurnstileError};

/// The decision returned for a single registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    /// Whether the key is locked after this registration
    pub is_locked: bool,
    /// Time until the lock lifts; zero when unlocked
    #[serde(rename = "retry_after_secs", serialize_with = "serialize_secs")]
    pub retry_after: Duration,
    /// Failures currently counted toward the threshold
    pub attempts_in_window: usize,
}

impl Evaluation {
    fn locked(retry_after: Duration, attempts_in_window: usize) -> Self {
        Self {
            is_locked: true,
            retry_after,
            attempts_in_window,
        }
    }

    fn allowed(attempts_in_window: usize) -> Self {
        Self {
            is_locked: false,
            retry_after: Duration::ZERO,
            attempts_in_window,
        }
    }
}

/// `now + lockout`, clamped to the latest instant the platform can represent.
fn lockout_deadline(now: Instant, lockout: Duration) -> Instant {
    let mut until = now;
    let mut remaining = lockout;
    let mut step = lockout;
    while !step.is_zero() {
        match until.checked_add(step) {
            Some(next) => {
                until = next;
                remaining -= step;
                step = step.min(remaining);
            }
            None => step /= 2,
        }
    }
    until
}

fn serialize_secs<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Sliding-window failure counter with timed lockout.
///
/// Every key shares one [`Policy`]. Registrations for the same key are
/// serialized; registrations for different keys run independently. The
/// limiter is `Send + Sync` and is meant to be shared behind an `Arc`.
#[derive(Debug)]
pub struct Limiter<C = SystemClock> {
    policy: Policy,
    entries: EntryStore,
    clock: C,
}

impl Limiter<SystemClock> {
    /// Create a limiter driven by the system clock.
    pub fn with_system_clock(policy: Policy) -> Self {
        Self::new(policy, SystemClock)
    }
}

impl<C: Clock> Limiter<C> {
    /// Create a limiter for a validated policy.
    pub fn new(policy: Policy, clock: C) -> Self {
        Self {
            policy,
            entries: EntryStore::new(),
            clock,
        }
    }

    /// Validate the raw policy values and build a limiter.
    ///
    /// Fails with [`TurnstileError::InvalidConfiguration`] if any value is zero.
    pub fn try_new(
        max_attempts: usize,
        window: Duration,
        lockout_duration: Duration,
        clock: C,
    ) -> Result<Self> {
        let policy = Policy::new(max_attempts, window, lockout_duration)?;
        Ok(Self::new(policy, clock))
    }

    /// Record one attempt for `key` and decide whether the key is locked.
    ///
    /// A locked key reports the remaining lock time and is otherwise left
    /// untouched, so neither failures nor successes during a lockout change
    /// its history. Once the lock has run out the key starts over from an
    /// empty history before this attempt is recorded.
    ///
    /// Fails with [`TurnstileError::InvalidKey`] for a blank key, without
    /// creating an entry.
    pub fn register(&self, key: &str, succeeded: bool) -> Result<Evaluation> {
        if key.trim().is_empty() {
            return Err(TurnstileError::InvalidKey);
        }

        let now = self.clock.now();
        let handle = self.entries.get_or_create(key);
        let mut entry = handle.lock();

        if let Some(retry_after) = entry.remaining_lockout(now) {
            trace!(key = %key, succeeded, ?retry_after, "Attempt rejected while locked");
            return Ok(Evaluation::locked(retry_after, entry.attempt_count()));
        }

        if entry.expire_lock(now) {
            info!(key = %key, "Lockout expired");
        }

        entry.prune(now, self.policy.window());
        entry.record(now, succeeded);
        let attempts = entry.attempt_count();

        trace!(
            key = %key,
            succeeded,
            attempts = attempts,
            "Registered attempt"
        );

        if attempts >= self.policy.max_attempts() {
            let until = lockout_deadline(now, self.policy.lockout_duration());
            let lockout = until - now;
            entry.lock(until);
            info!(
                key = %key,
                attempts = attempts,
                lockout_secs = lockout.as_secs_f64(),
                "Key locked out"
            );
            return Ok(Evaluation::locked(lockout, attempts));
        }

        Ok(Evaluation::allowed(attempts))
    }

    /// The policy shared by every key.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Number of distinct keys the limiter has seen.
    ///
    /// Entries are never evicted, so this only grows.
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockout::ManualClock;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn limiter(
        max_attempts: usize,
        window_secs: u64,
        lockout_secs: u64,
    ) -> (Arc<ManualClock>, Limiter<Arc<ManualClock>>) {
        let clock = Arc::new(ManualClock::new());
        let limiter = Limiter::try_new(
            max_attempts,
            Duration::from_secs(window_secs),
            Duration::from_secs(lockout_secs),
            Arc::clone(&clock),
        )
        .unwrap();
        (clock, limiter)
    }

    #[test]
    fn test_try_new_rejects_zero_values() {
        let clock = ManualClock::new();
        let err = Limiter::try_new(0, Duration::from_secs(1), Duration::from_secs(1), clock)
            .unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_huge_lockout_rejected_at_construction() {
        let result = Limiter::try_new(
            1,
            Duration::from_secs(10),
            Duration::from_secs(u64::MAX),
            ManualClock::new(),
        );
        assert!(matches!(result, Err(TurnstileError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_lockout_deadline_clamps_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(
            lockout_deadline(now, Duration::from_secs(60)),
            now + Duration::from_secs(60)
        );

        let clamped = lockout_deadline(now, Duration::from_secs(u64::MAX));
        assert!(clamped > now);
        assert!(clamped.checked_add(Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_blank_key_rejected_without_side_effect() {
        let (_, limiter) = limiter(3, 10, 60);

        assert!(matches!(limiter.register("", false), Err(TurnstileError::InvalidKey)));
        assert!(matches!(
            limiter.register("   \t", false),
            Err(TurnstileError::InvalidKey)
        ));
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_failures_below_threshold_are_allowed() {
        let (_, limiter) = limiter(3, 10, 60);

        let first = limiter.register("user", false).unwrap();
        assert_eq!(first, Evaluation::allowed(1));

        let second = limiter.register("user", false).unwrap();
        assert!(!second.is_locked);
        assert_eq!(second.retry_after, Duration::ZERO);
        assert_eq!(second.attempts_in_window, 2);
    }

    #[test]
    fn test_lock_boundary() {
        let (clock, limiter) = limiter(3, 10, 60);

        limiter.register("user", false).unwrap();
        limiter.register("user", false).unwrap();
        let third = limiter.register("user", false).unwrap();
        assert!(third.is_locked);
        assert_eq!(third.attempts_in_window, 3);
        assert_eq!(third.retry_after, Duration::from_secs(60));

        clock.advance(Duration::from_secs(1));
        let fourth = limiter.register("user", false).unwrap();
        assert!(fourth.is_locked);
        assert_eq!(fourth.attempts_in_window, 3);
        assert!(fourth.retry_after < third.retry_after);

        clock.advance(Duration::from_secs(1));
        let fifth = limiter.register("user", false).unwrap();
        assert!(fifth.is_locked);
        assert_eq!(fifth.attempts_in_window, 3);
        assert!(fifth.retry_after < fourth.retry_after);
        assert_eq!(fifth.retry_after, Duration::from_secs(58));
    }

    #[test]
    fn test_success_during_lockout_does_not_unlock() {
        let (clock, limiter) = limiter(2, 10, 60);

        limiter.register("user", false).unwrap();
        limiter.register("user", false).unwrap();

        clock.advance(Duration::from_secs(30));
        let during = limiter.register("user", true).unwrap();
        assert!(during.is_locked);
        assert_eq!(during.retry_after, Duration::from_secs(30));
        assert_eq!(during.attempts_in_window, 2);
    }

    #[test]
    fn test_success_resets_count() {
        let (_, limiter) = limiter(3, 10, 60);

        limiter.register("user", false).unwrap();
        limiter.register("user", false).unwrap();
        let success = limiter.register("user", true).unwrap();
        assert_eq!(success, Evaluation::allowed(0));

        let again = limiter.register("user", true).unwrap();
        assert_eq!(again, Evaluation::allowed(0));

        // A full threshold is needed again after the reset.
        limiter.register("user", false).unwrap();
        let second = limiter.register("user", false).unwrap();
        assert!(!second.is_locked);
        assert_eq!(second.attempts_in_window, 2);
    }

    #[test]
    fn test_window_expiry_prunes_only_stale_failures() {
        let (clock, limiter) = limiter(3, 10, 60);

        limiter.register("user", false).unwrap();
        clock.set(Duration::from_secs(5));
        limiter.register("user", false).unwrap();

        clock.set(Duration::from_millis(10_500));
        let third = limiter.register("user", false).unwrap();
        assert!(!third.is_locked);
        assert_eq!(third.attempts_in_window, 2);
    }

    #[test]
    fn test_failure_exactly_window_old_still_counts() {
        let (clock, limiter) = limiter(3, 10, 60);

        limiter.register("user", false).unwrap();
        clock.set(Duration::from_secs(5));
        limiter.register("user", false).unwrap();

        clock.set(Duration::from_secs(10));
        let third = limiter.register("user", false).unwrap();
        assert!(third.is_locked);
        assert_eq!(third.attempts_in_window, 3);
    }

    #[test]
    fn test_unlock_after_lockout_with_success() {
        let (clock, limiter) = limiter(3, 120, 60);

        for _ in 0..3 {
            limiter.register("user", false).unwrap();
        }

        clock.set(Duration::from_millis(59_999));
        let still_locked = limiter.register("user", true).unwrap();
        assert!(still_locked.is_locked);
        assert_eq!(still_locked.retry_after, Duration::from_millis(1));

        clock.set(Duration::from_secs(60));
        let unlocked = limiter.register("user", true).unwrap();
        assert_eq!(unlocked, Evaluation::allowed(0));
    }

    #[test]
    fn test_unlock_after_lockout_starts_from_empty_history() {
        // Window longer than the lockout, so the tripping failures would
        // otherwise still be inside the window.
        let (clock, limiter) = limiter(3, 120, 60);

        for _ in 0..3 {
            limiter.register("user", false).unwrap();
        }

        clock.set(Duration::from_secs(60));
        let after = limiter.register("user", false).unwrap();
        assert!(!after.is_locked);
        assert_eq!(after.attempts_in_window, 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let (_, limiter) = limiter(2, 10, 60);

        limiter.register("alice", false).unwrap();
        let bob = limiter.register("bob", false).unwrap();
        assert_eq!(bob.attempts_in_window, 1);

        let alice = limiter.register("alice", false).unwrap();
        assert!(alice.is_locked);

        let bob = limiter.register("bob", true).unwrap();
        assert_eq!(bob, Evaluation::allowed(0));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_concurrent_failures_lock_exactly_once() {
        const N: usize = 32;
        let (_, limiter) = limiter(N, 10, 60);
        let limiter = Arc::new(limiter);
        let barrier = Arc::new(Barrier::new(N));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    limiter.register("shared", false).unwrap()
                })
            })
            .collect();
        let results: Vec<Evaluation> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let locked: Vec<_> = results.iter().filter(|e| e.is_locked).collect();
        assert_eq!(locked.len(), 1, "exactly one call should trip the lock");
        assert_eq!(locked[0].attempts_in_window, N);

        let mut counts: Vec<usize> = results.iter().map(|e| e.attempts_in_window).collect();
        counts.sort_unstable();
        assert_eq!(counts, (1..=N).collect::<Vec<_>>(), "no lost or duplicated updates");

        let after = limiter.register("shared", false).unwrap();
        assert!(after.is_locked);
        assert_eq!(after.attempts_in_window, N);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tasks_across_keys() {
        let (_, limiter) = limiter(5, 10, 60);
        let limiter = Arc::new(limiter);

        let mut tasks = Vec::new();
        for k in 0..8 {
            for _ in 0..4 {
                let limiter = Arc::clone(&limiter);
                tasks.push(tokio::spawn(async move {
                    limiter.register(&format!("key-{}", k), false).unwrap()
                }));
            }
        }
        for task in tasks {
            let evaluation = task.await.unwrap();
            assert!(!evaluation.is_locked);
        }

        assert_eq!(limiter.tracked_keys(), 8);
        for k in 0..8 {
            let evaluation = limiter.register(&format!("key-{}", k), false).unwrap();
            assert!(evaluation.is_locked);
            assert_eq!(evaluation.attempts_in_window, 5);
        }
    }

    #[test]
    fn test_evaluation_serializes_retry_after_as_seconds() {
        let evaluation = Evaluation::locked(Duration::from_millis(1500), 3);
        let json = serde_json::to_value(evaluation).unwrap();
        assert_eq!(json["is_locked"], true);
        assert_eq!(json["retry_after_secs"], 1.5);
        assert_eq!(json["attempts_in_window"], 3);
    }
}
