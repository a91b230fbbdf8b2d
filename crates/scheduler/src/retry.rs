//! Bounded retry accounting
//!
//! Failed work is retried on the next pass until it has failed
//! `max_attempts` times, after which it is given up on until reset.

use std::collections::HashMap;
use std::hash::Hash;

/// Outcome of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again on the next pass; `attempts` failures so far
    Retry { attempts: u32 },
    /// Retry budget exhausted
    GiveUp { attempts: u32 },
}

/// Per-key failure counter with a retry cap
///
/// # Example
///
/// ```
/// use docview_scheduler::{RetryDecision, RetryTracker};
///
/// let mut retries = RetryTracker::new(2);
/// assert_eq!(retries.record_failure(7_u32), RetryDecision::Retry { attempts: 1 });
/// assert_eq!(retries.record_failure(7_u32), RetryDecision::GiveUp { attempts: 2 });
/// ```
#[derive(Debug, Clone)]
pub struct RetryTracker<K> {
    max_attempts: u32,
    failures: HashMap<K, u32>,
}

impl<K> RetryTracker<K>
where
    K: Eq + Hash + Copy,
{
    /// Create a tracker that gives up after `max_attempts` failures (at least one)
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1), failures: HashMap::new() }
    }

    /// Maximum number of failures before giving up
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Record a failure for `key`
    pub fn record_failure(&mut self, key: K) -> RetryDecision {
        let attempts = self.failures.entry(key).or_insert(0);
        *attempts = attempts.saturating_add(1);

        if *attempts >= self.max_attempts {
            RetryDecision::GiveUp { attempts: *attempts }
        } else {
            RetryDecision::Retry { attempts: *attempts }
        }
    }

    /// Forget the failures of `key` after it succeeds
    pub fn record_success(&mut self, key: K) {
        self.failures.remove(&key);
    }

    /// Forget every recorded failure
    pub fn clear(&mut self) {
        self.failures.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut retries = RetryTracker::new(3);

        assert_eq!(retries.record_failure(1), RetryDecision::Retry { attempts: 1 });
        assert_eq!(retries.record_failure(1), RetryDecision::Retry { attempts: 2 });
        assert_eq!(retries.record_failure(1), RetryDecision::GiveUp { attempts: 3 });
        assert_eq!(retries.record_failure(1), RetryDecision::GiveUp { attempts: 4 });
    }

    #[test]
    fn test_success_resets_the_count() {
        let mut retries = RetryTracker::new(3);

        retries.record_failure(4);
        retries.record_failure(4);
        retries.record_success(4);
        assert_eq!(retries.record_failure(4), RetryDecision::Retry { attempts: 1 });
    }

    #[test]
    fn test_keys_are_independent() {
        let mut retries = RetryTracker::new(2);

        assert_eq!(retries.record_failure(1), RetryDecision::Retry { attempts: 1 });
        assert_eq!(retries.record_failure(1), RetryDecision::GiveUp { attempts: 2 });
        assert_eq!(retries.record_failure(2), RetryDecision::Retry { attempts: 1 });

        retries.clear();
        assert_eq!(retries.record_failure(1), RetryDecision::Retry { attempts: 1 });
    }

    #[test]
    fn test_zero_max_attempts_is_raised_to_one() {
        let retries: RetryTracker<u32> = RetryTracker::new(0);
        assert_eq!(retries.max_attempts(), 1);
    }
}
