//! Trailing-edge debouncing for recompute triggers
//!
//! Scroll and zoom events arrive in bursts. A [`Debouncer`] collapses a burst
//! into one recompute that fires once the input has been quiet for the
//! configured delay. Time comes from a [`Clock`] so tests can advance it by
//! hand.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of monotonic time
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
///
/// Clones share the same time, so a test can keep one handle and give another
/// to the component under test.
///
/// # Example
///
/// ```
/// use docview_scheduler::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_millis(100));
/// assert_eq!(clock.now() - start, Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self { now: Rc::new(Cell::new(Instant::now())) }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// Trailing-edge debouncer
///
/// Every [`trigger`](Debouncer::trigger) restarts the quiet period;
/// [`take_ready`](Debouncer::take_ready) returns `true` exactly once after the
/// period elapses. A zero delay makes every trigger ready immediately.
///
/// # Example
///
/// ```
/// use docview_scheduler::{Debouncer, ManualClock};
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let mut debouncer = Debouncer::new(Duration::from_millis(100), Rc::new(clock.clone()));
///
/// debouncer.trigger();
/// assert!(!debouncer.take_ready());
///
/// clock.advance(Duration::from_millis(100));
/// assert!(debouncer.take_ready());
/// assert!(!debouncer.take_ready());
/// ```
pub struct Debouncer {
    delay: Duration,
    clock: Rc<dyn Clock>,
    last_trigger: Option<Instant>,
}

impl Debouncer {
    /// Create a debouncer with the given quiet period
    pub fn new(delay: Duration, clock: Rc<dyn Clock>) -> Self {
        Self { delay, clock, last_trigger: None }
    }

    /// Quiet period
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record an event, restarting the quiet period
    pub fn trigger(&mut self) {
        self.last_trigger = Some(self.clock.now());
    }

    /// Whether an event is waiting to fire
    pub fn is_pending(&self) -> bool {
        self.last_trigger.is_some()
    }

    /// Time left until the pending event fires, or `None` if nothing is pending
    pub fn remaining(&self) -> Option<Duration> {
        let triggered = self.last_trigger?;
        let elapsed = self.clock.now().saturating_duration_since(triggered);
        Some(self.delay.saturating_sub(elapsed))
    }

    /// Consume the pending event if its quiet period has elapsed
    pub fn take_ready(&mut self) -> bool {
        match self.remaining() {
            Some(remaining) if remaining.is_zero() => {
                self.last_trigger = None;
                true
            }
            _ => false,
        }
    }

    /// Drop the pending event without firing it
    pub fn cancel(&mut self) {
        self.last_trigger = None;
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("last_trigger", &self.last_trigger)
            .finish()
    }
}
