//! Docview Scheduler Library
//!
//! Timing and bookkeeping primitives for render requests.
//!
//! This crate provides the pieces the viewer uses to decide when and whether
//! work should run: cancellation tokens that mark superseded requests stale,
//! a trailing-edge debouncer for bursts of scroll and zoom events, and a
//! bounded retry tracker for failed rasterizations.
//!
//! # Example
//!
//! ```
//! use docview_scheduler::{CancellationRegistry, RetryDecision, RetryTracker};
//!
//! let mut in_flight = CancellationRegistry::new();
//! let token = in_flight.register(3_u32);
//!
//! // The page scrolled out of the window before the render finished
//! in_flight.cancel(3);
//! assert!(token.is_cancelled());
//!
//! let mut retries = RetryTracker::new(3);
//! assert_eq!(retries.record_failure(3_u32), RetryDecision::Retry { attempts: 1 });
//! ```

mod cancel;
mod debounce;
mod retry;

// Re-export public API
pub use cancel::{CancellationRegistry, CancellationToken};
pub use debounce::{Clock, Debouncer, ManualClock, SystemClock};
pub use retry::{RetryDecision, RetryTracker};
