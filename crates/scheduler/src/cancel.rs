//! Cancellation tokens for in-flight requests
//!
//! A token is handed to whoever produces a result; the requester cancels it
//! when the result is no longer wanted (the page scrolled away, the zoom tier
//! changed). The producer, or the code that receives the result, checks the
//! token and discards stale work.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token for cooperative request cancellation
///
/// Clones share the same state, so a renderer running on another thread can
/// observe a cancellation issued from the UI thread.
///
/// # Example
///
/// ```
/// use docview_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Cancel this token
    ///
    /// All clones observe the cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if this token or any clone has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether `other` is a clone of this token (as opposed to an independent token)
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry holding the live token of each key
///
/// At most one token is live per key: registering a key again cancels the
/// token it replaces, which is how a newer request makes an older one stale.
///
/// # Example
///
/// ```
/// use docview_scheduler::CancellationRegistry;
///
/// let mut registry = CancellationRegistry::new();
/// let first = registry.register(5_u32);
/// let second = registry.register(5_u32);
///
/// assert!(first.is_cancelled());
/// assert!(!second.is_cancelled());
/// ```
#[derive(Debug)]
pub struct CancellationRegistry<K> {
    tokens: HashMap<K, CancellationToken>,
}

impl<K> CancellationRegistry<K>
where
    K: Eq + Hash + Copy,
{
    /// Create a new empty registry
    pub fn new() -> Self {
        Self { tokens: HashMap::new() }
    }

    /// Register a fresh token for `key`, cancelling any token it replaces
    pub fn register(&mut self, key: K) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.tokens.insert(key, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel and forget the token for `key`
    ///
    /// Returns `true` if a token was registered.
    pub fn cancel(&mut self, key: K) -> bool {
        match self.tokens.remove(&key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel all registered tokens
    ///
    /// Returns the number of tokens cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.tokens.len();
        for (_, token) in self.tokens.drain() {
            token.cancel();
        }
        count
    }

    /// Unregister `key` once its request completes
    ///
    /// Only removes the entry when `token` is the live one, so a late completion
    /// of a replaced request cannot unregister its successor.
    pub fn complete(&mut self, key: K, token: &CancellationToken) -> bool {
        match self.tokens.get(&key) {
            Some(live) if live.same_as(token) => {
                self.tokens.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Get the live token for `key`
    pub fn get(&self, key: K) -> Option<&CancellationToken> {
        self.tokens.get(&key)
    }

    /// Get the number of registered tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<K> Default for CancellationRegistry<K>
where
    K: Eq + Hash + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}
