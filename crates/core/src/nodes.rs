//! Recycled page nodes
//!
//! Each materialized page is backed by a node (the element a host draws the
//! page surface into). Nodes released for off-screen pages go back to a free
//! list and are handed to the next page that needs one.

use doc_model::PageNumber;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Handle of a page node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Pool assigning nodes to pages
#[derive(Debug, Default)]
pub struct PageNodePool {
    assigned: BTreeMap<PageNumber, NodeId>,
    free: Vec<NodeId>,
    created: u32,
}

impl PageNodePool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the node for `page`, reusing a free node when one is available
    ///
    /// Returns the node and whether it was newly assigned.
    pub fn acquire(&mut self, page: PageNumber) -> (NodeId, bool) {
        if let Some(node) = self.assigned.get(&page) {
            return (*node, false);
        }

        let node = self.free.pop().unwrap_or_else(|| {
            self.created += 1;
            NodeId(self.created)
        });
        self.assigned.insert(page, node);
        (node, true)
    }

    /// Return the node of `page` to the free list
    pub fn release(&mut self, page: PageNumber) -> Option<NodeId> {
        let node = self.assigned.remove(&page)?;
        self.free.push(node);
        Some(node)
    }

    /// Node currently assigned to `page`
    pub fn node_for(&self, page: PageNumber) -> Option<NodeId> {
        self.assigned.get(&page).copied()
    }

    /// Pages holding a node, ascending
    pub fn assigned_pages(&self) -> Vec<PageNumber> {
        self.assigned.keys().copied().collect()
    }

    /// Number of pages holding a node
    pub fn assigned_count(&self) -> usize {
        self.assigned.len()
    }

    /// Number of nodes waiting for reuse
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of nodes ever created
    pub fn created_count(&self) -> u32 {
        self.created
    }

    /// Release every node, returning what was assigned
    pub fn release_all(&mut self) -> Vec<(PageNumber, NodeId)> {
        let released: Vec<_> = std::mem::take(&mut self.assigned).into_iter().collect();
        self.free.extend(released.iter().map(|(_, node)| *node));
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_nodes_are_reused() {
        let mut pool = PageNodePool::new();

        let (first, fresh) = pool.acquire(1);
        assert!(fresh);
        pool.acquire(2);
        assert_eq!(pool.release(1), Some(first));

        let (reused, fresh) = pool.acquire(9);
        assert!(fresh);
        assert_eq!(reused, first);
        assert_eq!(pool.created_count(), 2);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn test_acquire_is_idempotent_per_page() {
        let mut pool = PageNodePool::new();

        let (node, _) = pool.acquire(4);
        assert_eq!(pool.acquire(4), (node, false));
        assert_eq!(pool.node_for(4), Some(node));
        assert_eq!(pool.release(5), None);
    }

    #[test]
    fn test_release_all() {
        let mut pool = PageNodePool::new();
        pool.acquire(3);
        pool.acquire(1);

        let released = pool.release_all();
        assert_eq!(released.iter().map(|(page, _)| *page).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(pool.assigned_count(), 0);
        assert_eq!(pool.free_count(), 2);
        assert!(pool.assigned_pages().is_empty());
    }
}
