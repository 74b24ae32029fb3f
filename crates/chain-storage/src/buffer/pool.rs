//! The page pool.
//!
//! An in-memory frame table: allocates page ids, creates frames for fresh
//! leaves, and resolves page ids back to frames for the dispatch-table
//! introspection paths (checkpoint, space checks). Inner routing nodes
//! are structural and draw their page ids from the same counter without
//! occupying frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use chain_common::PageId;

use crate::page::LeafPage;

use super::frame::BufferFrame;

/// Frame table and page id allocator.
#[derive(Debug)]
pub struct PagePool {
    page_size: usize,
    next_page: AtomicU64,
    frames: DashMap<PageId, Arc<BufferFrame>>,
}

impl PagePool {
    /// Creates a pool for pages of `page_size` bytes.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            next_page: AtomicU64::new(1),
            frames: DashMap::new(),
        }
    }

    /// Returns the page size.
    #[inline]
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Allocates a page id without a frame (inner routing nodes).
    #[must_use]
    pub fn allocate_page_id(&self) -> PageId {
        PageId::new(self.next_page.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocates a frame holding a fresh empty leaf.
    #[must_use]
    pub fn allocate_leaf(&self) -> Arc<BufferFrame> {
        self.adopt_leaf(LeafPage::new(self.page_size))
    }

    /// Allocates a frame for an existing leaf (splits, restores).
    #[must_use]
    pub fn adopt_leaf(&self, leaf: LeafPage) -> Arc<BufferFrame> {
        let page_id = self.allocate_page_id();
        let frame = Arc::new(BufferFrame::new(page_id, leaf));
        self.frames.insert(page_id, Arc::clone(&frame));
        frame
    }

    /// Resolves a page id to its frame.
    #[must_use]
    pub fn get(&self, page_id: PageId) -> Option<Arc<BufferFrame>> {
        self.frames.get(&page_id).map(|entry| Arc::clone(&entry))
    }

    /// Releases a freed page's frame.
    pub fn free(&self, page_id: PageId) {
        self.frames.remove(&page_id);
    }

    /// Returns the number of live frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_resolve() {
        let pool = PagePool::new(1024);
        let frame = pool.allocate_leaf();
        assert!(frame.page_id().is_valid());
        let resolved = pool.get(frame.page_id()).unwrap();
        assert!(Arc::ptr_eq(&frame, &resolved));
    }

    #[test]
    fn test_free() {
        let pool = PagePool::new(1024);
        let frame = pool.allocate_leaf();
        pool.free(frame.page_id());
        assert!(pool.get(frame.page_id()).is_none());
        assert_eq!(pool.frame_count(), 0);
    }

    #[test]
    fn test_distinct_page_ids() {
        let pool = PagePool::new(1024);
        let a = pool.allocate_leaf();
        let b = pool.allocate_page_id();
        assert_ne!(a.page_id(), b);
    }
}
