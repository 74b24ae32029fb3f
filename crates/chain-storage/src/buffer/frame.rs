//! Buffer frame - holds one leaf page under a hybrid latch.
//!
//! The latch couples a version counter with a reader/writer lock. Writers
//! bump the version once per guard when they first mark the frame
//! modified, so any reader that re-acquires the frame can validate that
//! nothing changed in between; a mismatch restarts the enclosing
//! operation. The version is also the expectation recorded in dangling
//! pointers staged for point garbage collection.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use chain_common::PageId;

use crate::page::LeafPage;

/// A buffer frame holding a single leaf page.
pub struct BufferFrame {
    page_id: PageId,
    /// Latch version; bumped on each modifying exclusive acquisition.
    version: AtomicU64,
    /// Whether the page was modified since the last checkpoint.
    dirty: AtomicBool,
    /// Exclusive-latch collisions, feeding the contention split heuristic.
    contention: AtomicU32,
    node: Arc<RwLock<LeafPage>>,
}

impl BufferFrame {
    /// Creates a frame holding `leaf`.
    #[must_use]
    pub fn new(page_id: PageId, leaf: LeafPage) -> Self {
        Self {
            page_id,
            version: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
            contention: AtomicU32::new(0),
            node: Arc::new(RwLock::new(leaf)),
        }
    }

    /// Returns the page id.
    #[inline]
    #[must_use]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the current latch version.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Bumps the latch version. Called once per modifying guard.
    #[inline]
    pub(crate) fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true if the page was modified since the last checkpoint.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Records one exclusive-latch collision.
    #[inline]
    pub(crate) fn note_contention(&self) -> u32 {
        self.contention.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the collision count since the last reset.
    #[inline]
    #[must_use]
    pub fn contention(&self) -> u32 {
        self.contention.load(Ordering::Relaxed)
    }

    /// Resets the collision count (after a contention split).
    #[inline]
    pub fn reset_contention(&self) {
        self.contention.store(0, Ordering::Relaxed);
    }

    /// Returns the latched leaf lock. Guards wrap this; direct use is
    /// reserved for structure operations that already serialize access.
    #[inline]
    pub(crate) fn node(&self) -> &Arc<RwLock<LeafPage>> {
        &self.node
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("page_id", &self.page_id)
            .field("version", &self.version())
            .field("dirty", &self.is_dirty())
            .field("contention", &self.contention())
            .finish()
    }
}
