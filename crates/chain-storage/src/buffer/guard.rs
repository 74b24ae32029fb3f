//! Latch guards and the restart discipline.
//!
//! Three acquisition modes, mirroring the pager's latch protocol:
//!
//! - [`OptimisticGuard`]: non-blocking read acquisition that raises
//!   [`Restart`] on contention; `recheck` validates the frame version
//!   recorded at acquisition so a reader that interleaved with a writer
//!   restarts instead of acting on a changed page.
//! - [`SharedGuard`]: blocking read acquisition for scans and pessimistic
//!   lookups.
//! - [`ExclusiveGuard`]: blocking write acquisition for mutators. The
//!   guard bumps the frame version once, when the holder first marks the
//!   frame modified, which is also what invalidates any dangling pointer
//!   recorded against the old version.
//!
//! Operation bodies run inside [`restart_loop`]: raising [`Restart`]
//! unwinds to the entry point and the body re-runs from scratch,
//! re-creating its external effects. Callers therefore keep all
//! non-idempotent work inside the restartable region.

use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::page::LeafPage;

use super::frame::BufferFrame;

/// Latch validation failed; re-enter the restartable region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restart;

/// Result of a restartable region.
pub type Restartable<T> = Result<T, Restart>;

/// Runs `body` until it completes without a restart.
pub fn restart_loop<T>(mut body: impl FnMut() -> Restartable<T>) -> T {
    loop {
        if let Ok(value) = body() {
            return value;
        }
    }
}

/// Optimistic (version-validated) read guard.
pub struct OptimisticGuard {
    frame: Arc<BufferFrame>,
    node: ArcRwLockReadGuard<RawRwLock, LeafPage>,
    version: u64,
}

impl OptimisticGuard {
    /// Attempts a non-blocking read acquisition.
    pub fn acquire(frame: &Arc<BufferFrame>) -> Restartable<Self> {
        let node = frame.node().try_read_arc().ok_or(Restart)?;
        let version = frame.version();
        Ok(Self {
            frame: Arc::clone(frame),
            node,
            version,
        })
    }

    /// Returns the leaf.
    #[inline]
    #[must_use]
    pub fn leaf(&self) -> &LeafPage {
        &self.node
    }

    /// Returns the guarded frame.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> &Arc<BufferFrame> {
        &self.frame
    }

    /// Validates that the frame version is unchanged since acquisition.
    #[inline]
    pub fn recheck(&self) -> Restartable<()> {
        if self.frame.version() == self.version {
            Ok(())
        } else {
            Err(Restart)
        }
    }
}

/// Shared (blocking) read guard.
pub struct SharedGuard {
    frame: Arc<BufferFrame>,
    node: ArcRwLockReadGuard<RawRwLock, LeafPage>,
}

impl SharedGuard {
    /// Acquires the frame shared, blocking until readers are admitted.
    #[must_use]
    pub fn acquire(frame: &Arc<BufferFrame>) -> Self {
        let node = frame.node().read_arc();
        Self {
            frame: Arc::clone(frame),
            node,
        }
    }

    /// Returns the leaf.
    #[inline]
    #[must_use]
    pub fn leaf(&self) -> &LeafPage {
        &self.node
    }

    /// Returns the guarded frame.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> &Arc<BufferFrame> {
        &self.frame
    }
}

/// Exclusive write guard.
pub struct ExclusiveGuard {
    frame: Arc<BufferFrame>,
    node: ArcRwLockWriteGuard<RawRwLock, LeafPage>,
    bumped: bool,
}

impl ExclusiveGuard {
    /// Acquires the frame exclusively, blocking. Collisions feed the
    /// contention split heuristic.
    #[must_use]
    pub fn acquire(frame: &Arc<BufferFrame>) -> Self {
        let node = match frame.node().try_write_arc() {
            Some(guard) => guard,
            None => {
                frame.note_contention();
                frame.node().write_arc()
            }
        };
        Self {
            frame: Arc::clone(frame),
            node,
            bumped: false,
        }
    }

    /// Acquires the frame exclusively only if its version still matches
    /// `expected` (the dangling-pointer fast path). Never blocks.
    pub fn acquire_if_version(frame: &Arc<BufferFrame>, expected: u64) -> Restartable<Self> {
        let node = frame.node().try_write_arc().ok_or(Restart)?;
        if frame.version() != expected {
            return Err(Restart);
        }
        Ok(Self {
            frame: Arc::clone(frame),
            node,
            bumped: false,
        })
    }

    /// Returns the leaf.
    #[inline]
    #[must_use]
    pub fn leaf(&self) -> &LeafPage {
        &self.node
    }

    /// Returns the leaf mutably. Callers mark the guard modified when the
    /// mutation is observable.
    #[inline]
    #[must_use]
    pub fn leaf_mut(&mut self) -> &mut LeafPage {
        &mut self.node
    }

    /// Returns the guarded frame.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> &Arc<BufferFrame> {
        &self.frame
    }

    /// Marks the frame dirty and bumps its version (once per guard).
    pub fn mark_modified(&mut self) {
        if !self.bumped {
            self.bumped = true;
            self.frame.bump_version();
            self.frame.set_dirty(true);
        }
    }
}
