//! Engine configuration.
//!
//! Every switch maps to a documented behavioral difference in the tree;
//! the defaults mirror the standard MVCC deployment: versioning on,
//! fast paths off, remove TODOs and dangling pointers on, 2PL off.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CONTENTION_SPLIT_THRESHOLD, DEFAULT_GC_GARBAGE_RATIO, DEFAULT_MAX_CHAIN_LENGTH,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MAX_WORKERS_2PL, MIN_PAGE_SIZE,
};

/// Engine configuration for ChainDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Page size in bytes.
    pub page_size: usize,
    /// Multi-version concurrency control. When false no secondary versions
    /// are ever created and readers only observe the latest state.
    pub mv: bool,
    /// Allow conversion of chained tuples into fat (in-place multi-version)
    /// tuples. Reserved: the conversion policy is not active; existing fat
    /// tuples are always honored regardless of this switch.
    pub fat_tuple: bool,
    /// Fast update: skip version creation unconditionally for chained
    /// primaries.
    pub fupdate_chained: bool,
    /// Permit skipping version creation when every worker signals
    /// read-committed safety and the updater is single-statement.
    pub update_version_elision: bool,
    /// Fast remove: physically delete the slot without versioning.
    pub fremove: bool,
    /// Stage a point-GC TODO carrying a dangling pointer on every remove.
    pub rtodo: bool,
    /// Enable the optimistic dangling-pointer fast path in point GC.
    pub dangling_pointer: bool,
    /// Track serializable reads with a per-worker read-lock bitmap (strict
    /// 2PL) instead of a read timestamp.
    pub two_pl: bool,
    /// Hard cap on the version chain length walked during reconstruction.
    pub max_chain_length: u16,
    /// Exclusive-latch collisions on a leaf before contention split fires.
    pub contention_split_threshold: u32,
    /// Fraction of a leaf that must be garbage before page-wise GC runs.
    pub gc_garbage_ratio: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            page_size: DEFAULT_PAGE_SIZE,
            mv: true,
            fat_tuple: false,
            fupdate_chained: false,
            update_version_elision: false,
            fremove: false,
            rtodo: true,
            dangling_pointer: true,
            two_pl: false,
            max_chain_length: DEFAULT_MAX_CHAIN_LENGTH,
            contention_split_threshold: DEFAULT_CONTENTION_SPLIT_THRESHOLD,
            gc_garbage_ratio: DEFAULT_GC_GARBAGE_RATIO,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults for the given worker count.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Enables or disables MVCC version creation.
    #[must_use]
    pub fn with_mv(mut self, mv: bool) -> Self {
        self.mv = mv;
        self
    }

    /// Enables 2PL read tracking.
    #[must_use]
    pub fn with_two_pl(mut self, two_pl: bool) -> Self {
        self.two_pl = two_pl;
        self
    }

    /// Sets the maximum reconstruction chain length.
    #[must_use]
    pub fn with_max_chain_length(mut self, max_chain_length: u16) -> Self {
        self.max_chain_length = max_chain_length;
        self
    }

    /// Validates the configuration, returning a description of the first
    /// problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be at least 1".into());
        }
        if self.two_pl && self.workers > MAX_WORKERS_2PL {
            return Err(format!(
                "2PL read bitmaps support at most {MAX_WORKERS_2PL} workers, got {}",
                self.workers
            ));
        }
        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(format!(
                "page size {} outside [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}]",
                self.page_size
            ));
        }
        if self.max_chain_length == 0 {
            return Err("max_chain_length must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.gc_garbage_ratio) {
            return Err(format!(
                "gc_garbage_ratio {} outside [0, 1]",
                self.gc_garbage_ratio
            ));
        }
        Ok(())
    }
}
