//! System-wide constants for ChainDB.

// =============================================================================
// Page Constants
// =============================================================================

/// Default page size in bytes (4 KB).
///
/// Leaves are kept small so that page-wise garbage collection scans stay
/// cheap and contention splits pay off quickly.
pub const DEFAULT_PAGE_SIZE: usize = 4 * 1024;

/// Minimum page size in bytes (1 KB).
pub const MIN_PAGE_SIZE: usize = 1024;

/// Maximum page size in bytes (64 KB).
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Leaf page header size in bytes.
///
/// The header contains: page_seq (8), gc_space_used (4), slot_count (2),
/// free_lower (2), free_upper (2) = 18 bytes, rounded up to 24 for alignment.
pub const PAGE_HEADER_SIZE: usize = 24;

/// Slot size in the leaf slot array.
///
/// Each slot contains: offset (2), key_len (2), payload_len (2) = 6 bytes.
pub const SLOT_SIZE: usize = 6;

// =============================================================================
// Key and Value Limits
// =============================================================================

/// Maximum user key size in bytes (1 KB).
pub const MAX_KEY_SIZE: usize = 1024;

/// Maximum value size in bytes (half a page minus bookkeeping).
///
/// Values must fit on a single leaf together with the tuple header.
pub const MAX_VALUE_SIZE: usize = DEFAULT_PAGE_SIZE / 2;

/// Number of bytes appended to every stored key for the chain sequence
/// number. The primary tuple lives at sequence 0.
pub const CHAIN_SN_BYTES: usize = 4;

// =============================================================================
// Concurrency Limits
// =============================================================================

/// Maximum number of workers when 2PL read bitmaps are in use.
///
/// The per-tuple read-lock word is a 64-bit bitmap indexed by worker id.
pub const MAX_WORKERS_2PL: usize = 64;

/// Default hard cap on the length of a version chain walked during
/// reconstruction. Exceeding it is an invariant violation.
pub const DEFAULT_MAX_CHAIN_LENGTH: u16 = 64;

/// Number of exclusive-latch collisions on a leaf before the contention
/// split heuristic fires.
pub const DEFAULT_CONTENTION_SPLIT_THRESHOLD: u32 = 16;

/// Fraction of a leaf that must be garbage before page-wise GC triggers.
pub const DEFAULT_GC_GARBAGE_RATIO: f64 = 0.25;
