//! Typed identifiers for ChainDB.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID kinds. All of them appear
//! verbatim in on-page record layouts, so their widths are part of the
//! storage format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Worker identifier.
///
/// Each worker thread owns one logical transaction at a time. Worker ids
/// index the per-tuple read-lock bitmap when 2PL read tracking is enabled,
/// which caps them at 64 in that mode.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct WorkerId(u16);

impl WorkerId {
    /// Creates a new `WorkerId`.
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw u16 value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the worker's index as a usize.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns this worker's bit in a 2PL read-lock bitmap.
    #[inline]
    #[must_use]
    pub const fn lock_bit(self) -> u64 {
        1u64 << (self.0 as u64)
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerId({})", self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

impl From<u16> for WorkerId {
    #[inline]
    fn from(id: u16) -> Self {
        Self::new(id)
    }
}

/// Transaction identifier (transaction timestamp, "tts").
///
/// Transaction ids are drawn from a single global monotonic clock; they
/// double as commit-order timestamps for visibility decisions and as the
/// garbage collection horizon.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnId(u64);

impl TxnId {
    /// Invalid transaction id, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Maximum transaction id. Used as the "committed before infinity"
    /// sentinel on secondary versions written by their own superseder.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new `TxnId`.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this is a valid transaction id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "TxnId(INVALID)")
        } else {
            write!(f, "TxnId({})", self.0)
        }
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

impl From<u64> for TxnId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

/// Per-worker command identifier.
///
/// Every write a worker performs gets the next command id; together with
/// the writer's transaction id it addresses the secondary version that
/// preserved the superseded state.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CommandId(u32);

impl CommandId {
    /// The first command id of a fresh tuple (no prior version).
    pub const FIRST: Self = Self(0);

    /// Creates a new `CommandId`.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandId({})", self.0)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl From<u32> for CommandId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

/// Page identifier - uniquely identifies a page in the page store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PageId(u64);

impl PageId {
    /// Invalid page id constant, used as a sentinel value.
    pub const INVALID: Self = Self(u64::MAX);

    /// Creates a new `PageId`.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this is a valid page id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "PageId(INVALID)")
        } else {
            write!(f, "PageId({})", self.0)
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

/// Tree identifier - addresses a registered tree in the dispatch registry
/// and namespaces its entries in the versions store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TreeId(u32);

impl TreeId {
    /// Creates a new `TreeId`.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeId({})", self.0)
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tree{}", self.0)
    }
}

impl From<u32> for TreeId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

/// Chain sequence number.
///
/// Every stored key carries a trailing big-endian `ChainSn`; the primary
/// tuple lives at sequence 0, in-leaf secondary version slots (when
/// present) at higher sequences immediately following it in key order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ChainSn(u32);

impl ChainSn {
    /// The primary tuple's sequence number.
    pub const PRIMARY: Self = Self(0);

    /// Creates a new `ChainSn`.
    #[inline]
    #[must_use]
    pub const fn new(sn: u32) -> Self {
        Self(sn)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true if this sequence number addresses a primary tuple.
    #[inline]
    #[must_use]
    pub const fn is_primary(self) -> bool {
        self.0 == 0
    }

    /// Converts to big-endian bytes for key suffixing.
    #[inline]
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Reads a sequence number from big-endian bytes.
    #[inline]
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

impl fmt::Debug for ChainSn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainSn({})", self.0)
    }
}
