//! Error handling for ChainDB.
//!
//! Two layers:
//!
//! - [`OpResult`] is the closed outcome set of every tree operation. It is
//!   returned by value, never thrown; conflicts surface as `AbortTx` and
//!   the caller is expected to roll back.
//! - [`ChainError`] covers infrastructure failures (limits, corruption,
//!   registry misses) that are bugs or misconfigurations rather than
//!   transactional outcomes.

use thiserror::Error;

use crate::types::TreeId;

/// Outcome of a tree operation.
///
/// `Duplicate` and `NotEnoughSpace` are internal: the tree resolves them
/// (abort, or split-and-retry) before returning to the caller. `Other`
/// signals an unreachable state and traps in debug builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpResult {
    /// Operation succeeded.
    Ok,
    /// Key absent or tombstoned from the reader's view.
    NotFound,
    /// Key already present (internal; surfaced as `AbortTx` on insert).
    Duplicate,
    /// Write-write or serializability conflict; the caller must roll back.
    AbortTx,
    /// The current leaf cannot fit the record (internal; triggers a split).
    NotEnoughSpace,
    /// Should-not-happen signaling.
    Other,
}

impl OpResult {
    /// Returns true if the operation succeeded.
    #[inline]
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns true if the caller must abort its transaction.
    #[inline]
    #[must_use]
    pub const fn is_abort(self) -> bool {
        matches!(self, Self::AbortTx)
    }
}

/// The main error type for ChainDB infrastructure failures.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Internal error - this indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),

    /// Key exceeds the configured maximum.
    #[error("key too large: {len} bytes (max {max})")]
    KeyTooLarge {
        /// Offending key length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Value exceeds the configured maximum.
    #[error("value too large: {len} bytes (max {max})")]
    ValueTooLarge {
        /// Offending value length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A record cannot fit on a page even after splitting.
    #[error("record of {len} bytes can never fit on a page of {page_size} bytes")]
    RecordTooLarge {
        /// Record length including headers.
        len: usize,
        /// Page size.
        page_size: usize,
    },

    /// A tree id is not present in the dispatch registry.
    #[error("tree {0} is not registered")]
    TreeNotRegistered(TreeId),

    /// A WAL record failed to decode.
    #[error("corrupted WAL record: {0}")]
    WalCorrupted(String),

    /// Serialized tree metadata failed to decode.
    #[error("corrupted tree metadata: {0}")]
    MetadataCorrupted(String),
}

/// Result alias for [`ChainError`].
pub type ChainResult<T> = Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_result_predicates() {
        assert!(OpResult::Ok.is_ok());
        assert!(!OpResult::NotFound.is_ok());
        assert!(OpResult::AbortTx.is_abort());
        assert!(!OpResult::Ok.is_abort());
    }

    #[test]
    fn test_error_display() {
        let err = ChainError::KeyTooLarge { len: 2048, max: 1024 };
        assert!(err.to_string().contains("2048"));
    }
}
