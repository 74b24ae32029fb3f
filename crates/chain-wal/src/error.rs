//! WAL error types.

use thiserror::Error;

/// Errors raised while encoding or decoding WAL records.
#[derive(Debug, Error)]
pub enum WalError {
    /// Record is shorter than its fixed header.
    #[error("truncated WAL record: {actual} bytes, header needs {expected}")]
    TruncatedRecord {
        /// Bytes available.
        actual: usize,
        /// Bytes required.
        expected: usize,
    },

    /// Record payload is shorter than its header advertises.
    #[error("truncated WAL payload: {actual} bytes, header advertises {expected}")]
    TruncatedPayload {
        /// Bytes available.
        actual: usize,
        /// Bytes required.
        expected: usize,
    },

    /// Unknown record kind byte.
    #[error("unknown WAL record kind: {0}")]
    UnknownKind(u8),
}

/// Result alias for [`WalError`].
pub type WalResult<T> = Result<T, WalError>;
