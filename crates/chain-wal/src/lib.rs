//! # chain-wal
//!
//! Write-ahead log records and per-worker WAL buffers for ChainDB.
//!
//! The WAL here exists for *runtime rollback only*: every tree mutation
//! reserves a record in its worker's private, totally ordered stream, and
//! rollback replays the stream in reverse through the undo engine. There
//! is no group commit and no recovery-time replay.
//!
//! Records follow the reserve → fill → submit protocol: the mutation
//! reserves a slot sized for its payload, fills header fields and payload
//! bytes in place (the update path even rewrites its diff bytes from
//! forward form to XOR form after applying the user callback), then
//! submits the slot.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod error;
pub mod record;

pub use buffer::{WalBuffer, WalSlot};
pub use error::{WalError, WalResult};
pub use record::{WalKind, WalRecordRef, WriterIdentity, WAL_HEADER_SIZE};
