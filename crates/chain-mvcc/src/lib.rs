//! # chain-mvcc
//!
//! Concurrency-control plumbing for ChainDB.
//!
//! This crate provides everything the version-indexed tree consumes but
//! does not own:
//!
//! - [`global::GlobalState`]: the transaction clock, per-worker visibility
//!   horizons, and the global snapshot low-water mark
//! - [`transaction::Transaction`]: isolation level, timestamp, captured
//!   snapshot, and per-transaction bookkeeping (2PL read locks, staged
//!   garbage-collection TODOs)
//! - [`worker::Worker`]: the per-thread execution context with the
//!   visibility oracle, the command-id counter, the WAL buffer, and
//!   commit/rollback
//! - [`versions::VersionsSpace`]: the shared store of secondary versions,
//!   keyed by (transaction, tree, command)
//! - [`dispatch::TreeDispatch`]: the capability table a tree registers for
//!   the pager and the rollback path

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod dispatch;
pub mod global;
pub mod transaction;
pub mod versions;
pub mod worker;

pub use dispatch::{DispatchRegistry, SpaceCheckResult, TreeDispatch};
pub use global::GlobalState;
pub use transaction::{IsolationLevel, StagedTodo, Transaction, TxMode};
pub use versions::VersionsSpace;
pub use worker::Worker;
