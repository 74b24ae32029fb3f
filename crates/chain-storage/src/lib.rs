//! # chain-storage
//!
//! The latched page store and the version-indexed B+-tree core of ChainDB.
//!
//! Layers, bottom up:
//!
//! - [`page`]: the sorted slotted leaf page and the node enum frames hold
//! - [`buffer`]: buffer frames with hybrid (optimistic / shared /
//!   exclusive) latches, the restart discipline, and the page pool
//! - [`vtree`]: the multi-version tree itself - tuple codec, update
//!   descriptors and diffs, fat tuples, the transactional leaf operator,
//!   version-chain reconstruction, WAL undo, garbage collection, and the
//!   dispatch table registered with the transaction layer

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod page;
pub mod vtree;

pub use vtree::{UpdateDescriptor, VersionedTree};
