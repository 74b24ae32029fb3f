//! The version-indexed tree.
//!
//! Module map, leaves first:
//!
//! - [`descriptor`]: update descriptors and the four diff walks
//! - [`tuple`]: on-page primary tuple and version record codec
//! - [`fat`]: the in-place multi-version tuple format
//! - [`counters`]: per-tree telemetry
//! - `structure`: routing nodes, splits, merges
//! - `iterator`: positioned leaf access
//! - `reconstruct`: version-chain walks for invisible heads
//! - [`operator`]: the transactional CRUD engine
//! - `undo`: WAL record inverses for rollback
//! - `gc`: page-wise and point garbage collection
//! - `dispatch`: the capability table registered with the pager

pub mod counters;
pub mod descriptor;
pub mod fat;
pub mod operator;
pub mod tuple;

mod dispatch;
mod gc;
mod iterator;
mod reconstruct;
mod structure;
mod undo;

pub use descriptor::{DiffSlot, UpdateDescriptor};
pub use operator::VersionedTree;
