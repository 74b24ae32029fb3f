//! Core types for ChainDB.

mod ids;
mod keys;

pub use ids::{ChainSn, CommandId, PageId, TreeId, TxnId, WorkerId};
pub use keys::{Key, Value};
