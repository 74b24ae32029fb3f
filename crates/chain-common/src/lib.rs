//! # chain-common
//!
//! Common types, errors, and configuration for ChainDB.
//!
//! This crate provides the foundational vocabulary used across all ChainDB
//! components:
//!
//! - **Types**: Typed identifiers (`WorkerId`, `TxnId`, `CommandId`, `PageId`,
//!   `TreeId`, `ChainSn`), keys and values
//! - **Errors**: The closed `OpResult` outcome set and the `ChainError` enum
//! - **Config**: Engine configuration switches
//! - **Constants**: System-wide constants and limits

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::EngineConfig;
pub use error::{ChainError, ChainResult, OpResult};
pub use types::{ChainSn, CommandId, Key, PageId, TreeId, TxnId, Value, WorkerId};
