//! Page formats.
//!
//! Leaves are byte-based slotted pages held in buffer frames; inner
//! routing nodes are structural and live in the tree (see
//! `vtree::structure`).

mod leaf;

pub use leaf::LeafPage;
