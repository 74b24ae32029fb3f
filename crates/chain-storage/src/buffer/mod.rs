//! Buffer frames, hybrid latches, and the page pool.

mod frame;
mod guard;
mod pool;

pub use frame::BufferFrame;
pub use guard::{restart_loop, ExclusiveGuard, OptimisticGuard, Restart, Restartable, SharedGuard};
pub use pool::PagePool;
