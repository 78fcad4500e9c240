//! Async primitives used by the stream protocols.
mod cond;
mod mutex;
mod pool;
mod queue;

pub use cond::*;
pub use mutex::*;
pub use pool::*;
pub use queue::*;
