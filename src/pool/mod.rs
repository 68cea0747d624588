//! Multi-process execution
//!
//! The coordinator fans files out to worker processes and merges their
//! streamed result trees into one `CompositeResult`.

mod coordinator;
pub mod protocol;
mod worker;

pub use coordinator::WorkerPool;
pub use protocol::{Command, Event};
pub use worker::{run_worker, EXIT_FAILURE, EXIT_OK};
