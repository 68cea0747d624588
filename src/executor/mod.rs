//! Test execution
//!
//! `Engine` runs one file's tree; `Batch` runs a set of files inside one
//! process with the shared global hooks.

mod batch;
mod engine;

pub use batch::{plan, runnable_files, Batch, BatchOutcome, FileOutcome, Planned, Teardown};
pub use engine::Engine;
