//! Suites compiled into the `grove` binary
//!
//! These are what `grove run` executes when no files are named, and what
//! the worker pool integration test dispatches.

mod arithmetic;
mod chatty;
mod parked;
mod strings;
mod timing;

use grove::registry::SuiteRegistry;
use tracing::info;

/// Every suite and preload routine the binary knows about
pub fn registry() -> SuiteRegistry {
    SuiteRegistry::new()
        .suite("suites/arithmetic", arithmetic::register)
        .suite("suites/strings", strings::register)
        .suite("suites/async", timing::register)
        .suite("suites/parked", parked::register)
        .suite("suites/chatty", chatty::register)
        .preload("warmup", warmup)
}

fn warmup() -> anyhow::Result<()> {
    let table: Vec<u64> = (1..=20)
        .scan(1u64, |acc, n| {
            *acc *= n;
            Some(*acc)
        })
        .collect();
    info!("Warmed factorial table ({} entries)", table.len());
    Ok(())
}
