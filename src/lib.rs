//! Grove - tree-structured test execution
//!
//! Tests are registered into a tree of `describe` groups with hooks and
//! only/skip markers, executed depth-first with every callback raced against
//! a timeout, and optionally fanned out across worker processes.
//!
//! ## Example
//!
//! ```no_run
//! use grove::builder::Builder;
//! use grove::executor::Batch;
//! use grove::config::RunConfig;
//! use grove::registry::SuiteRegistry;
//!
//! fn math(b: &mut Builder) {
//!     b.describe("addition", |b| {
//!         b.test_sync("adds", |_| {
//!             anyhow::ensure!(1 + 1 == 2);
//!             Ok(())
//!         });
//!     });
//! }
//!
//! # async fn run() {
//! let registry = SuiteRegistry::new().suite("math", math);
//! let batch = Batch::prepare(&registry, &["math".to_string()], &RunConfig::default());
//! let outcome = batch.execute(|_, _| {}).await;
//! # }
//! ```

pub mod builder;
pub mod capture;
pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod output;
pub mod pool;
pub mod registry;
pub mod trap;
pub mod utils;
