//! Data models for test execution
//!
//! Test trees (what to run) and result trees (what happened).

mod composite;
mod test_result;
mod tree;

pub use composite::{BatchFailure, CompositeResult};
pub use test_result::{
    ConsoleOutput, GroupResult, OutputKind, PhaseOutput, ResultNode, TestResult, TestStatus,
};
pub use tree::{
    Callback, CallbackFuture, GlobalHooks, Group, HookKind, Hooks, Node, Root, SourceLocation,
    Test,
};
