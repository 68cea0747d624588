//! Execution engine
//!
//! Walks one file's tree depth-first in registration order, deciding
//! skip/only from the static tree and running every callback through a trap.
//! Failures are recorded in the result tree; nothing escapes `run`.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::capture::OutputSink;
use crate::error::TestError;
use crate::models::{
    Callback, GlobalHooks, Group, GroupResult, HookKind, Node, Root, Test, TestResult,
};
use crate::trap::{trap, FaultChannel, TrapOptions, DEFAULT_GRACE_PERIOD_MS, DEFAULT_TIMEOUT_MS};
use crate::utils::Timer;

/// Runs one file's tree. Owns that file's fault channel.
pub struct Engine {
    faults: FaultChannel,
    globals: Arc<GlobalHooks>,
    timeout: Duration,
    grace_period: Duration,
}

impl Engine {
    pub fn new(globals: Arc<GlobalHooks>) -> Self {
        Self {
            faults: FaultChannel::new(),
            globals,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            grace_period: Duration::from_millis(DEFAULT_GRACE_PERIOD_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn faults(&self) -> &FaultChannel {
        &self.faults
    }

    /// Run a whole file
    pub async fn run_root(&self, root: &Root) -> GroupResult {
        let timer = Timer::start(root.file.as_str());
        let mut result = self.run(&root.group, false, 0).await;
        result.duration_ms = timer.elapsed_ms();

        info!(
            "{}: {}/{} passed, {} failed, {} skipped",
            root.file, result.passed, result.total_run, result.failed, result.skipped
        );
        result
    }

    /// Run `group` and everything beneath it
    pub async fn run(&self, group: &Group, in_skip: bool, depth: usize) -> GroupResult {
        self.run_group(group, Vec::new(), in_skip, depth).await
    }

    fn run_group<'a>(
        &'a self,
        group: &'a Group,
        ancestors: Vec<&'a Group>,
        in_skip: bool,
        depth: usize,
    ) -> BoxFuture<'a, GroupResult> {
        async move {
            let timer = Timer::start(group_label(group));
            let name = (!group.name.is_empty()).then(|| group.name.clone());
            let mut result = GroupResult::new(name, depth);
            result.was_skipped = in_skip;

            let mut chain = ancestors;
            chain.push(group);

            let sink = OutputSink::new();
            if group.contains_only {
                result.error = self
                    .run_group_hooks(group, HookKind::Before, &group.hooks.before, &sink)
                    .await;
                result.before_output = sink.drain();
            }

            if result.error.is_some() {
                for child in &group.children {
                    match child {
                        Node::Group(child) => result.push_group(not_run(child, depth + 1)),
                        Node::Test(test) => result.push_test(TestResult::new(test, depth)),
                    }
                }
            } else {
                for child in &group.children {
                    match child {
                        Node::Group(child) => {
                            let child_skip = in_skip
                                || child.skip
                                || (group.contains_only && !child.contains_only);
                            let child_result = self
                                .run_group(child, chain.clone(), child_skip, depth + 1)
                                .await;
                            result.push_group(child_result);
                        }
                        Node::Test(test) => {
                            let skipped =
                                !test.only && (group.contains_only || in_skip || test.skip);
                            if skipped {
                                debug!("Skipping {}", test.name);
                                result.push_test(TestResult::skipped(test, depth));
                            } else {
                                result.push_test(self.run_test(test, &chain, depth).await);
                            }
                        }
                    }
                }
            }

            if group.contains_only {
                let after_error = self
                    .run_group_hooks(group, HookKind::After, &group.hooks.after, &sink)
                    .await;
                if result.error.is_none() {
                    result.error = after_error;
                }
                result.after_output = sink.drain();
            }

            result.duration_ms = timer.elapsed_ms();
            result
        }
        .boxed()
    }

    /// Run `before` or `after` hooks in order, stopping at the first failure
    async fn run_group_hooks(
        &self,
        group: &Group,
        kind: HookKind,
        hooks: &[Callback],
        sink: &OutputSink,
    ) -> Option<TestError> {
        let label = format!("{}.{}", group_label(group), kind);
        for hook in hooks {
            let outcome = trap(hook, &self.hook_options(&label), &self.faults, sink).await;
            if let Some(error) = outcome.error {
                warn!("{} failed: {}", label, error);
                return Some(TestError::hook(kind, label, error));
            }
        }
        None
    }

    async fn run_test(&self, test: &Test, chain: &[&Group], depth: usize) -> TestResult {
        debug!("Running {} ({})", test.name, test.location);
        let timer = Timer::start(test.name.as_str());
        let mut result = TestResult::new(test, depth);
        let sink = OutputSink::new();

        let before_each = self
            .globals
            .before_each
            .iter()
            .chain(chain.iter().flat_map(|g| g.hooks.before_each.iter()));
        let setup = self
            .run_each_hooks(test, HookKind::BeforeEach, before_each, &sink)
            .await;
        result.output.before_each = sink.drain();
        if let Err(error) = setup {
            return result.fail(timer.elapsed_ms(), error);
        }

        let options = TrapOptions::new(test.name.as_str())
            .timeout(test.timeout.unwrap_or(self.timeout))
            .grace_period(test.grace_period.unwrap_or(self.grace_period));
        let outcome = trap(&test.callback, &options, &self.faults, &sink).await;
        result.output.body = sink.drain();
        result.dangling = outcome.dangling;
        if let Some(error) = outcome.error {
            return result.fail(timer.elapsed_ms(), error);
        }

        let after_each = chain
            .iter()
            .rev()
            .flat_map(|g| g.hooks.after_each.iter())
            .chain(self.globals.after_each.iter());
        let teardown = self
            .run_each_hooks(test, HookKind::AfterEach, after_each, &sink)
            .await;
        result.output.after_each = sink.drain();

        match teardown {
            Ok(()) => result.pass(timer.elapsed_ms()),
            Err(error) => result.fail(timer.elapsed_ms(), error),
        }
    }

    async fn run_each_hooks<'h>(
        &self,
        test: &Test,
        kind: HookKind,
        hooks: impl Iterator<Item = &'h Callback>,
        sink: &OutputSink,
    ) -> Result<(), TestError> {
        let label = format!("{}.{}", test.name, kind);
        for hook in hooks {
            let outcome = trap(hook, &self.hook_options(&label), &self.faults, sink).await;
            if let Some(error) = outcome.error {
                return Err(TestError::hook(kind, label, error));
            }
        }
        Ok(())
    }

    fn hook_options(&self, label: &str) -> TrapOptions {
        TrapOptions::new(label)
            .timeout(self.timeout)
            .grace_period(self.grace_period)
    }
}

fn group_label(group: &Group) -> &str {
    if group.name.is_empty() {
        "root"
    } else {
        &group.name
    }
}

/// Result for a subtree that was never attempted
fn not_run(group: &Group, depth: usize) -> GroupResult {
    let mut result = GroupResult::new(Some(group.name.clone()), depth);
    for child in &group.children {
        match child {
            Node::Group(child) => result.push_group(not_run(child, depth + 1)),
            Node::Test(test) => result.push_test(TestResult::new(test, depth)),
        }
    }
    result
}
