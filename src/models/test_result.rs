//! Result tree models
//!
//! A result tree mirrors the shape of the test tree it was produced from.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TestError;
use crate::models::{SourceLocation, Test};

/// Test execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    NotRun,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✕",
            TestStatus::Skipped => "○",
            TestStatus::NotRun => "-",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "PASS"),
            TestStatus::Failed => write!(f, "FAIL"),
            TestStatus::Skipped => write!(f, "SKIP"),
            TestStatus::NotRun => write!(f, "NOT RUN"),
        }
    }
}

/// Kind of captured diagnostic output
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Log,
    Warn,
    Error,
}

/// One captured `log`/`warn`/`error` call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleOutput {
    pub kind: OutputKind,
    pub message: String,
    pub location: SourceLocation,
}

/// Captured output of a test, per phase
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutput {
    pub before_each: Vec<ConsoleOutput>,
    pub body: Vec<ConsoleOutput>,
    pub after_each: Vec<ConsoleOutput>,
}

impl PhaseOutput {
    pub fn is_empty(&self) -> bool {
        self.before_each.is_empty() && self.body.is_empty() && self.after_each.is_empty()
    }
}

/// Result of a single test
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub location: SourceLocation,
    pub status: TestStatus,
    pub error: Option<TestError>,
    pub duration_ms: u64,
    pub depth: usize,
    pub output: PhaseOutput,
    /// Detached tasks still running when the trap declared success
    #[serde(default)]
    pub dangling: usize,
}

impl TestResult {
    pub fn new(test: &Test, depth: usize) -> Self {
        Self {
            name: test.name.clone(),
            location: test.location.clone(),
            status: TestStatus::NotRun,
            error: None,
            duration_ms: 0,
            depth,
            output: PhaseOutput::default(),
            dangling: 0,
        }
    }

    pub fn skipped(test: &Test, depth: usize) -> Self {
        Self {
            status: TestStatus::Skipped,
            ..Self::new(test, depth)
        }
    }

    pub fn pass(mut self, duration_ms: u64) -> Self {
        self.status = TestStatus::Passed;
        self.duration_ms = duration_ms;
        self
    }

    pub fn fail(mut self, duration_ms: u64, error: TestError) -> Self {
        self.status = TestStatus::Failed;
        self.duration_ms = duration_ms;
        self.error = Some(error);
        self
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms] ({})",
            self.status.symbol(),
            self.name,
            self.duration_ms,
            self.location
        )?;
        if let Some(err) = &self.error {
            write!(f, " - {err}")?;
        }
        Ok(())
    }
}

/// A child of a group result
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultNode {
    Group(GroupResult),
    Test(TestResult),
}

/// Result of a group, with counts merged from every descendant
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GroupResult {
    pub name: Option<String>,
    pub depth: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_run: usize,
    /// Tests that were actually attempted
    pub total_run: usize,
    pub children: Vec<ResultNode>,
    pub before_output: Vec<ConsoleOutput>,
    pub after_output: Vec<ConsoleOutput>,
    /// A failing `before`/`after` hook, or a whole-file failure
    pub error: Option<TestError>,
    /// Whether the group was entered in skip mode
    pub was_skipped: bool,
    pub duration_ms: u64,
}

impl GroupResult {
    pub fn new(name: Option<String>, depth: usize) -> Self {
        Self {
            name,
            depth,
            ..Default::default()
        }
    }

    /// A file whose tree could not be built or run at all
    pub fn file_failure(error: TestError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn push_test(&mut self, result: TestResult) {
        match result.status {
            TestStatus::Passed => {
                self.passed += 1;
                self.total_run += 1;
            }
            TestStatus::Failed => {
                self.failed += 1;
                self.total_run += 1;
            }
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::NotRun => self.not_run += 1,
        }
        self.children.push(ResultNode::Test(result));
    }

    pub fn push_group(&mut self, child: GroupResult) {
        self.passed += child.passed;
        self.failed += child.failed;
        self.skipped += child.skipped;
        self.not_run += child.not_run;
        self.total_run += child.total_run;
        self.children.push(ResultNode::Group(child));
    }

    /// passed + failed + skipped
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.has_errors()
    }

    /// Whether this group or any descendant group recorded a hook/file error
    pub fn has_errors(&self) -> bool {
        self.error.is_some()
            || self.children.iter().any(|child| match child {
                ResultNode::Group(group) => group.has_errors(),
                ResultNode::Test(_) => false,
            })
    }

    /// Every test result in document order
    pub fn tests(&self) -> Vec<&TestResult> {
        let mut out = Vec::new();
        self.collect_tests(&mut out);
        out
    }

    fn collect_tests<'a>(&'a self, out: &mut Vec<&'a TestResult>) {
        for child in &self.children {
            match child {
                ResultNode::Test(test) => out.push(test),
                ResultNode::Group(group) => group.collect_tests(out),
            }
        }
    }

    pub fn failures(&self) -> Vec<&TestResult> {
        self.tests()
            .into_iter()
            .filter(|t| t.status == TestStatus::Failed)
            .collect()
    }

    /// Test names and statuses in document order, ignoring timings
    pub fn classification(&self) -> Vec<(String, TestStatus)> {
        self.tests()
            .into_iter()
            .map(|t| (t.name.clone(), t.status))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Callback;

    fn test_named(name: &str) -> Test {
        Test::new(name, Callback::sync(|_| Ok(())), SourceLocation::new("suite.rs", 7))
    }

    #[test]
    fn test_push_test_counts() {
        let mut group = GroupResult::new(None, 0);
        group.push_test(TestResult::new(&test_named("a"), 0).pass(3));
        group.push_test(TestResult::new(&test_named("b"), 0).fail(1, TestError::uncaught("x")));
        group.push_test(TestResult::skipped(&test_named("c"), 0));
        group.push_test(TestResult::new(&test_named("d"), 0));

        assert_eq!(group.passed, 1);
        assert_eq!(group.failed, 1);
        assert_eq!(group.skipped, 1);
        assert_eq!(group.not_run, 1);
        assert_eq!(group.total_run, 2);
        assert_eq!(group.total(), 3);
    }

    #[test]
    fn test_push_group_merges_counts() {
        let mut child = GroupResult::new(Some("child".to_string()), 1);
        child.push_test(TestResult::new(&test_named("a"), 1).pass(1));
        child.push_test(TestResult::skipped(&test_named("b"), 1));

        let mut parent = GroupResult::new(None, 0);
        parent.push_test(TestResult::new(&test_named("c"), 0).pass(1));
        parent.push_group(child);

        assert_eq!(parent.passed, 2);
        assert_eq!(parent.skipped, 1);
        assert_eq!(parent.total_run, 2);
        assert_eq!(
            parent.classification(),
            vec![
                ("c".to_string(), TestStatus::Passed),
                ("a".to_string(), TestStatus::Passed),
                ("b".to_string(), TestStatus::Skipped),
            ]
        );
    }

    #[test]
    fn test_nested_error_is_visible() {
        let mut child = GroupResult::new(Some("child".to_string()), 1);
        child.error = Some(TestError::invalid_registration("bad"));
        let mut parent = GroupResult::new(None, 0);
        parent.push_group(child);
        assert!(parent.has_errors());
        assert!(!parent.is_success());
    }

    #[test]
    fn test_result_display() {
        let result = TestResult::new(&test_named("adds"), 0).pass(12);
        assert_eq!(result.to_string(), "✓ adds [12ms] (suite.rs:7)");
    }
}
