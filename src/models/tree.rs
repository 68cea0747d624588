//! Test tree models
//!
//! Plain data describing groups, tests and hooks. Trees are built by
//! [`crate::builder::Builder`] and consumed by [`crate::executor::Engine`].

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use crate::trap::Scope;

/// Future returned by an asynchronous test body or hook
pub type CallbackFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A test body or hook
///
/// Failure is signalled by returning `Err` or by panicking.
#[derive(Clone)]
pub enum Callback {
    Sync(Arc<dyn Fn(&Scope) -> anyhow::Result<()> + Send + Sync>),
    Async(Arc<dyn Fn(Scope) -> CallbackFuture + Send + Sync>),
}

impl Callback {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Scope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Callback::Sync(Arc::new(f))
    }

    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Callback::Async(Arc::new(move |scope| f(scope).boxed()))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Callback::Async(_))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Sync(_) => write!(f, "Callback::Sync"),
            Callback::Async(_) => write!(f, "Callback::Async"),
        }
    }
}

/// Where a test or group was registered
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    pub fn unknown() -> Self {
        Self::new("unknown", 0)
    }
}

impl From<&Location<'_>> for SourceLocation {
    fn from(location: &Location<'_>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Hook phases
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Before,
    After,
    BeforeEach,
    AfterEach,
    BeforeAll,
    AfterAll,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookKind::Before => "before",
            HookKind::After => "after",
            HookKind::BeforeEach => "beforeEach",
            HookKind::AfterEach => "afterEach",
            HookKind::BeforeAll => "beforeAll",
            HookKind::AfterAll => "afterAll",
        };
        f.write_str(name)
    }
}

/// Hook lists owned by a group, each in registration order
#[derive(Clone, Debug, Default)]
pub struct Hooks {
    pub before: Vec<Callback>,
    pub after: Vec<Callback>,
    pub before_each: Vec<Callback>,
    pub after_each: Vec<Callback>,
}

impl Hooks {
    /// Append a hook. `BeforeAll`/`AfterAll` map onto `before`/`after`.
    pub fn push(&mut self, kind: HookKind, callback: Callback) {
        match kind {
            HookKind::Before | HookKind::BeforeAll => self.before.push(callback),
            HookKind::After | HookKind::AfterAll => self.after.push(callback),
            HookKind::BeforeEach => self.before_each.push(callback),
            HookKind::AfterEach => self.after_each.push(callback),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
            && self.after.is_empty()
            && self.before_each.is_empty()
            && self.after_each.is_empty()
    }
}

/// Process-wide hooks shared by every file of a batch
///
/// Appended to while files register, then frozen behind an `Arc` and only
/// read during execution.
#[derive(Clone, Debug, Default)]
pub struct GlobalHooks {
    pub before_all: Vec<Callback>,
    pub after_all: Vec<Callback>,
    pub before_each: Vec<Callback>,
    pub after_each: Vec<Callback>,
}

impl GlobalHooks {
    pub fn push(&mut self, kind: HookKind, callback: Callback) {
        match kind {
            HookKind::Before | HookKind::BeforeAll => self.before_all.push(callback),
            HookKind::After | HookKind::AfterAll => self.after_all.push(callback),
            HookKind::BeforeEach => self.before_each.push(callback),
            HookKind::AfterEach => self.after_each.push(callback),
        }
    }

    pub fn extend(&mut self, other: GlobalHooks) {
        self.before_all.extend(other.before_all);
        self.after_all.extend(other.after_all);
        self.before_each.extend(other.before_each);
        self.after_each.extend(other.after_each);
    }

    pub fn is_empty(&self) -> bool {
        self.before_all.is_empty()
            && self.after_all.is_empty()
            && self.before_each.is_empty()
            && self.after_each.is_empty()
    }
}

/// A leaf test
#[derive(Clone, Debug)]
pub struct Test {
    pub name: String,
    pub callback: Callback,
    pub skip: bool,
    pub only: bool,
    pub timeout: Option<Duration>,
    pub grace_period: Option<Duration>,
    pub location: SourceLocation,
}

impl Test {
    pub fn new(name: impl Into<String>, callback: Callback, location: SourceLocation) -> Self {
        Self {
            name: name.into(),
            callback,
            skip: false,
            only: false,
            timeout: None,
            grace_period: None,
            location,
        }
    }
}

/// A describe block
#[derive(Clone, Debug, Default)]
pub struct Group {
    pub name: String,
    pub children: Vec<Node>,
    pub hooks: Hooks,
    /// True iff some test at any depth beneath this group is marked only
    pub contains_only: bool,
    /// Tests registered beneath this group at any depth
    pub total_tests: usize,
    pub skip: bool,
    pub only: bool,
    pub location: Option<SourceLocation>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn tests(&self) -> impl Iterator<Item = &Test> + '_ {
        self.children.iter().filter_map(|child| match child {
            Node::Test(test) => Some(test),
            Node::Group(_) => None,
        })
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> + '_ {
        self.children.iter().filter_map(|child| match child {
            Node::Group(group) => Some(group),
            Node::Test(_) => None,
        })
    }

    /// Visit every test in document order with its ancestor group names
    pub fn walk_tests<'a>(
        &'a self,
        path: &mut Vec<&'a str>,
        visit: &mut dyn FnMut(&[&str], &Test),
    ) {
        for child in &self.children {
            match child {
                Node::Test(test) => visit(path, test),
                Node::Group(group) => {
                    path.push(&group.name);
                    group.walk_tests(path, visit);
                    path.pop();
                }
            }
        }
    }
}

/// A child of a group
#[derive(Clone, Debug)]
pub enum Node {
    Group(Group),
    Test(Test),
}

/// One file's suite
#[derive(Clone, Debug)]
pub struct Root {
    pub file: String,
    pub group: Group,
    /// File-scoped `only()`
    pub only: bool,
    /// File-scoped `skip()`
    pub skip: bool,
}

impl Root {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            group: Group::default(),
            only: false,
            skip: false,
        }
    }

    pub fn total_tests(&self) -> usize {
        self.group.total_tests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Callback {
        Callback::sync(|_| Ok(()))
    }

    #[test]
    fn test_hooks_keep_registration_order() {
        let mut hooks = Hooks::default();
        hooks.push(HookKind::Before, noop());
        hooks.push(HookKind::BeforeAll, Callback::future(|_| async { Ok(()) }));
        hooks.push(HookKind::AfterEach, noop());
        assert_eq!(hooks.before.len(), 2);
        assert!(!hooks.before[0].is_async());
        assert!(hooks.before[1].is_async());
        assert_eq!(hooks.after_each.len(), 1);
        assert!(hooks.after.is_empty());
    }

    #[test]
    fn test_global_hooks_extend_appends() {
        let mut first = GlobalHooks::default();
        first.push(HookKind::BeforeEach, noop());
        let mut second = GlobalHooks::default();
        second.push(HookKind::BeforeEach, noop());
        second.push(HookKind::AfterAll, noop());
        first.extend(second);
        assert_eq!(first.before_each.len(), 2);
        assert_eq!(first.after_all.len(), 1);
    }

    #[test]
    fn test_walk_tests_document_order() {
        let mut inner = Group::new("inner");
        inner
            .children
            .push(Node::Test(Test::new("b", noop(), SourceLocation::unknown())));
        let mut outer = Group::new("outer");
        outer
            .children
            .push(Node::Test(Test::new("a", noop(), SourceLocation::unknown())));
        outer.children.push(Node::Group(inner));

        let mut seen = Vec::new();
        outer.walk_tests(&mut Vec::new(), &mut |path, test| {
            seen.push(format!("{}/{}", path.join("/"), test.name));
        });
        assert_eq!(seen, vec!["/a".to_string(), "inner/b".to_string()]);
    }

    #[test]
    fn test_hook_kind_display() {
        assert_eq!(HookKind::BeforeEach.to_string(), "beforeEach");
        assert_eq!(HookKind::After.to_string(), "after");
    }
}
