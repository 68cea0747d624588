//! Test tree builder
//!
//! One `Builder` per file. Registration functions receive `&mut Builder`
//! and call `describe`/`test`/hook methods on it; `describe` runs its body
//! immediately against a new frame, so nesting in code becomes nesting in
//! the tree.

use std::future::Future;
use std::panic::Location;
use std::time::Duration;
use tracing::debug;

use crate::error::TestError;
use crate::models::{
    Callback, GlobalHooks, Group, HookKind, Node, Root, SourceLocation, Test,
};
use crate::trap::Scope;

/// How a test or group was registered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Normal,
    Only,
    Skip,
}

/// Handle to a freshly registered test for setting per-test options
pub struct TestHandle<'a> {
    test: Option<&'a mut Test>,
}

impl TestHandle<'_> {
    /// Override the body's timeout
    pub fn timeout(self, timeout: Duration) -> Self {
        let test = self.test.map(|test| {
            test.timeout = Some(timeout);
            test
        });
        Self { test }
    }

    /// Override the body's grace period
    pub fn grace_period(self, grace_period: Duration) -> Self {
        let test = self.test.map(|test| {
            test.grace_period = Some(grace_period);
            test
        });
        Self { test }
    }

    pub fn is_registered(&self) -> bool {
        self.test.is_some()
    }
}

/// Registration cursor for one file
pub struct Builder {
    file: String,
    /// Open groups, outermost (the file's root group) first
    stack: Vec<Group>,
    in_only: bool,
    file_only: bool,
    file_skip: bool,
    globals: GlobalHooks,
    error: Option<TestError>,
}

impl Builder {
    pub fn new(file: impl Into<String>) -> Self {
        let file = file.into();
        let root = Group {
            location: Some(SourceLocation::new(file.clone(), 0)),
            ..Default::default()
        };
        Self {
            file,
            stack: vec![root],
            in_only: false,
            file_only: false,
            file_skip: false,
            globals: GlobalHooks::default(),
            error: None,
        }
    }

    // ---- groups ----

    #[track_caller]
    pub fn describe(&mut self, name: &str, body: impl FnOnce(&mut Builder)) {
        self.group(name, Mode::Normal, Location::caller(), body);
    }

    #[track_caller]
    pub fn describe_only(&mut self, name: &str, body: impl FnOnce(&mut Builder)) {
        self.group(name, Mode::Only, Location::caller(), body);
    }

    #[track_caller]
    pub fn describe_skip(&mut self, name: &str, body: impl FnOnce(&mut Builder)) {
        self.group(name, Mode::Skip, Location::caller(), body);
    }

    fn group(
        &mut self,
        name: &str,
        mode: Mode,
        location: &Location<'_>,
        body: impl FnOnce(&mut Builder),
    ) {
        if !self.check_name("describe", name, location) {
            return;
        }

        let mut group = Group::new(name);
        group.location = Some(SourceLocation::from(location));
        group.skip = mode == Mode::Skip;
        group.only = mode == Mode::Only;
        if group.only {
            self.propagate_only();
        }

        let prev_in_only = self.in_only;
        match mode {
            Mode::Only => self.in_only = true,
            Mode::Skip => self.in_only = false,
            Mode::Normal => {}
        }

        self.stack.push(group);
        body(self);
        self.in_only = prev_in_only;

        // The root frame is never popped here, so there is always a parent
        if let Some(group) = self.stack.pop() {
            debug!(
                "Registered group '{}' ({} tests) in {}",
                group.name, group.total_tests, self.file
            );
            self.current().children.push(Node::Group(group));
        }
    }

    // ---- tests ----

    #[track_caller]
    pub fn test<F, Fut>(&mut self, name: &str, body: F) -> TestHandle<'_>
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_test(name, Callback::future(body), Mode::Normal, Location::caller())
    }

    #[track_caller]
    pub fn test_only<F, Fut>(&mut self, name: &str, body: F) -> TestHandle<'_>
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_test(name, Callback::future(body), Mode::Only, Location::caller())
    }

    #[track_caller]
    pub fn test_skip<F, Fut>(&mut self, name: &str, body: F) -> TestHandle<'_>
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_test(name, Callback::future(body), Mode::Skip, Location::caller())
    }

    /// Register a test with a synchronous body
    #[track_caller]
    pub fn test_sync<F>(&mut self, name: &str, body: F) -> TestHandle<'_>
    where
        F: Fn(&Scope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_test(name, Callback::sync(body), Mode::Normal, Location::caller())
    }

    #[track_caller]
    pub fn register(&mut self, name: &str, callback: Callback, mode: Mode) -> TestHandle<'_> {
        self.add_test(name, callback, mode, Location::caller())
    }

    fn add_test(
        &mut self,
        name: &str,
        callback: Callback,
        mode: Mode,
        location: &Location<'_>,
    ) -> TestHandle<'_> {
        if !self.check_name("test", name, location) {
            return TestHandle { test: None };
        }

        let mut test = Test::new(name, callback, SourceLocation::from(location));
        match mode {
            Mode::Skip => test.skip = true,
            Mode::Only => test.only = true,
            Mode::Normal => test.only = self.in_only,
        }
        if test.only {
            self.propagate_only();
        }
        for frame in &mut self.stack {
            frame.total_tests += 1;
        }

        let children = &mut self.current().children;
        children.push(Node::Test(test));
        let test = match children.last_mut() {
            Some(Node::Test(test)) => Some(test),
            _ => None,
        };
        TestHandle { test }
    }

    // ---- hooks ----

    pub fn before<F, Fut>(&mut self, hook: F)
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookKind::Before, Callback::future(hook));
    }

    pub fn after<F, Fut>(&mut self, hook: F)
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookKind::After, Callback::future(hook));
    }

    pub fn before_each<F, Fut>(&mut self, hook: F)
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookKind::BeforeEach, Callback::future(hook));
    }

    pub fn after_each<F, Fut>(&mut self, hook: F)
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookKind::AfterEach, Callback::future(hook));
    }

    /// Attach a hook of any kind to the current group
    pub fn hook(&mut self, kind: HookKind, callback: Callback) {
        self.current().hooks.push(kind, callback);
    }

    pub fn global_before_all(&mut self, callback: Callback) {
        self.globals.push(HookKind::BeforeAll, callback);
    }

    pub fn global_after_all(&mut self, callback: Callback) {
        self.globals.push(HookKind::AfterAll, callback);
    }

    pub fn global_before_each(&mut self, callback: Callback) {
        self.globals.push(HookKind::BeforeEach, callback);
    }

    pub fn global_after_each(&mut self, callback: Callback) {
        self.globals.push(HookKind::AfterEach, callback);
    }

    // ---- file scope ----

    /// Run only this file (and other only-marked files)
    pub fn only_file(&mut self) {
        self.file_only = true;
    }

    /// Skip this whole file
    pub fn skip_file(&mut self) {
        self.file_skip = true;
    }

    /// Record a registration error; only the first one is kept
    pub fn invalid(&mut self, message: impl Into<String>) {
        let error = TestError::invalid_registration(message);
        debug!("{}: {}", self.file, error);
        self.error.get_or_insert(error);
    }

    /// Close registration and hand back the file's tree
    pub fn finish(mut self) -> Result<(Root, GlobalHooks), TestError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if self.stack.len() != 1 {
            return Err(TestError::invalid_registration(format!(
                "{} group(s) left open in {}",
                self.stack.len() - 1,
                self.file
            )));
        }

        let mut root = Root::new(self.file.clone());
        root.only = self.file_only;
        root.skip = self.file_skip;
        if let Some(group) = self.stack.pop() {
            root.group = group;
        }
        Ok((root, self.globals))
    }

    fn current(&mut self) -> &mut Group {
        let top = self.stack.len() - 1;
        &mut self.stack[top]
    }

    fn propagate_only(&mut self) {
        for frame in &mut self.stack {
            frame.contains_only = true;
        }
    }

    fn check_name(&mut self, what: &str, name: &str, location: &Location<'_>) -> bool {
        if name.trim().is_empty() {
            self.invalid(format!(
                "`{what}` needs a non-empty name ({})",
                SourceLocation::from(location)
            ));
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(register: impl FnOnce(&mut Builder)) -> Root {
        let mut builder = Builder::new("suite.rs");
        register(&mut builder);
        builder.finish().unwrap().0
    }

    fn group<'a>(parent: &'a Group, name: &str) -> &'a Group {
        parent.groups().find(|g| g.name == name).unwrap()
    }

    #[test]
    fn test_nesting_and_counts() {
        let root = build(|b| {
            b.test("top", |_| async { Ok(()) });
            b.describe("outer", |b| {
                b.test("a", |_| async { Ok(()) });
                b.describe("inner", |b| {
                    b.test_sync("b", |_| Ok(()));
                    b.test("c", |_| async { Ok(()) });
                });
            });
        });

        assert_eq!(root.total_tests(), 4);
        let outer = group(&root.group, "outer");
        assert_eq!(outer.total_tests, 3);
        assert_eq!(group(outer, "inner").total_tests, 2);
        assert!(!root.group.contains_only);
    }

    #[test]
    fn test_only_propagates_to_every_open_ancestor() {
        let root = build(|b| {
            b.describe("outer", |b| {
                b.describe("inner", |b| {
                    b.test_only("focused", |_| async { Ok(()) });
                });
                b.describe("sibling", |b| {
                    b.test("plain", |_| async { Ok(()) });
                });
            });
        });

        assert!(root.group.contains_only);
        let outer = group(&root.group, "outer");
        assert!(outer.contains_only);
        assert!(group(outer, "inner").contains_only);
        assert!(!group(outer, "sibling").contains_only);
    }

    #[test]
    fn test_describe_only_marks_its_tests() {
        let root = build(|b| {
            b.describe_only("focused", |b| {
                b.test("one", |_| async { Ok(()) });
                b.test_skip("two", |_| async { Ok(()) });
            });
            b.test("outside", |_| async { Ok(()) });
        });

        let focused = group(&root.group, "focused");
        let tests: Vec<_> = focused.tests().collect();
        assert!(focused.only);
        assert!(tests[0].only);
        assert!(!tests[1].only);
        assert!(tests[1].skip);
        assert!(!root.group.tests().next().unwrap().only);
    }

    #[test]
    fn test_describe_skip_clears_only_context() {
        let root = build(|b| {
            b.describe_only("focused", |b| {
                b.describe_skip("parked", |b| {
                    b.test("inside", |_| async { Ok(()) });
                });
            });
        });

        let parked = group(group(&root.group, "focused"), "parked");
        assert!(parked.skip);
        assert!(!parked.tests().next().unwrap().only);
    }

    #[test]
    fn test_handle_sets_overrides() {
        let root = build(|b| {
            b.test("slow", |_| async { Ok(()) })
                .timeout(Duration::from_millis(50))
                .grace_period(Duration::from_millis(1));
        });

        let test = root.group.tests().next().unwrap();
        assert_eq!(test.timeout, Some(Duration::from_millis(50)));
        assert_eq!(test.grace_period, Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_location_points_at_call_site() {
        let root = build(|b| {
            b.test("here", |_| async { Ok(()) });
        });
        let test = root.group.tests().next().unwrap();
        assert!(test.location.file.ends_with("builder.rs"));
        assert!(test.location.line > 0);
    }

    #[test]
    fn test_blank_name_is_invalid_registration() {
        let mut builder = Builder::new("bad.rs");
        let handle = builder.test("  ", |_| async { Ok(()) });
        assert!(!handle.is_registered());
        builder.describe("", |_| {});

        match builder.finish() {
            Err(TestError::InvalidRegistration { message }) => {
                assert!(message.contains("`test`"))
            }
            other => panic!("expected invalid registration, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_hooks_and_globals_are_collected() {
        let mut builder = Builder::new("hooks.rs");
        builder.before(|_| async { Ok(()) });
        builder.describe("g", |b| {
            b.before_each(|_| async { Ok(()) });
            b.hook(HookKind::AfterEach, Callback::sync(|_| Ok(())));
        });
        builder.global_before_each(Callback::sync(|_| Ok(())));
        builder.global_after_all(Callback::sync(|_| Ok(())));
        builder.only_file();

        let (root, globals) = builder.finish().unwrap();
        assert!(root.only);
        assert!(!root.skip);
        assert_eq!(root.group.hooks.before.len(), 1);
        let g = group(&root.group, "g");
        assert_eq!(g.hooks.before_each.len(), 1);
        assert_eq!(g.hooks.after_each.len(), 1);
        assert_eq!(globals.before_each.len(), 1);
        assert_eq!(globals.after_all.len(), 1);
    }
}
