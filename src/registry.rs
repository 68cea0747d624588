//! Suite registry
//!
//! Test files are compiled into the binary. Each file path maps to a
//! registration function that fills a [`Builder`]; loading a file means
//! running that function against a fresh builder.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, info};

use crate::builder::Builder;
use crate::error::{panic_message, GroveError, TestError};
use crate::models::{GlobalHooks, Root};

/// Registration function for one test file
pub type SuiteFn = fn(&mut Builder);

/// Warm-up routine run once per worker before its first batch
pub type PreloadFn = fn() -> anyhow::Result<()>;

/// A file's tree plus the process-wide hooks it registered
pub struct LoadedSuite {
    pub root: Root,
    pub globals: GlobalHooks,
}

#[derive(Clone, Default)]
pub struct SuiteRegistry {
    suites: BTreeMap<String, SuiteFn>,
    preloads: BTreeMap<String, PreloadFn>,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a test file under `path`
    pub fn suite(mut self, path: impl Into<String>, register: SuiteFn) -> Self {
        self.suites.insert(path.into(), register);
        self
    }

    /// Register a named preload routine
    pub fn preload(mut self, name: impl Into<String>, routine: PreloadFn) -> Self {
        self.preloads.insert(name.into(), routine);
        self
    }

    /// All registered file paths, sorted
    pub fn paths(&self) -> Vec<String> {
        self.suites.keys().cloned().collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.suites.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.suites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    /// Build a fresh tree for `path`. Unknown paths, blank names and panics
    /// inside the registration function all come back as
    /// `InvalidRegistration`.
    pub fn load(&self, path: &str) -> Result<LoadedSuite, TestError> {
        let register = self.suites.get(path).ok_or_else(|| {
            TestError::invalid_registration(format!("no suite registered for '{path}'"))
        })?;

        debug!("Loading {}", path);
        let mut builder = Builder::new(path);
        catch_unwind(AssertUnwindSafe(|| register(&mut builder))).map_err(|payload| {
            TestError::invalid_registration(format!(
                "registering '{}' panicked: {}",
                path,
                panic_message(payload.as_ref())
            ))
        })?;

        let (root, globals) = builder.finish()?;
        Ok(LoadedSuite { root, globals })
    }

    /// Run the named preload routine
    pub fn run_preload(&self, name: &str) -> Result<(), GroveError> {
        let routine = self.preloads.get(name).ok_or_else(|| GroveError::Preload {
            module: name.to_string(),
            message: "no such preload".to_string(),
        })?;

        info!("Preloading {}", name);
        let outcome = catch_unwind(routine).map_err(|payload| GroveError::Preload {
            module: name.to_string(),
            message: panic_message(payload.as_ref()),
        })?;
        outcome.map_err(|err| GroveError::Preload {
            module: name.to_string(),
            message: format!("{err:#}"),
        })
    }
}

impl std::fmt::Debug for SuiteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteRegistry")
            .field("suites", &self.suites.keys().collect::<Vec<_>>())
            .field("preloads", &self.preloads.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    fn two_tests(b: &mut Builder) {
        b.test("one", |_| async { Ok(()) });
        b.test_sync("two", |_| Ok(()));
    }

    fn panics(b: &mut Builder) {
        b.test("fine", |_| async { Ok(()) });
        panic!("bad fixture");
    }

    fn warm() -> anyhow::Result<()> {
        Ok(())
    }

    fn cold() -> anyhow::Result<()> {
        bail!("cache unavailable")
    }

    fn registry() -> SuiteRegistry {
        SuiteRegistry::new()
            .suite("b.rs", panics)
            .suite("a.rs", two_tests)
            .preload("warm", warm)
            .preload("cold", cold)
    }

    #[test]
    fn test_paths_are_sorted() {
        assert_eq!(registry().paths(), vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn test_load_builds_fresh_tree_each_time() {
        let registry = registry();
        let first = registry.load("a.rs").unwrap();
        let second = registry.load("a.rs").unwrap();
        assert_eq!(first.root.total_tests(), 2);
        assert_eq!(second.root.total_tests(), 2);
        assert_eq!(first.root.file, "a.rs");
    }

    #[test]
    fn test_unknown_path_is_invalid_registration() {
        let err = registry().load("missing.rs").err().unwrap();
        assert!(matches!(err, TestError::InvalidRegistration { .. }));
    }

    #[test]
    fn test_panicking_registration_is_caught() {
        match registry().load("b.rs") {
            Err(TestError::InvalidRegistration { message }) => {
                assert!(message.contains("bad fixture"))
            }
            _ => panic!("expected invalid registration"),
        }
    }

    #[test]
    fn test_preloads() {
        let registry = registry();
        assert!(registry.run_preload("warm").is_ok());
        let err = registry.run_preload("cold").unwrap_err();
        assert!(err.to_string().contains("cache unavailable"));
        assert!(registry.run_preload("nope").is_err());
    }
}
