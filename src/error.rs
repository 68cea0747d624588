//! Error types
//!
//! `TestError` is recorded inside result trees and travels over the worker
//! protocol, so it carries rendered messages rather than live error values.
//! `GroveError` covers run-level failures that never belong to a single test.

use serde::{Deserialize, Serialize};
use std::any::Any;
use thiserror::Error;

use crate::models::HookKind;

/// A failure attributed to a test, a hook, or a whole file
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestError {
    #[error("invalid registration: {message}")]
    InvalidRegistration { message: String },

    #[error("{hook} hook '{label}' failed: {cause}")]
    HookFailure {
        hook: HookKind,
        label: String,
        cause: Box<TestError>,
    },

    #[error("'{label}' timed out after {timeout_ms}ms")]
    Timeout { label: String, timeout_ms: u64 },

    #[error("uncaught async failure: {message}")]
    UncaughtAsync { message: String },

    #[error("{message}")]
    Raised {
        message: String,
        chain: Vec<String>,
    },
}

impl TestError {
    pub fn invalid_registration(message: impl Into<String>) -> Self {
        TestError::InvalidRegistration {
            message: message.into(),
        }
    }

    pub fn uncaught(message: impl Into<String>) -> Self {
        TestError::UncaughtAsync {
            message: message.into(),
        }
    }

    /// Capture an error returned by a callback, keeping its context chain
    pub fn raised(err: &anyhow::Error) -> Self {
        TestError::Raised {
            message: err.to_string(),
            chain: err.chain().skip(1).map(|cause| cause.to_string()).collect(),
        }
    }

    /// Capture a panic payload as a raised error
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        TestError::Raised {
            message: panic_message(payload.as_ref()),
            chain: Vec::new(),
        }
    }

    pub fn hook(hook: HookKind, label: impl Into<String>, cause: TestError) -> Self {
        TestError::HookFailure {
            hook,
            label: label.into(),
            cause: Box::new(cause),
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            TestError::Timeout { .. } => true,
            TestError::HookFailure { cause, .. } => cause.is_timeout(),
            _ => false,
        }
    }

    pub fn is_uncaught(&self) -> bool {
        match self {
            TestError::UncaughtAsync { .. } => true,
            TestError::HookFailure { cause, .. } => cause.is_uncaught(),
            _ => false,
        }
    }
}

/// Render a panic payload the way the standard panic hook does
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run-level errors surfaced by the coordinator and worker processes
#[derive(Error, Debug)]
pub enum GroveError {
    #[error("worker {pid} crashed ({status}) while running {files:?}")]
    WorkerCrash {
        pid: u32,
        status: String,
        files: Vec<String>,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("preload '{module}' failed: {message}")]
    Preload { module: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_raised_keeps_context_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("disk full"))
            .context("writing fixture")
            .unwrap_err();
        match TestError::raised(&err) {
            TestError::Raised { message, chain } => {
                assert_eq!(message, "writing fixture");
                assert_eq!(chain, vec!["disk full".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_panic_payloads() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }

    #[test]
    fn test_hook_failure_classification() {
        let timeout = TestError::Timeout {
            label: "db.before_each".to_string(),
            timeout_ms: 50,
        };
        let err = TestError::hook(HookKind::BeforeEach, "db.before_each", timeout);
        assert!(err.is_timeout());
        assert!(!err.is_uncaught());
        assert_eq!(
            err.to_string(),
            "beforeEach hook 'db.before_each' failed: 'db.before_each' timed out after 50ms"
        );
    }

    #[test]
    fn test_error_serializes_with_kind_tag() {
        let err = TestError::uncaught("late panic");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "uncaught_async");
        let back: TestError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
