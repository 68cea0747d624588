//! Handle given to every trapped callback

use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::fault::FaultChannel;
use crate::capture::OutputSink;
use crate::error::{panic_message, TestError};
use crate::models::{OutputKind, SourceLocation};

/// Cooperative instrumentation for a running test body or hook
///
/// Detached work must go through [`Scope::spawn`] so its failures reach the
/// trap and its lifetime is counted.
#[derive(Clone)]
pub struct Scope {
    label: Arc<str>,
    faults: FaultChannel,
    output: OutputSink,
    pending: Arc<AtomicUsize>,
}

/// Decrements the pending count when a detached task ends, even by panic
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Scope {
    pub(crate) fn new(label: &str, faults: FaultChannel, output: OutputSink) -> Self {
        Self {
            label: Arc::from(label),
            faults,
            output,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Label of the test or hook this scope belongs to
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run `task` detached from the awaited chain. An `Err` or panic from it
    /// is raised on the uncaught-failure channel.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let guard = PendingGuard::new(self.pending.clone());
        let faults = self.faults.clone();
        let label = self.label.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let error = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => format!("{err:#}"),
                Err(payload) => panic_message(payload.as_ref()),
            };
            debug!("Detached task from '{}' failed: {}", label, error);
            faults.raise(TestError::uncaught(error));
        });
    }

    /// Raise a failure on the uncaught-failure channel directly
    pub fn fail(&self, err: impl fmt::Display) {
        self.faults.raise(TestError::uncaught(err.to_string()));
    }

    /// Detached tasks spawned from this scope that have not finished
    pub fn dangling(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    #[track_caller]
    pub fn log(&self, message: impl fmt::Display) {
        self.push(OutputKind::Log, message, Location::caller());
    }

    #[track_caller]
    pub fn warn(&self, message: impl fmt::Display) {
        self.push(OutputKind::Warn, message, Location::caller());
    }

    #[track_caller]
    pub fn error(&self, message: impl fmt::Display) {
        self.push(OutputKind::Error, message, Location::caller());
    }

    fn push(&self, kind: OutputKind, message: impl fmt::Display, location: &Location<'_>) {
        self.output
            .push(kind, message.to_string(), SourceLocation::from(location));
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("label", &self.label)
            .field("dangling", &self.dangling())
            .finish()
    }
}
