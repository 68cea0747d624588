//! Trapped execution of one callback
//!
//! A trap races the callback against its timeout and against the
//! uncaught-failure channel, then waits a short grace period for trailing
//! faults before declaring success.

pub mod fault;
mod scope;

pub use fault::{FaultChannel, FaultListener};
pub use scope::Scope;

use futures::FutureExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::capture::OutputSink;
use crate::error::TestError;
use crate::models::{Callback, CallbackFuture};
use crate::utils::Timer;

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5;

/// Per-invocation trap settings
#[derive(Clone, Debug)]
pub struct TrapOptions {
    pub label: String,
    pub timeout: Duration,
    pub grace_period: Duration,
}

impl TrapOptions {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            grace_period: Duration::from_millis(DEFAULT_GRACE_PERIOD_MS),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// What a trap observed
#[derive(Clone, Debug)]
pub struct TrapOutcome {
    pub error: Option<TestError>,
    /// Detached tasks still running after the grace period
    pub dangling: usize,
    pub elapsed: Duration,
}

impl TrapOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Run `callback` under `options`, attributing faults raised on `faults`
/// while it runs. Captured output goes to `output`.
pub async fn trap(
    callback: &Callback,
    options: &TrapOptions,
    faults: &FaultChannel,
    output: &OutputSink,
) -> TrapOutcome {
    let timer = Timer::start(options.label.as_str());
    let mut listener = faults.listen(options.label.as_str());
    let scope = Scope::new(&options.label, faults.clone(), output.clone());

    let settled = match callback {
        Callback::Sync(f) => settle(catch_unwind(AssertUnwindSafe(|| f(&scope)))),
        Callback::Async(f) => match catch_unwind(AssertUnwindSafe(|| f(scope.clone()))) {
            Ok(body) => race_body(body, options, faults, &mut listener).await,
            Err(payload) => Err(TestError::from_panic(payload)),
        },
    };

    let error = match settled {
        Err(error) => Some(error),
        // Nothing failed yet; give trailing async faults a chance to surface
        Ok(()) => tokio::select! {
            biased;
            fault = listener.recv() => Some(fault),
            _ = tokio::time::sleep(options.grace_period) => None,
        },
    };
    drop(listener);

    let dangling = scope.dangling();
    if error.is_none() && dangling > 0 {
        warn!(
            "'{}' finished with {} detached task(s) still running",
            options.label, dangling
        );
    }

    TrapOutcome {
        error,
        dangling,
        elapsed: timer.elapsed(),
    }
}

/// Race an async body against its timeout and the fault channel. The body
/// runs as its own task, so a timed-out body keeps running; if it later
/// fails, the failure is raised on the fault channel for whichever trap is
/// active then.
async fn race_body(
    body: CallbackFuture,
    options: &TrapOptions,
    faults: &FaultChannel,
    listener: &mut FaultListener,
) -> Result<(), TestError> {
    let (tx, rx) = oneshot::channel();
    let late_faults = faults.clone();
    let label = options.label.clone();
    tokio::spawn(async move {
        let settled = settle(AssertUnwindSafe(body).catch_unwind().await);
        if let Err(Err(late)) = tx.send(settled) {
            debug!("'{}' failed after its trap ended", label);
            late_faults.raise(TestError::uncaught(format!(
                "'{label}' failed after its trap ended: {late}"
            )));
        }
    });

    tokio::select! {
        biased;
        fault = listener.recv() => Err(fault),
        settled = rx => settled.unwrap_or_else(|_| {
            Err(TestError::uncaught(format!("'{}' was cancelled", options.label)))
        }),
        _ = tokio::time::sleep(options.timeout) => Err(TestError::Timeout {
            label: options.label.clone(),
            timeout_ms: options.timeout.as_millis() as u64,
        }),
    }
}

fn settle(
    result: Result<anyhow::Result<()>, Box<dyn std::any::Any + Send>>,
) -> Result<(), TestError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(TestError::raised(&err)),
        Err(payload) => Err(TestError::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::time::Instant;

    fn options(timeout_ms: u64) -> TrapOptions {
        TrapOptions::new("subject").timeout(Duration::from_millis(timeout_ms))
    }

    async fn run(callback: Callback, options: &TrapOptions) -> TrapOutcome {
        trap(&callback, options, &FaultChannel::new(), &OutputSink::new()).await
    }

    #[tokio::test]
    async fn test_async_success() {
        let outcome = run(Callback::future(|_| async { Ok(()) }), &options(100)).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.dangling, 0);
    }

    #[tokio::test]
    async fn test_async_error_is_reported() {
        let outcome = run(
            Callback::future(|_| async { bail!("assertion failed: left != right") }),
            &options(100),
        )
        .await;
        match outcome.error {
            Some(TestError::Raised { message, .. }) => {
                assert_eq!(message, "assertion failed: left != right")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_never_settling_body_times_out_quickly() {
        let start = Instant::now();
        let outcome = run(
            Callback::future(|_| async {
                std::future::pending::<()>().await;
                Ok(())
            }),
            &options(50),
        )
        .await;
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(
            outcome.error,
            Some(TestError::Timeout {
                label: "subject".to_string(),
                timeout_ms: 50,
            })
        );
    }

    #[tokio::test]
    async fn test_uncaught_fault_beats_timeout() {
        let outcome = run(
            Callback::future(|scope| async move {
                scope.spawn(async { bail!("socket closed") });
                std::future::pending::<()>().await;
                Ok(())
            }),
            &options(200),
        )
        .await;
        assert_eq!(outcome.error, Some(TestError::uncaught("socket closed")));
    }

    #[tokio::test]
    async fn test_fault_during_grace_period_fails() {
        let outcome = run(
            Callback::future(|scope| async move {
                scope.spawn(async {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    bail!("late callback error")
                });
                Ok(())
            }),
            &options(100).grace_period(Duration::from_millis(50)),
        )
        .await;
        assert_eq!(outcome.error, Some(TestError::uncaught("late callback error")));
    }

    #[tokio::test]
    async fn test_sync_panic_is_caught() {
        let outcome = run(
            Callback::sync(|_| {
                let numbers: Vec<u32> = Vec::new();
                assert_eq!(numbers.len(), 1, "expected one number");
                Ok(())
            }),
            &options(100),
        )
        .await;
        assert!(matches!(outcome.error, Some(TestError::Raised { .. })));
    }

    #[tokio::test]
    async fn test_sync_body_still_gets_grace_period() {
        let outcome = run(
            Callback::sync(|scope| {
                scope.spawn(async { bail!("timer fired after return") });
                Ok(())
            }),
            &options(100).grace_period(Duration::from_millis(30)),
        )
        .await;
        assert_eq!(
            outcome.error,
            Some(TestError::uncaught("timer fired after return"))
        );
    }

    #[tokio::test]
    async fn test_dangling_tasks_are_counted_not_failed() {
        let outcome = run(
            Callback::future(|scope| async move {
                scope.spawn(async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                });
                Ok(())
            }),
            &options(100),
        )
        .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.dangling, 1);
    }

    #[tokio::test]
    async fn test_listener_removed_on_every_path() {
        let faults = FaultChannel::new();
        let sink = OutputSink::new();
        let hang = Callback::future(|_| async {
            std::future::pending::<()>().await;
            Ok(())
        });
        let outcome = trap(&hang, &options(10), &faults, &sink).await;
        assert!(outcome.error.unwrap().is_timeout());
        assert!(!faults.is_listening());

        let ok = Callback::sync(|_| Ok(()));
        trap(&ok, &options(10), &faults, &sink).await;
        assert!(!faults.is_listening());
    }

    #[tokio::test]
    async fn test_timed_out_body_failure_surfaces_later() {
        let faults = FaultChannel::new();
        let sink = OutputSink::new();
        let slow = Callback::future(|_| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            bail!("finished too late")
        });
        let outcome = trap(&slow, &options(10), &faults, &sink).await;
        assert!(outcome.error.unwrap().is_timeout());

        let waiting = Callback::future(|_| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        });
        let outcome = trap(&waiting, &options(500), &faults, &sink).await;
        assert!(outcome.error.unwrap().is_uncaught());
    }

    #[tokio::test]
    async fn test_captured_output_lands_in_sink() {
        let sink = OutputSink::new();
        let callback = Callback::sync(|scope| {
            scope.log("connecting");
            Ok(())
        });
        trap(&callback, &options(100), &FaultChannel::new(), &sink).await;
        assert_eq!(sink.drain().len(), 1);
    }
}
