//! End-to-end runs of the `grove` binary as coordinator and workers.

use std::process::Command;
use std::time::Duration;

use grove::config::RunConfig;
use grove::models::CompositeResult;
use grove::pool::WorkerPool;

const GROVE: &str = env!("CARGO_BIN_EXE_grove");

fn files() -> Vec<String> {
    ["suites/arithmetic", "suites/strings", "suites/async"]
        .iter()
        .map(|f| f.to_string())
        .collect()
}

fn sums(composite: &CompositeResult) -> (usize, usize, usize) {
    composite.files.values().fold((0, 0, 0), |(p, f, s), r| {
        (p + r.passed, f + r.failed, s + r.skipped)
    })
}

#[tokio::test]
async fn test_three_files_two_workers() {
    let pool = WorkerPool::new(GROVE, RunConfig::default().with_max_workers(2));
    assert!(pool.size_for(3) <= 2);

    let composite = pool.run(files()).await;

    assert_eq!(composite.completed_batches, 3);
    assert!(composite.crashes.is_empty(), "{:?}", composite.crashes);
    assert!(composite.is_complete());
    assert_eq!(composite.files.len(), 3);
    assert_eq!(
        sums(&composite),
        (composite.passed, composite.failed, composite.skipped)
    );
    assert_eq!((composite.passed, composite.failed, composite.skipped), (12, 2, 2));

    let timing = &composite.files["suites/async"];
    let failures = timing.failures();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().any(|t| t.error.as_ref().is_some_and(|e| e.is_timeout())));
    assert!(failures.iter().any(|t| t.error.as_ref().is_some_and(|e| e.is_uncaught())));
}

#[tokio::test]
async fn test_unknown_preload_crashes_batch() {
    let config = RunConfig::default().with_preload("no-such-preload");
    let pool = WorkerPool::new(GROVE, config);

    let composite = pool.run(vec!["suites/arithmetic".to_string()]).await;

    assert_eq!(composite.crashes.len(), 1);
    assert_eq!(composite.missing_files(), vec!["suites/arithmetic"]);
}

#[tokio::test]
async fn test_printing_tests_keep_their_results() {
    let pool = WorkerPool::new(GROVE, RunConfig::default());
    let run = pool.run(vec!["suites/chatty".to_string()]);
    let composite = tokio::time::timeout(Duration::from_secs(30), run)
        .await
        .expect("pool did not finish");

    assert!(composite.crashes.is_empty(), "{:?}", composite.crashes);
    assert!(composite.is_complete());
    assert_eq!((composite.passed, composite.failed), (2, 0));
}

#[test]
fn test_printed_output_stays_out_of_the_report() {
    let output = Command::new(GROVE)
        .args(["run", "--parallel", "--format", "json", "suites/chatty"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let composite: CompositeResult = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(composite.passed, 2);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("debug: value is 3"));
}

#[test]
fn test_in_process_matches_pool_totals() {
    let output = Command::new(GROVE)
        .args(["run", "--format", "json"])
        .args(files())
        .output()
        .unwrap();
    assert!(output.status.success());

    let composite: CompositeResult = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!((composite.passed, composite.failed, composite.skipped), (12, 2, 2));
    assert_eq!(composite.total_run, 14);
}

#[test]
fn test_file_level_skip_is_reported() {
    let output = Command::new(GROVE)
        .args(["run", "--parallel", "--format", "json", "suites/parked", "suites/arithmetic"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let composite: CompositeResult = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(composite.skipped_files, vec!["suites/parked"]);
    assert_eq!(composite.passed, 6);
}
