//! Composite results across files and workers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::TestError;
use crate::models::GroupResult;

/// A worker batch that ended without a clean exit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchFailure {
    pub pid: u32,
    pub status: String,
    pub files: Vec<String>,
}

/// Merged totals across every file reported so far
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompositeResult {
    pub started_at: DateTime<Utc>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_run: usize,
    /// Per-file results, merged by path rather than completion order
    pub files: BTreeMap<String, GroupResult>,
    pub skipped_files: Vec<String>,
    pub crashes: Vec<BatchFailure>,
    pub dispatched: Vec<String>,
    /// Worker batches that finished (cleanly or not)
    pub completed_batches: usize,
}

impl Default for CompositeResult {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeResult {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            passed: 0,
            failed: 0,
            skipped: 0,
            total_run: 0,
            files: BTreeMap::new(),
            skipped_files: Vec::new(),
            crashes: Vec::new(),
            dispatched: Vec::new(),
            completed_batches: 0,
        }
    }

    pub fn dispatch(&mut self, files: &[String]) {
        self.dispatched.extend(files.iter().cloned());
    }

    pub fn record(&mut self, file: impl Into<String>, result: GroupResult) {
        let file = file.into();
        if let Some(previous) = self.files.remove(&file) {
            self.subtract(&previous);
        }
        self.passed += result.passed;
        self.failed += result.failed;
        self.skipped += result.skipped;
        self.total_run += result.total_run;
        self.files.insert(file, result);
    }

    pub fn record_error(&mut self, file: impl Into<String>, error: TestError) {
        self.record(file, GroupResult::file_failure(error));
    }

    pub fn record_skipped_file(&mut self, file: impl Into<String>) {
        self.skipped_files.push(file.into());
    }

    pub fn record_crash(&mut self, crash: BatchFailure) {
        self.crashes.push(crash);
    }

    fn subtract(&mut self, previous: &GroupResult) {
        self.passed -= previous.passed;
        self.failed -= previous.failed;
        self.skipped -= previous.skipped;
        self.total_run -= previous.total_run;
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    /// Dispatched files with neither a result nor a skip notice
    pub fn missing_files(&self) -> Vec<&str> {
        self.dispatched
            .iter()
            .filter(|f| !self.files.contains_key(f.as_str()) && !self.skipped_files.contains(f))
            .map(|f| f.as_str())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_files().is_empty()
    }

    /// Files whose whole tree failed (registration or run-level hook errors)
    pub fn file_errors(&self) -> Vec<(&str, &TestError)> {
        self.files
            .iter()
            .filter_map(|(file, result)| result.error.as_ref().map(|e| (file.as_str(), e)))
            .collect()
    }

    pub fn has_run_errors(&self) -> bool {
        !self.crashes.is_empty() || !self.file_errors().is_empty() || !self.is_complete()
    }
}
