//! Batch execution
//!
//! A batch is the set of files one process runs: every file gets a fresh
//! tree and its own engine, the files run concurrently, and process-wide
//! `beforeAll`/`afterAll` hooks bracket the whole batch.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::Engine;
use crate::capture::OutputSink;
use crate::config::RunConfig;
use crate::error::TestError;
use crate::models::{Callback, GlobalHooks, GroupResult, HookKind, Root};
use crate::registry::SuiteRegistry;
use crate::trap::{trap, FaultChannel, TrapOptions};

/// What happened to one file of a batch
#[derive(Clone, Debug)]
pub enum FileOutcome {
    Completed(GroupResult),
    /// Skipped by file-level `skip_file()`/`only_file()`
    Skipped,
    /// The file never ran (registration error or failing global `beforeAll`)
    Failed(TestError),
}

impl FileOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, FileOutcome::Completed(_))
    }
}

/// Per-file decision made before anything runs
pub enum Planned {
    Run(Root),
    Skip,
    Fail(TestError),
}

/// Load every file and apply file-level only/skip. When any file is
/// only-marked, every other file is skipped.
pub fn plan(registry: &SuiteRegistry, files: &[String]) -> (Vec<(String, Planned)>, GlobalHooks) {
    let mut globals = GlobalHooks::default();
    let mut planned: Vec<(String, Planned)> = files
        .iter()
        .map(|file| {
            let decision = match registry.load(file) {
                Ok(suite) => {
                    globals.extend(suite.globals);
                    if suite.root.skip {
                        Planned::Skip
                    } else {
                        Planned::Run(suite.root)
                    }
                }
                Err(error) => {
                    warn!("Failed to load {}: {}", file, error);
                    Planned::Fail(error)
                }
            };
            (file.clone(), decision)
        })
        .collect();

    let any_only = planned
        .iter()
        .any(|(_, decision)| matches!(decision, Planned::Run(root) if root.only));
    if any_only {
        for (_, decision) in planned.iter_mut() {
            if matches!(decision, Planned::Run(root) if !root.only) {
                *decision = Planned::Skip;
            }
        }
    }

    for (file, decision) in &planned {
        if matches!(decision, Planned::Skip) {
            info!("Skipping: {}", file);
        }
    }

    (planned, globals)
}

/// Files that will actually run, in input order
pub fn runnable_files(registry: &SuiteRegistry, files: &[String]) -> (Vec<String>, Vec<String>) {
    let (planned, _) = plan(registry, files);
    let mut run = Vec::new();
    let mut skipped = Vec::new();
    for (file, decision) in planned {
        match decision {
            Planned::Skip => skipped.push(file),
            Planned::Run(_) | Planned::Fail(_) => run.push(file),
        }
    }
    (run, skipped)
}

/// Everything a batch produced
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub files: BTreeMap<String, FileOutcome>,
    /// A failing global `afterAll` hook
    pub teardown: Option<TestError>,
}

pub struct Batch {
    planned: Vec<(String, Planned)>,
    globals: Arc<GlobalHooks>,
    config: RunConfig,
    faults: FaultChannel,
}

impl Batch {
    pub fn prepare(registry: &SuiteRegistry, files: &[String], config: &RunConfig) -> Self {
        let (planned, globals) = plan(registry, files);
        Self {
            planned,
            globals: Arc::new(globals),
            config: config.clone(),
            faults: FaultChannel::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.planned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planned.is_empty()
    }

    /// A handle for running global `afterAll` if the batch is abandoned
    pub fn teardown(&self) -> Teardown {
        Teardown {
            globals: self.globals.clone(),
            config: self.config.clone(),
            faults: self.faults.clone(),
        }
    }

    /// Run the batch. `on_file` sees each outcome as soon as it is known.
    pub async fn execute(self, mut on_file: impl FnMut(&str, &FileOutcome)) -> BatchOutcome {
        let teardown = self.teardown();
        let Batch {
            planned,
            globals,
            config,
            faults,
        } = self;

        let mut outcome = BatchOutcome::default();
        let setup_error =
            run_globals(&globals.before_all, HookKind::BeforeAll, &config, &faults).await;

        let mut running = FuturesUnordered::new();
        for (file, decision) in planned {
            let ready = match (decision, &setup_error) {
                (Planned::Run(root), None) => {
                    let engine = Engine::new(globals.clone())
                        .with_timeout(config.timeout())
                        .with_grace_period(config.grace_period());
                    running.push(async move {
                        let result = engine.run_root(&root).await;
                        (file, FileOutcome::Completed(result))
                    });
                    continue;
                }
                (Planned::Run(_), Some(error)) => FileOutcome::Failed(error.clone()),
                (Planned::Skip, _) => FileOutcome::Skipped,
                (Planned::Fail(error), _) => FileOutcome::Failed(error),
            };
            on_file(&file, &ready);
            outcome.files.insert(file, ready);
        }

        while let Some((file, result)) = running.next().await {
            on_file(&file, &result);
            outcome.files.insert(file, result);
        }

        outcome.teardown = teardown.run().await;
        outcome
    }
}

/// Global `afterAll` hooks of a batch, runnable on their own
pub struct Teardown {
    globals: Arc<GlobalHooks>,
    config: RunConfig,
    faults: FaultChannel,
}

impl Teardown {
    pub async fn run(&self) -> Option<TestError> {
        run_globals(
            &self.globals.after_all,
            HookKind::AfterAll,
            &self.config,
            &self.faults,
        )
        .await
    }
}

async fn run_globals(
    hooks: &[Callback],
    kind: HookKind,
    config: &RunConfig,
    faults: &FaultChannel,
) -> Option<TestError> {
    let label = format!("global.{kind}");
    let options = TrapOptions::new(label.as_str())
        .timeout(config.timeout())
        .grace_period(config.grace_period());
    let sink = OutputSink::new();
    for hook in hooks {
        let outcome = trap(hook, &options, faults, &sink).await;
        if let Some(cause) = outcome.error {
            error!("{} failed: {}", label, cause);
            return Some(TestError::hook(kind, label, cause));
        }
    }
    None
}
