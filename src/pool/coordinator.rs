//! Worker pool coordinator
//!
//! Spawns worker processes (the `grove` binary in `worker` mode), hands each
//! one a chunk of files, and merges the streamed results by file path.

use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::process::{ChildStdin, Command as Process};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::protocol::{read_frame, write_message, Command, Event, Frame};
use crate::config::RunConfig;
use crate::error::GroveError;
use crate::models::{BatchFailure, CompositeResult};
use crate::utils::Timer;

/// Fixed-size pool of worker processes
pub struct WorkerPool {
    program: PathBuf,
    args: Vec<String>,
    config: RunConfig,
    queue: Arc<Mutex<VecDeque<Vec<String>>>>,
    live: Arc<Mutex<HashMap<u32, ChildStdin>>>,
}

/// State shared by the slot tasks of one run
#[derive(Clone)]
struct Slot {
    program: PathBuf,
    args: Vec<String>,
    config: RunConfig,
    queue: Arc<Mutex<VecDeque<Vec<String>>>>,
    live: Arc<Mutex<HashMap<u32, ChildStdin>>>,
    composite: Arc<Mutex<CompositeResult>>,
    total_batches: usize,
}

impl WorkerPool {
    /// `program` is started as `program worker`
    pub fn new(program: impl Into<PathBuf>, config: RunConfig) -> Self {
        Self {
            program: program.into(),
            args: vec!["worker".to_string()],
            config,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// min(available cores, `max_workers`, file count), at least one
    pub fn size_for(&self, files: usize) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.min(self.config.max_workers).min(files).max(1)
    }

    /// Run every file and return the merged composite. Crashed batches are
    /// recorded, never retried.
    pub async fn run(&self, files: Vec<String>) -> CompositeResult {
        let mut composite = CompositeResult::new();
        if files.is_empty() {
            return composite;
        }
        composite.dispatch(&files);

        let chunks: VecDeque<Vec<String>> = files
            .chunks(self.config.batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        let total_batches = chunks.len();
        let size = self.size_for(files.len());
        *self.queue.lock().await = chunks;

        info!(
            "Dispatching {} file(s) in {} batch(es) to {} worker(s)",
            files.len(),
            total_batches,
            size
        );
        let timer = Timer::start("pool");

        let slot = Slot {
            program: self.program.clone(),
            args: self.args.clone(),
            config: self.config.clone(),
            queue: self.queue.clone(),
            live: self.live.clone(),
            composite: Arc::new(Mutex::new(composite)),
            total_batches,
        };

        let handles: Vec<_> = (0..size)
            .map(|_| {
                let slot = slot.clone();
                tokio::spawn(async move { slot.drain().await })
            })
            .collect();
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                warn!("Worker slot task failed: {}", e);
            }
        }

        timer.stop();
        let composite = slot.composite.lock().await.clone();
        info!(
            "Composite: {} passed, {} failed, {} skipped ({} of {} batches)",
            composite.passed,
            composite.failed,
            composite.skipped,
            composite.completed_batches,
            total_batches
        );
        composite
    }

    /// Drop queued batches and send `TERMINATE` to every live worker
    pub async fn shutdown(&self) {
        let dropped = {
            let mut queue = self.queue.lock().await;
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        if dropped > 0 {
            info!("Dropped {} queued batch(es)", dropped);
        }

        let mut live = self.live.lock().await;
        for (pid, stdin) in live.iter_mut() {
            debug!("Terminating worker {}", pid);
            if let Err(e) = write_message(stdin, &Command::Terminate).await {
                warn!("Failed to terminate worker {}: {}", pid, e);
            }
        }
    }
}

impl Slot {
    async fn drain(&self) {
        loop {
            let next = self.queue.lock().await.pop_front();
            match next {
                Some(files) => self.run_batch(files).await,
                None => break,
            }
        }
    }

    async fn run_batch(&self, files: Vec<String>) {
        let (pid, status) = match self.run_worker(&files).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{}", e);
                (0, e.to_string())
            }
        };

        let mut composite = self.composite.lock().await;
        if !status.is_empty() {
            let crash = GroveError::WorkerCrash {
                pid,
                status: status.clone(),
                files: files.clone(),
            };
            warn!("{}", crash);
            composite.record_crash(BatchFailure { pid, status, files });
        }
        composite.completed_batches += 1;
        info!(
            "Batch {}/{} finished: {} passed, {} failed, {} skipped so far",
            composite.completed_batches,
            self.total_batches,
            composite.passed,
            composite.failed,
            composite.skipped
        );
    }

    /// Returns the worker pid and, if it did not exit cleanly, its status
    async fn run_worker(&self, files: &[String]) -> Result<(u32, String), GroveError> {
        let mut child = Process::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(GroveError::Spawn)?;
        let pid = child.id().unwrap_or_default();

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| GroveError::Protocol(format!("worker {pid} has no stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GroveError::Protocol(format!("worker {pid} has no stdout")))?;
        let mut events = BufReader::new(stdout);

        // Nothing is sent before the worker announces itself
        if let Err(reason) = await_ready(&mut events).await {
            warn!("Worker {} did not announce itself: {}", pid, reason);
            if let Err(e) = child.kill().await {
                debug!("Failed to kill worker {}: {}", pid, e);
            }
            return Ok((pid, format!("no READY: {reason}")));
        }
        debug!("Worker {} ready", pid);

        if let Some(module_path) = &self.config.preload {
            let preload = Command::Preload {
                module_path: module_path.clone(),
            };
            if let Err(e) = write_message(&mut stdin, &preload).await {
                warn!("Worker {}: {}", pid, e);
            }
        }
        let run = Command::Run {
            test_files: files.to_vec(),
            config: self.config.clone(),
        };
        if let Err(e) = write_message(&mut stdin, &run).await {
            warn!("Worker {}: {}", pid, e);
        }
        self.live.lock().await.insert(pid, stdin);

        // Read to end of stream so a worker never blocks on a full pipe
        loop {
            match read_frame::<_, Event>(&mut events).await {
                Ok(Some(Frame::Message(event))) => self.record(pid, event).await,
                Ok(Some(Frame::Stray(line))) => eprintln!("{line}"),
                Ok(None) => break,
                Err(e) => {
                    warn!("Worker {}: {}", pid, e);
                    break;
                }
            }
        }

        self.live.lock().await.remove(&pid);
        let status = child.wait().await?;
        if status.success() {
            Ok((pid, String::new()))
        } else {
            Ok((pid, status.to_string()))
        }
    }

    async fn record(&self, pid: u32, event: Event) {
        let mut composite = self.composite.lock().await;
        match event {
            Event::Ready { .. } => warn!("Worker {} announced itself twice", pid),
            Event::FileResult { file, result } => {
                debug!("Worker {} finished {}", pid, file);
                composite.record(file, result);
            }
            Event::FileSkipped { file } => {
                info!("Skipping: {}", file);
                composite.record_skipped_file(file);
            }
            Event::FileError { file, error } => {
                warn!("{}: {}", file, error);
                composite.record_error(file, error);
            }
        }
    }
}

/// Wait for `READY`, passing printed output through
async fn await_ready<R>(events: &mut R) -> Result<(), String>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_frame::<_, Event>(events).await {
            Ok(Some(Frame::Message(Event::Ready { .. }))) => return Ok(()),
            Ok(Some(Frame::Message(event))) => {
                return Err(format!("sent an event for {:?} first", event.file()))
            }
            Ok(Some(Frame::Stray(line))) => eprintln!("{line}"),
            Ok(None) => return Err("stdout closed".to_string()),
            Err(e) => return Err(e.to_string()),
        }
    }
}
