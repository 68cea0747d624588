//! Worker process loop
//!
//! A worker announces itself with `READY`, optionally runs a preload, then
//! runs exactly one `RUN` batch and exits. `TERMINATE` cancels the batch,
//! runs the global `afterAll` hooks and exits cleanly.

use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::protocol::{read_message, write_message, Command, Event};
use crate::config::RunConfig;
use crate::executor::{Batch, FileOutcome};
use crate::registry::SuiteRegistry;

/// Exit code for a clean run
pub const EXIT_OK: i32 = 0;
/// Exit code when preload, teardown or the protocol fails
pub const EXIT_FAILURE: i32 = 1;

fn event_for(file: &str, outcome: &FileOutcome) -> Event {
    let file = file.to_string();
    match outcome {
        FileOutcome::Completed(result) => Event::FileResult {
            file,
            result: result.clone(),
        },
        FileOutcome::Skipped => Event::FileSkipped { file },
        FileOutcome::Failed(error) => Event::FileError {
            file,
            error: error.clone(),
        },
    }
}

/// Serve commands from `input`, streaming events to `output`. Returns the
/// process exit code.
pub async fn run_worker<R, W>(registry: &SuiteRegistry, mut input: R, mut output: W) -> i32
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (events, mut outbox) = mpsc::unbounded_channel::<Event>();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            if let Err(e) = write_message(&mut output, &event).await {
                error!("Failed to send {:?} event: {}", event.file(), e);
                return false;
            }
        }
        true
    });

    let pid = std::process::id();
    send(&events, Event::Ready { pid });
    debug!("Worker {} ready", pid);

    let code = serve(registry, &mut input, &events).await;

    drop(events);
    match writer.await {
        Ok(true) => code,
        // The coordinator has lost events; a clean exit would hide that
        Ok(false) => EXIT_FAILURE,
        Err(e) => {
            error!("Event writer task failed: {}", e);
            EXIT_FAILURE
        }
    }
}

/// Queue an event for the writer task
fn send(events: &mpsc::UnboundedSender<Event>, event: Event) {
    if let Err(e) = events.send(event) {
        warn!("Event for {:?} dropped: writer is gone", e.0.file());
    }
}

async fn serve<R>(
    registry: &SuiteRegistry,
    input: &mut R,
    events: &mpsc::UnboundedSender<Event>,
) -> i32
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_message::<_, Command>(input).await {
            Ok(Some(Command::Preload { module_path })) => {
                if let Err(e) = registry.run_preload(&module_path) {
                    error!("{}", e);
                    return EXIT_FAILURE;
                }
            }
            Ok(Some(Command::Run { test_files, config })) => {
                return run_batch(registry, input, events, &test_files, &config).await;
            }
            Ok(Some(Command::Terminate)) | Ok(None) => {
                debug!("Worker exiting before any batch");
                return EXIT_OK;
            }
            Err(e) => {
                error!("{}", e);
                return EXIT_FAILURE;
            }
        }
    }
}

async fn run_batch<R>(
    registry: &SuiteRegistry,
    input: &mut R,
    events: &mpsc::UnboundedSender<Event>,
    files: &[String],
    config: &RunConfig,
) -> i32
where
    R: AsyncBufRead + Unpin,
{
    info!("Running {} file(s)", files.len());
    let batch = Batch::prepare(registry, files, config);
    let teardown = batch.teardown();

    let execution = batch.execute(|file, outcome| {
        send(events, event_for(file, outcome));
    });
    tokio::pin!(execution);

    let mut listening = true;
    loop {
        tokio::select! {
            outcome = &mut execution => {
                return match outcome.teardown {
                    Some(e) => {
                        error!("Teardown failed: {}", e);
                        EXIT_FAILURE
                    }
                    None => EXIT_OK,
                };
            }
            command = read_message::<_, Command>(input), if listening => match command {
                Ok(Some(Command::Terminate)) => break,
                Ok(Some(other)) => warn!("Ignoring {:?} while a batch is running", other),
                Ok(None) => listening = false,
                Err(e) => {
                    warn!("{}", e);
                    listening = false;
                }
            },
        }
    }

    info!("Terminating: running global afterAll hooks");
    match teardown.run().await {
        Some(e) => {
            error!("Teardown failed: {}", e);
            EXIT_FAILURE
        }
        None => EXIT_OK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::models::Callback;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, BufReader};

    static TEARDOWNS: AtomicUsize = AtomicUsize::new(0);

    fn quick(b: &mut Builder) {
        b.test("adds", |_| async { Ok(()) });
        b.test("breaks", |_| async { bail!("boom") });
    }

    fn slow(b: &mut Builder) {
        b.global_after_all(Callback::sync(|_| {
            TEARDOWNS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        b.test("sleeps", |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
    }

    fn cold() -> anyhow::Result<()> {
        bail!("cache unavailable")
    }

    fn registry() -> SuiteRegistry {
        SuiteRegistry::new()
            .suite("quick", quick)
            .suite("slow", slow)
            .preload("cold", cold)
    }

    fn script(commands: &[Command]) -> BufReader<std::io::Cursor<Vec<u8>>> {
        let mut bytes = Vec::new();
        for command in commands {
            bytes.extend(serde_json::to_vec(command).unwrap());
            bytes.push(b'\n');
        }
        BufReader::new(std::io::Cursor::new(bytes))
    }

    async fn drive(commands: &[Command]) -> (i32, Vec<Event>) {
        let (writer, mut reader) = tokio::io::duplex(1 << 20);
        let code = run_worker(&registry(), script(commands), writer).await;
        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        let events = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (code, events)
    }

    fn run(files: &[&str], config: RunConfig) -> Command {
        Command::Run {
            test_files: files.iter().map(|f| f.to_string()).collect(),
            config,
        }
    }

    #[tokio::test]
    async fn test_ready_then_results() {
        let (code, events) = drive(&[run(&["quick", "missing"], RunConfig::default())]).await;

        assert_eq!(code, EXIT_OK);
        assert!(matches!(events[0], Event::Ready { .. }));
        assert_eq!(events.len(), 3);
        for event in &events[1..] {
            match event {
                Event::FileResult { file, result } => {
                    assert_eq!(file, "quick");
                    assert_eq!((result.passed, result.failed), (1, 1));
                }
                Event::FileError { file, .. } => assert_eq!(file, "missing"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_preload_failure_exits_non_zero() {
        let commands = [
            Command::Preload {
                module_path: "cold".to_string(),
            },
            run(&["quick"], RunConfig::default()),
        ];
        let (code, events) = drive(&commands).await;
        assert_eq!(code, EXIT_FAILURE);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_terminate_runs_teardown() {
        let config = RunConfig::default().with_timeout_ms(60_000);
        let commands = [run(&["slow"], config), Command::Terminate];
        let (code, events) = drive(&commands).await;

        assert_eq!(code, EXIT_OK);
        assert_eq!(events.len(), 1);
        assert_eq!(TEARDOWNS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminate_before_run() {
        let (code, events) = drive(&[Command::Terminate]).await;
        assert_eq!(code, EXIT_OK);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_output_exits_non_zero() {
        let (writer, reader) = tokio::io::duplex(64);
        drop(reader);
        let commands = [run(&["quick"], RunConfig::default())];
        let code = run_worker(&registry(), script(&commands), writer).await;
        assert_eq!(code, EXIT_FAILURE);
    }
}
