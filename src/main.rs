//! Grove - tree-structured test runner
//!
//! Runs `describe`/`test` suites compiled into this binary, either in one
//! process or across a pool of worker processes.
//!
//! ## Usage
//!
//! ```bash
//! # Run every registered file in-process
//! grove run
//!
//! # Run two files across at most 2 workers
//! grove run suites/arithmetic suites/async --parallel --workers 2
//!
//! # Shorter default timeout, CSV report
//! grove run --timeout 250 --format csv --output report.csv
//!
//! # List registered files and their tests
//! grove list --detailed
//!
//! # Write an example configuration
//! grove config init
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tokio::io::BufReader;
use tracing::{error, info, warn};

mod cli;
mod suites;

use cli::Args;
use grove::config::{env::print_env_help, ConfigFile, EnvConfig, RunConfig};
use grove::executor::{runnable_files, Batch, FileOutcome};
use grove::models::CompositeResult;
use grove::output::{write_report_to_file, OutputFormat, ResultFormatter};
use grove::pool::{run_worker, WorkerPool};
use grove::registry::SuiteRegistry;
use grove::utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let env = EnvConfig::load();

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        args.log_level
            .as_deref()
            .or(env.log_level.as_deref())
            .map(|s| s.parse::<LogLevel>().map_err(anyhow::Error::msg))
            .transpose()?
            .unwrap_or_default()
    };
    init_logger(level);

    let registry = suites::registry();

    match args.command {
        cli::Command::Run(run_args) => run_tests(&registry, run_args, &env).await,
        cli::Command::List(list_args) => {
            list_files(&registry, list_args);
            Ok(ExitCode::SUCCESS)
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, &env)?;
            Ok(ExitCode::SUCCESS)
        }
        cli::Command::Worker => {
            let code = run_worker(
                &registry,
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
            )
            .await;
            // A pending stdin read would otherwise keep the runtime alive
            std::process::exit(code);
        }
    }
}

/// File config, then `GROVE_*`, then flags
fn resolve_config(args: &cli::RunArgs, env: &EnvConfig) -> Result<(RunConfig, ConfigFile)> {
    let file = match args.config.as_ref().or(env.config_file.as_ref()) {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::load_default()?,
    };

    let mut config = file.run.clone();
    env.apply_to(&mut config);

    if args.parallel {
        config.parallel = true;
    }
    if let Some(workers) = args.workers {
        config.max_workers = workers;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    if let Some(grace_period) = args.grace_period {
        config.grace_period_ms = grace_period;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(preload) = &args.preload {
        config.preload = Some(preload.clone());
    }

    config.validate()?;
    Ok((config, file))
}

async fn run_tests(
    registry: &SuiteRegistry,
    args: cli::RunArgs,
    env: &EnvConfig,
) -> Result<ExitCode> {
    let (config, file) = resolve_config(&args, env)?;

    let format: OutputFormat = args
        .format
        .as_deref()
        .or(env.format.as_deref())
        .or(file.format.as_deref())
        .unwrap_or("tree")
        .parse()
        .map_err(anyhow::Error::msg)?;

    let files = if !args.files.is_empty() {
        args.files.clone()
    } else if !file.files.is_empty() {
        file.files.clone()
    } else {
        registry.paths()
    };
    for file in files.iter().filter(|f| !registry.contains(f)) {
        warn!("{} is not a registered file", file);
    }

    info!(
        "Running {} file(s) {} (timeout {}ms, grace period {}ms)",
        files.len(),
        if config.parallel { "across workers" } else { "in-process" },
        config.timeout_ms,
        config.grace_period_ms
    );

    let (composite, clean) = if config.parallel {
        (run_pool(registry, files, &config).await?, true)
    } else {
        run_in_process(registry, &files, &config).await?
    };

    let mut formatter = ResultFormatter::new(format);
    if args.no_color {
        formatter = formatter.no_color();
    }
    println!("{}", formatter.format_composite(&composite));

    if let Some(output) = &args.output {
        write_report_to_file(output, &composite, format)?;
        info!("Report saved to {}", output);
    }

    if composite.has_run_errors() || !clean {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Returns the composite and whether global teardown succeeded
async fn run_in_process(
    registry: &SuiteRegistry,
    files: &[String],
    config: &RunConfig,
) -> Result<(CompositeResult, bool)> {
    if let Some(preload) = &config.preload {
        registry.run_preload(preload)?;
    }

    let mut composite = CompositeResult::new();
    composite.dispatch(files);

    let outcome = Batch::prepare(registry, files, config)
        .execute(|file, outcome| match outcome {
            FileOutcome::Completed(result) => info!(
                "{}: {} passed, {} failed, {} skipped",
                file, result.passed, result.failed, result.skipped
            ),
            FileOutcome::Skipped => {}
            FileOutcome::Failed(e) => warn!("{}: {}", file, e),
        })
        .await;

    for (file, result) in outcome.files {
        match result {
            FileOutcome::Completed(result) => composite.record(file, result),
            FileOutcome::Skipped => composite.record_skipped_file(file),
            FileOutcome::Failed(e) => composite.record_error(file, e),
        }
    }
    composite.completed_batches = 1;

    if let Some(e) = &outcome.teardown {
        error!("{}", e);
    }
    Ok((composite, outcome.teardown.is_none()))
}

async fn run_pool(
    registry: &SuiteRegistry,
    files: Vec<String>,
    config: &RunConfig,
) -> Result<CompositeResult> {
    let (runnable, skipped) = runnable_files(registry, &files);
    let program = std::env::current_exe().context("Failed to locate the grove binary")?;
    let pool = WorkerPool::new(program, config.clone());

    let run = pool.run(runnable);
    tokio::pin!(run);
    let mut composite = tokio::select! {
        composite = &mut run => composite,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, terminating workers");
            pool.shutdown().await;
            run.await
        }
    };

    for file in skipped {
        composite.record_skipped_file(file);
    }
    Ok(composite)
}

fn list_files(registry: &SuiteRegistry, args: cli::ListArgs) {
    println!("\nRegistered test files ({} total)\n", registry.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for path in registry.paths() {
        match registry.load(&path) {
            Ok(suite) => {
                let marker = if suite.root.skip {
                    " [skip]"
                } else if suite.root.only {
                    " [only]"
                } else {
                    ""
                };
                println!("  {:30} {:3} tests{}", path, suite.root.total_tests(), marker);

                if args.detailed {
                    suite.root.group.walk_tests(&mut Vec::new(), &mut |groups, test| {
                        let mut name = groups.join(" > ");
                        if !name.is_empty() {
                            name.push_str(" > ");
                        }
                        name.push_str(&test.name);
                        println!("      {} ({})", name, test.location);
                    });
                }
            }
            Err(e) => println!("  {:30} ✗ {}", path, e),
        }
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
}

fn manage_config(args: cli::ConfigArgs, env: &EnvConfig) -> Result<()> {
    use std::path::Path;

    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            ConfigFile::example().save(path)?;
            println!("✓ Configuration file created: {output}");
        }

        cli::ConfigAction::Show { env: show_env, format } => {
            if show_env {
                print_env_help();
                return Ok(());
            }

            let mut config = match &env.config_file {
                Some(path) => ConfigFile::load(path)?,
                None => ConfigFile::load_default()?,
            };
            env.apply_to(&mut config.run);
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }
    }

    Ok(())
}
