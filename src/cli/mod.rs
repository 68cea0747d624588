//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// Tree-structured test runner
#[derive(Parser, Debug)]
#[command(name = "grove")]
#[command(version = "0.1.0")]
#[command(about = "Run describe/test suites in-process or across a worker pool")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run test files
    Run(RunArgs),

    /// List registered test files
    List(ListArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Serve the worker protocol on stdin/stdout
    #[command(hide = true)]
    Worker,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Files to run (default: config file list, then every registered file)
    pub files: Vec<String>,

    /// Run files across worker processes
    #[arg(short, long)]
    pub parallel: bool,

    /// Maximum worker processes
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Default timeout in milliseconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Grace period in milliseconds
    #[arg(long)]
    pub grace_period: Option<u64>,

    /// Files per worker batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Output format (tree, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Preload routine each worker runs first
    #[arg(long)]
    pub preload: Option<String>,

    /// Save the report to a file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Show every test inside each file
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "grove.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the resolved configuration
    Show {
        /// Show environment variables instead
        #[arg(short, long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },
}
