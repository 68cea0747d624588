//! Environment variable configuration
//!
//! `GROVE_*` variables override the config file and are themselves
//! overridden by CLI flags.

use std::env;

use super::RunConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "GROVE";

/// Overrides read from the environment
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// GROVE_TIMEOUT, milliseconds
    pub timeout_ms: Option<u64>,
    /// GROVE_GRACE_PERIOD, milliseconds
    pub grace_period_ms: Option<u64>,
    /// GROVE_WORKERS
    pub max_workers: Option<usize>,
    /// GROVE_BATCH_SIZE
    pub batch_size: Option<usize>,
    /// GROVE_PARALLEL
    pub parallel: Option<bool>,
    /// GROVE_PRELOAD
    pub preload: Option<String>,
    /// GROVE_CONFIG
    pub config_file: Option<String>,
    /// GROVE_FORMAT
    pub format: Option<String>,
    /// GROVE_LOG
    pub log_level: Option<String>,
}

impl EnvConfig {
    pub fn load() -> Self {
        Self {
            timeout_ms: get_env_parse("TIMEOUT"),
            grace_period_ms: get_env_parse("GRACE_PERIOD"),
            max_workers: get_env_parse("WORKERS"),
            batch_size: get_env_parse("BATCH_SIZE"),
            parallel: get_env_bool("PARALLEL"),
            preload: get_env("PRELOAD"),
            config_file: get_env("CONFIG"),
            format: get_env("FORMAT"),
            log_level: get_env("LOG"),
        }
    }

    pub fn has_any(&self) -> bool {
        self.timeout_ms.is_some()
            || self.grace_period_ms.is_some()
            || self.max_workers.is_some()
            || self.batch_size.is_some()
            || self.parallel.is_some()
            || self.preload.is_some()
            || self.config_file.is_some()
            || self.format.is_some()
            || self.log_level.is_some()
    }

    /// Overlay the variables that are set onto `config`
    pub fn apply_to(&self, config: &mut RunConfig) {
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(grace_period_ms) = self.grace_period_ms {
            config.grace_period_ms = grace_period_ms;
        }
        if let Some(max_workers) = self.max_workers {
            config.max_workers = max_workers;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(parallel) = self.parallel {
            config.parallel = parallel;
        }
        if let Some(preload) = &self.preload {
            config.preload = Some(preload.clone());
        }
    }
}

fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables in tests
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn timeout(mut self, timeout_ms: u64) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_TIMEOUT"), timeout_ms.to_string()));
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_WORKERS"), workers.to_string()));
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_PARALLEL"), parallel.to_string()));
        self
    }

    pub fn preload(mut self, name: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_PRELOAD"), name.into()));
        self
    }

    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all GROVE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_TIMEOUT       Default test timeout in milliseconds");
    println!("  {ENV_PREFIX}_GRACE_PERIOD  Grace period after each callback in milliseconds");
    println!("  {ENV_PREFIX}_WORKERS       Maximum worker processes");
    println!("  {ENV_PREFIX}_BATCH_SIZE    Files per worker batch");
    println!("  {ENV_PREFIX}_PARALLEL      Run files across worker processes (true/false)");
    println!("  {ENV_PREFIX}_PRELOAD       Preload routine for every worker");
    println!("  {ENV_PREFIX}_CONFIG        Path to configuration file");
    println!("  {ENV_PREFIX}_FORMAT        Output format (tree, json, csv, summary)");
    println!("  {ENV_PREFIX}_LOG           Log level (trace, debug, info, warn, error)");
}
