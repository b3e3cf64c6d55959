//! Process configuration.
//!
//! Built once at startup (environment first, then CLI overrides) and passed
//! into every component by reference.

use std::path::PathBuf;
use std::time::Duration;

use crate::gateway::openrouter::DEFAULT_BASE_URL;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for one harness process.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// OpenRouter API key. Remote calls fail fast when absent.
    pub api_key: Option<String>,
    /// Base URL of the OpenRouter-compatible API.
    pub base_url: String,
    /// Upper bound on one remote call.
    pub call_timeout: Duration,
    /// Attempts per remote operation (not retries after the first).
    pub max_retries: u32,
    /// Flat pause between attempts.
    pub retry_delay: Duration,
    /// Root holding one timestamped directory per run.
    pub results_dir: PathBuf,
    /// CSV prompt source.
    pub prompts_file: PathBuf,
    /// Model scoring responses; `None` means the run's own model.
    pub evaluator_model: Option<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            results_dir: PathBuf::from("results"),
            prompts_file: PathBuf::from("data").join("prompts.csv"),
            evaluator_model: None,
        }
    }
}

impl HarnessConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`HarnessConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let seconds = |key: &str| {
            non_empty(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        Self {
            api_key: non_empty("OPENROUTER_API_KEY"),
            base_url: non_empty("OPENROUTER_BASE_URL").unwrap_or(defaults.base_url),
            call_timeout: seconds("OPENROUTER_TIMEOUT_SECONDS").unwrap_or(defaults.call_timeout),
            max_retries: non_empty("BIAS_HARNESS_MAX_RETRIES")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .filter(|n| *n >= 1)
                .unwrap_or(defaults.max_retries),
            retry_delay: seconds("BIAS_HARNESS_RETRY_DELAY_SECONDS")
                .unwrap_or(defaults.retry_delay),
            results_dir: non_empty("BIAS_HARNESS_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_dir),
            prompts_file: non_empty("BIAS_HARNESS_PROMPTS")
                .map(PathBuf::from)
                .unwrap_or(defaults.prompts_file),
            evaluator_model: non_empty("BIAS_HARNESS_EVALUATOR_MODEL"),
        }
    }
}
