//! Session configuration for the powermetrics collector.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_POWERMETRICS_PATH: &str = "/usr/bin/powermetrics";

/// Overrides [`DEFAULT_POWERMETRICS_PATH`] when set and non-empty.
pub const POWERMETRICS_PATH_ENV: &str = "POWERTAP_POWERMETRICS";

pub const DEFAULT_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

const INTERVAL_FLAG: &str = "-i";

/// Path of the powermetrics binary, honouring [`POWERMETRICS_PATH_ENV`].
pub fn default_powermetrics_path() -> PathBuf {
    std::env::var(POWERMETRICS_PATH_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_POWERMETRICS_PATH))
}

pub fn default_powermetrics_args() -> Vec<String> {
    ["--samplers", "default", "--show-process-gpu", "-i", "1000"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// How to invoke powermetrics and how to interpret its durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub powermetrics_path: PathBuf,
    pub powermetrics_args: Vec<String>,
    /// Polling interval. Also the denominator when a GPU-process line gives
    /// only an active time.
    pub sample_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            powermetrics_path: default_powermetrics_path(),
            powermetrics_args: default_powermetrics_args(),
            sample_window: DEFAULT_SAMPLE_WINDOW,
        }
    }
}

impl Config {
    /// Fill empty fields with defaults and make `-i` agree with the window.
    pub fn normalized(mut self) -> Self {
        if self.powermetrics_path.as_os_str().is_empty() {
            self.powermetrics_path = default_powermetrics_path();
        }
        if self.powermetrics_args.is_empty() {
            self.powermetrics_args = default_powermetrics_args();
        }
        if self.sample_window.is_zero() {
            self.sample_window = DEFAULT_SAMPLE_WINDOW;
        }
        ensure_interval_argument(&mut self.powermetrics_args, self.sample_window);
        self
    }
}

/// Rewrite the value following the first `-i`, or append `-i <ms>` when the
/// flag is absent. A trailing `-i` with no value counts as absent.
pub fn ensure_interval_argument(args: &mut Vec<String>, window: Duration) {
    let interval = window.as_millis().to_string();
    let position = args
        .iter()
        .take(args.len().saturating_sub(1))
        .position(|a| a == INTERVAL_FLAG);

    match position {
        Some(i) => args[i + 1] = interval,
        None => {
            args.push(INTERVAL_FLAG.to_string());
            args.push(interval);
        }
    }
}
