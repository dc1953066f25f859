use std::path::PathBuf;
use std::time::Duration;

use log::debug;
use powertap_core::{CancelToken, Config, run_with_config};

use super::{Cadence, OutputArgs, pump, report_errors};

pub struct WatchCommandConfig<'a> {
    pub interval: Duration,
    pub powermetrics_path: Option<&'a str>,
    pub samplers: &'a str,
    pub output: &'a OutputArgs,
}

#[cfg(unix)]
fn warn_if_not_root() {
    if unsafe { libc::geteuid() } != 0 {
        eprintln!("Warning: powermetrics needs root. Run with sudo if no samples appear.");
    }
}

#[cfg(not(unix))]
fn warn_if_not_root() {}

pub fn run(cfg: WatchCommandConfig<'_>) {
    warn_if_not_root();

    let mut config = Config {
        powermetrics_args: vec![
            "--samplers".to_string(),
            cfg.samplers.to_string(),
            "--show-process-gpu".to_string(),
        ],
        sample_window: cfg.interval,
        ..Config::default()
    };
    if let Some(path) = cfg.powermetrics_path {
        config.powermetrics_path = PathBuf::from(path);
    }

    debug!(
        "watch: {} {}",
        config.powermetrics_path.display(),
        config.powermetrics_args.join(" ")
    );

    let cancel = CancelToken::new();
    let handler_cancel = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_cancel.cancel()) {
        eprintln!("Warning: could not install Ctrl+C handler: {e}");
    }

    let stream = match run_with_config(config, cancel) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if !cfg.output.json {
        eprintln!(
            "Watching powermetrics every {}ms (Ctrl+C to stop)\n",
            cfg.interval.as_millis()
        );
    }

    let errors = pump(stream, cfg.output, Cadence::AtMost(cfg.interval));
    if report_errors(&errors) {
        std::process::exit(1);
    }
}
