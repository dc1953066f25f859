use std::fs::File;
use std::time::Duration;

use powertap_core::{CancelToken, Config, run_reader};

use super::{Cadence, OutputArgs, pump, report_errors};

pub struct ReplayCommandConfig<'a> {
    pub file: &'a str,
    pub window: Duration,
    pub all: bool,
    pub output: &'a OutputArgs,
}

pub fn run(cfg: ReplayCommandConfig<'_>) {
    let file = match File::open(cfg.file) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error: cannot open {}: {e}", cfg.file);
            std::process::exit(1);
        }
    };

    let config = Config {
        sample_window: cfg.window,
        ..Config::default()
    };
    let stream = run_reader(file, config, CancelToken::new());

    let cadence = if cfg.all {
        Cadence::Every
    } else {
        Cadence::Final
    };
    let errors = pump(stream, cfg.output, cadence);
    if report_errors(&errors) {
        std::process::exit(1);
    }
}
