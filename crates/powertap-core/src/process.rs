//! The powermetrics child process.

use std::io;
use std::process::{Child, ChildStdout, Command, Stdio};

use log::debug;

use crate::config::Config;
use crate::error::StreamError;
use crate::stream::Producer;

impl Producer for Child {
    fn wait(&mut self) -> io::Result<()> {
        let status = Child::wait(self)?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("powermetrics exited with {status}")))
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        Child::kill(self)
    }
}

/// Start powermetrics with stdout piped and stdin/stderr detached.
pub fn spawn_powermetrics(config: &Config) -> Result<(ChildStdout, Child), StreamError> {
    let spawn_error = |source| StreamError::Spawn {
        path: config.powermetrics_path.clone(),
        source,
    };

    debug!(
        "spawning {} {}",
        config.powermetrics_path.display(),
        config.powermetrics_args.join(" ")
    );

    let mut child = Command::new(&config.powermetrics_path)
        .args(&config.powermetrics_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(spawn_error)?;

    match child.stdout.take() {
        Some(stdout) => Ok((stdout, child)),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Err(spawn_error(io::Error::other("stdout was not captured")))
        }
    }
}
