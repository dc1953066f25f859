use std::io;
use std::path::PathBuf;

/// Lifecycle errors reported on a stream's error channel.
///
/// Line content never produces one of these; unparseable lines are inert.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream cancelled")]
    Cancelled,

    #[error("failed to read powermetrics output: {0}")]
    Read(#[source] io::Error),

    #[error("powermetrics exited with an error: {0}")]
    Producer(#[source] io::Error),

    #[error("failed to start {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StreamError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
