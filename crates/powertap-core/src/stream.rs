//! Streaming driver.
//!
//! A session runs on its own thread: it reads lines from a byte source,
//! feeds them to a [`Parser`], and publishes snapshots and lifecycle errors
//! on two bounded channels. Both channels close when the thread exits.
//!
//! Consumers must drain both receivers (or drop them). A full channel blocks
//! the session thread; a dropped snapshot receiver stops it. Use
//! [`Stream::drain_errors`] when only snapshots matter.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;

use log::{debug, warn};

use crate::config::Config;
use crate::error::StreamError;
use crate::metrics::Metrics;
use crate::parser::Parser;
use crate::process::spawn_powermetrics;

pub const METRICS_CHANNEL_CAPACITY: usize = 128;
pub const ERROR_CHANNEL_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared cancellation flag, checked once per line.
///
/// A session blocked on a read only notices the flag when the next line
/// arrives, which for powermetrics can be one full sample interval.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Whatever writes the bytes a session reads, typically the powermetrics
/// child process.
pub trait Producer: Send {
    /// Block until the producer finishes. An unsuccessful finish is an error.
    fn wait(&mut self) -> io::Result<()>;

    /// Terminate the producer. Called before a final [`wait`](Self::wait).
    fn kill(&mut self) -> io::Result<()>;
}

// ---------------------------------------------------------------------------
// Stream handle
// ---------------------------------------------------------------------------

/// Receiving ends of a running session.
#[derive(Debug)]
pub struct Stream {
    pub metrics: Receiver<Metrics>,
    pub errors: Receiver<StreamError>,
}

impl Stream {
    /// Discard errors on a helper thread and keep only the snapshot
    /// receiver. Each discarded error is logged at debug level.
    pub fn drain_errors(self) -> Receiver<Metrics> {
        let errors = self.errors;
        thread::spawn(move || {
            for err in errors {
                debug!("suppressed stream error: {err}");
            }
        });
        self.metrics
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Session {
    parser: Parser,
    producer: Option<Box<dyn Producer>>,
    cancel: CancelToken,
    metrics: SyncSender<Metrics>,
    errors: SyncSender<StreamError>,
}

impl Session {
    fn run<R: BufRead>(mut self, mut reader: R) {
        debug!("powermetrics session started");

        let mut buf = Vec::new();
        let mut read_error = None;

        loop {
            if self.cancel.is_cancelled() {
                self.finish_cancelled();
                return;
            }

            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            }

            let line = String::from_utf8_lossy(&buf);
            let Some(snapshot) = self.parser.parse_line(&line) else {
                continue;
            };
            if self.metrics.send(snapshot).is_err() {
                debug!("snapshot receiver dropped, stopping session");
                self.stop_producer();
                return;
            }
        }

        if self.cancel.is_cancelled() {
            self.finish_cancelled();
            return;
        }

        if let Some(snapshot) = self.parser.flush_process_samples() {
            let _ = self.metrics.send(snapshot);
        }

        if let Some(err) = read_error {
            warn!("reading powermetrics output failed: {err}");
            let _ = self.errors.send(StreamError::Read(err));
            self.stop_producer();
            return;
        }

        if let Some(producer) = self.producer.as_mut() {
            match producer.wait() {
                Err(err) if !self.cancel.is_cancelled() => {
                    warn!("powermetrics exited with an error: {err}");
                    let _ = self.errors.send(StreamError::Producer(err));
                }
                _ => {}
            }
        }

        debug!("powermetrics session finished");
    }

    /// Cancellation skips the end-of-stream flush.
    fn finish_cancelled(&mut self) {
        debug!("powermetrics session cancelled");
        let _ = self.errors.send(StreamError::Cancelled);
        self.stop_producer();
    }

    fn stop_producer(&mut self) {
        if let Some(mut producer) = self.producer.take() {
            if let Err(err) = producer.kill() {
                debug!("failed to kill powermetrics: {err}");
            }
            let _ = producer.wait();
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

impl Parser {
    /// Spawn powermetrics and stream its snapshots. Errors are drained and
    /// logged at debug level.
    pub fn run(self, cancel: CancelToken) -> Result<Receiver<Metrics>, StreamError> {
        Ok(self.run_with_errors(cancel)?.drain_errors())
    }

    /// Spawn powermetrics and stream snapshots and errors.
    pub fn run_with_errors(self, cancel: CancelToken) -> Result<Stream, StreamError> {
        let (stdout, child) = spawn_powermetrics(self.config())?;
        Ok(self.run_with_source(BufReader::new(stdout), Some(Box::new(child)), cancel))
    }

    /// Stream snapshots parsed from an arbitrary reader, such as a saved log.
    pub fn run_with_reader<R>(self, reader: R, cancel: CancelToken) -> Stream
    where
        R: Read + Send + 'static,
    {
        self.run_with_source(BufReader::new(reader), None, cancel)
    }

    /// Stream from a line source, waiting on (or killing) `producer` when
    /// the session ends.
    pub fn run_with_source<R>(
        self,
        reader: R,
        producer: Option<Box<dyn Producer>>,
        cancel: CancelToken,
    ) -> Stream
    where
        R: BufRead + Send + 'static,
    {
        let (metrics_tx, metrics_rx) = mpsc::sync_channel(METRICS_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::sync_channel(ERROR_CHANNEL_CAPACITY);

        let session = Session {
            parser: self,
            producer,
            cancel,
            metrics: metrics_tx,
            errors: errors_tx,
        };
        thread::spawn(move || session.run(reader));

        Stream {
            metrics: metrics_rx,
            errors: errors_rx,
        }
    }
}

/// [`Parser::run`] with the default configuration.
pub fn run_default(cancel: CancelToken) -> Result<Receiver<Metrics>, StreamError> {
    Parser::default().run(cancel)
}

/// [`Parser::run_with_errors`] with `config`.
pub fn run_with_config(config: Config, cancel: CancelToken) -> Result<Stream, StreamError> {
    Parser::new(config).run_with_errors(cancel)
}

/// [`Parser::run_with_reader`] with `config`.
pub fn run_reader<R>(reader: R, config: Config, cancel: CancelToken) -> Stream
where
    R: Read + Send + 'static,
{
    Parser::new(config).run_with_reader(reader, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;

    #[derive(Default)]
    struct ProducerLog {
        killed: AtomicBool,
        waited: AtomicBool,
    }

    struct FakeProducer {
        log: Arc<ProducerLog>,
        fail_wait: Option<io::Error>,
    }

    impl FakeProducer {
        fn new(fail_wait: Option<io::Error>) -> (Box<dyn Producer>, Arc<ProducerLog>) {
            let log = Arc::new(ProducerLog::default());
            let producer = Self {
                log: Arc::clone(&log),
                fail_wait,
            };
            (Box::new(producer), log)
        }
    }

    impl Producer for FakeProducer {
        fn wait(&mut self) -> io::Result<()> {
            self.log.waited.store(true, Ordering::SeqCst);
            match self.fail_wait.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn kill(&mut self) -> io::Result<()> {
            self.log.killed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Serves one chunk per `read` call. Cancels `token` while serving the
    /// chunk at `cancel_at`, and fails once the chunks run out if `fail_at_end`.
    struct ScriptedReader {
        chunks: VecDeque<&'static str>,
        served: usize,
        cancel_at: Option<(usize, CancelToken)>,
        fail_at_end: bool,
    }

    impl ScriptedReader {
        fn new(chunks: &[&'static str]) -> Self {
            Self {
                chunks: chunks.iter().copied().collect(),
                served: 0,
                cancel_at: None,
                fail_at_end: false,
            }
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let Some(chunk) = self.chunks.pop_front() else {
                if self.fail_at_end {
                    return Err(io::Error::other("device went away"));
                }
                return Ok(0);
            };
            if let Some((at, token)) = &self.cancel_at {
                if *at == self.served {
                    token.cancel();
                }
            }
            self.served += 1;
            let bytes = chunk.as_bytes();
            out[..bytes.len()].copy_from_slice(bytes);
            Ok(bytes.len())
        }
    }

    fn collect(stream: Stream) -> (Vec<Metrics>, Vec<StreamError>) {
        let metrics: Vec<Metrics> = stream.metrics.iter().collect();
        let errors: Vec<StreamError> = stream.errors.iter().collect();
        (metrics, errors)
    }

    #[test]
    fn test_reader_session_emits_and_closes() {
        let input = "Battery: percent_charge: 36\n\nnot a metric\nCPU Power: 15.5 W";
        let stream = Parser::default().run_with_reader(Cursor::new(input), CancelToken::new());
        let (metrics, errors) = collect(stream);

        assert_eq!(metrics.len(), 2);
        let last = metrics[1].system.unwrap();
        assert_eq!(last.battery_percent, 36.0);
        assert_eq!(last.cpu_power_watts, 15.5);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_cancel_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let (producer, log) = FakeProducer::new(None);
        let reader = BufReader::new(Cursor::new("Battery: percent_charge: 36\n"));

        let stream = Parser::default().run_with_source(reader, Some(producer), cancel);
        let (metrics, errors) = collect(stream);

        assert!(metrics.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_cancelled());
        assert!(log.killed.load(Ordering::SeqCst));
        assert!(log.waited.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_mid_stream_skips_flush() {
        let cancel = CancelToken::new();
        let mut reader = ScriptedReader::new(&[
            "Battery: percent_charge: 36\n",
            "iTerm2  24739  250.43  78.27  0.20  0.00  171.69  0.00\n",
            "CPU Power: 15.5 W\n",
        ]);
        reader.cancel_at = Some((1, cancel.clone()));
        let (producer, log) = FakeProducer::new(None);

        let stream =
            Parser::default().run_with_source(BufReader::new(reader), Some(producer), cancel);
        let (metrics, errors) = collect(stream);

        assert_eq!(metrics.len(), 1);
        assert!(metrics.iter().all(|m| m.processes.is_empty()));
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], StreamError::Cancelled));
        assert!(log.killed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_producer_failure_reported_after_stream() {
        let (producer, log) = FakeProducer::new(Some(io::Error::other("exit status: 1")));
        let reader = BufReader::new(Cursor::new("Battery: percent_charge: 36\n"));

        let stream = Parser::default().run_with_source(reader, Some(producer), CancelToken::new());
        let (metrics, errors) = collect(stream);

        assert_eq!(metrics.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], StreamError::Producer(_)));
        assert!(log.waited.load(Ordering::SeqCst));
        assert!(!log.killed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_read_failure_stops_producer() {
        let mut reader = ScriptedReader::new(&[
            "Battery: percent_charge: 36\n",
            "iTerm2  24739  250.43  78.27  0.20  0.00  171.69  0.00\n",
        ]);
        reader.fail_at_end = true;
        let (producer, log) = FakeProducer::new(None);

        let stream = Parser::default().run_with_source(
            BufReader::new(reader),
            Some(producer),
            CancelToken::new(),
        );
        let (metrics, errors) = collect(stream);

        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[1].processes.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], StreamError::Read(_)));
        assert!(log.killed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_end_of_stream_flushes_task_rows() {
        let input = "Battery: percent_charge: 36\n\
                     iTerm2  24739  250.43  78.27  0.20  0.00  171.69  0.00\n\
                     DEAD_TASKS  -1  323.32  32.03  81.64  0.40  83.04  0.00\n";
        let stream = Parser::default().run_with_reader(Cursor::new(input), CancelToken::new());
        let (metrics, errors) = collect(stream);

        assert_eq!(metrics.len(), 2);
        let flushed = &metrics[1];
        assert!(flushed.system.is_none());
        assert_eq!(flushed.processes.len(), 2);
        assert_eq!(flushed.processes[1].pid, -1);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_dropped_receiver_stops_producer() {
        struct GatedReader {
            gate: mpsc::Receiver<()>,
            sent: bool,
        }

        impl Read for GatedReader {
            fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
                if self.sent {
                    return Ok(0);
                }
                let _ = self.gate.recv();
                self.sent = true;
                let line = b"Battery: percent_charge: 36\n";
                out[..line.len()].copy_from_slice(line);
                Ok(line.len())
            }
        }

        let (open, gate) = mpsc::channel();
        let reader = GatedReader {
            gate,
            sent: false,
        };
        let (producer, log) = FakeProducer::new(None);
        let stream = Parser::default().run_with_source(
            BufReader::new(reader),
            Some(producer),
            CancelToken::new(),
        );

        drop(stream.metrics);
        open.send(()).unwrap();
        let errors: Vec<StreamError> = stream.errors.iter().collect();

        assert!(errors.is_empty());
        assert!(log.killed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drain_errors_keeps_snapshots() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let stream = Parser::default().run_with_reader(Cursor::new(""), cancel);
        let metrics = stream.drain_errors();
        assert_eq!(metrics.iter().count(), 0);

        let stream = run_reader(
            Cursor::new("Battery: percent_charge: 50\n"),
            Config::default(),
            CancelToken::new(),
        );
        let metrics: Vec<Metrics> = stream.drain_errors().iter().collect();
        assert_eq!(metrics.len(), 1);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
