//! # powertap-core
//!
//! **Structured samples out of macOS `powermetrics`.**
//!
//! `powertap-core` runs `powermetrics` (or reads a saved capture), parses its
//! free-text stanza output line by line, and republishes what it finds as
//! typed [`Metrics`] snapshots: power, frequency, residency, GPU processes,
//! running tasks, network, disk, interrupts and battery.
//!
//! ## Quick Start
//!
//! ```no_run
//! use powertap_core::{CancelToken, Config, Parser};
//!
//! let cancel = CancelToken::new();
//! let stream = Parser::new(Config::default())
//!     .run_with_errors(cancel.clone())
//!     .expect("powermetrics should start");
//!
//! for snapshot in stream.metrics.iter().take(10) {
//!     if let Some(system) = snapshot.system {
//!         println!("CPU {:.2} W  GPU {:.2} W", system.cpu_power_watts, system.gpu_power_watts);
//!     }
//! }
//! cancel.cancel();
//! ```
//!
//! ## Architecture
//!
//! byte source → lines → extractors → Accumulator → Parser → channels
//!
//! - [`extract`] and [`patterns`] are stateless and never fail on content.
//! - [`Accumulator`] owns the per-CPU, per-cluster and singleton stores.
//!   Keys are only ever added.
//! - [`Parser`] dispatches each line to every section updater and emits a
//!   cumulative snapshot whenever one of them wrote something.
//! - [`stream`] runs a session on its own thread with a bounded snapshot
//!   channel and a bounded error channel.

pub mod accumulator;
pub mod config;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod parser;
pub mod patterns;
pub mod process;
pub mod stream;

pub use accumulator::Accumulator;
pub use config::{
    Config, DEFAULT_POWERMETRICS_PATH, DEFAULT_SAMPLE_WINDOW, POWERMETRICS_PATH_ENV,
    default_powermetrics_args, default_powermetrics_path,
};
pub use error::StreamError;
pub use metrics::{
    ClusterInfo, ClusterKind, ClusterResidency, CpuResidency, DiskMetrics, FrequencyResidency,
    GpuProcessSample, GpuResidency, InterruptMetrics, Metrics, NetworkMetrics, ProcessSample,
    StateResidency, SystemSample, total_active,
};
pub use parser::Parser;
pub use process::spawn_powermetrics;
pub use stream::{
    CancelToken, ERROR_CHANNEL_CAPACITY, METRICS_CHANNEL_CAPACITY, Producer, Stream, run_default,
    run_reader, run_with_config,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
