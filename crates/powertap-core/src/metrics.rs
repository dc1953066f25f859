//! Snapshot types emitted by the parser.
//!
//! Every value here is an owned copy taken out of the accumulator at emission
//! time. Nothing in a [`Metrics`] aliases parser state, so a consumer can hold
//! on to snapshots for as long as it likes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Frequency in MHz → percent of time resident at that frequency.
pub type FrequencyResidency = BTreeMap<u32, f64>;

/// Named power state → percent of time resident in that state.
pub type StateResidency = BTreeMap<String, f64>;

/// Sum of every residency bucket in a frequency map.
pub fn total_active(residency: &FrequencyResidency) -> f64 {
    residency.values().sum()
}

// ---------------------------------------------------------------------------
// System gauges
// ---------------------------------------------------------------------------

/// Scalar system gauges.
///
/// Fields are sparse-updated, one or two per line. A gauge that was never
/// reported reads as zero; the source format gives no way to tell the two
/// apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    pub cpu_power_watts: f64,
    pub cpu_frequency_mhz: f64,
    pub gpu_busy_percent: f64,
    pub gpu_power_watts: f64,
    pub gpu_frequency_mhz: f64,
    pub gpu_temperature_c: f64,
    pub cpu_temperature_c: f64,
    pub ane_busy_percent: f64,
    pub ane_power_watts: f64,
    pub dram_power_watts: f64,
    pub combined_power_watts: f64,
    pub battery_percent: f64,
}

// ---------------------------------------------------------------------------
// CPU clusters
// ---------------------------------------------------------------------------

/// Category of a CPU cluster, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterKind {
    Efficiency,
    Performance,
}

impl ClusterKind {
    /// `E-` prefixed clusters are efficiency clusters; everything else is
    /// treated as performance.
    pub fn from_name(name: &str) -> Self {
        if name.to_ascii_uppercase().starts_with("E-") {
            Self::Efficiency
        } else {
            Self::Performance
        }
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Efficiency => write!(f, "Efficiency"),
            Self::Performance => write!(f, "Performance"),
        }
    }
}

/// Summary of one named CPU cluster (e.g. `E-Cluster`, `P1-Cluster`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    pub kind: ClusterKind,
    pub online_percent: f64,
    pub hw_active_freq_mhz: f64,
}

impl ClusterInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ClusterKind::from_name(name),
            online_percent: 0.0,
            hw_active_freq_mhz: 0.0,
        }
    }
}

/// Residency breakdown for one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResidency {
    pub name: String,
    pub kind: ClusterKind,
    pub online_percent: f64,
    pub hw_active_freq_mhz: f64,
    pub hw_active_residency: f64,
    pub hw_active_freq_residency: FrequencyResidency,
    pub idle_residency: f64,
    pub down_residency: f64,
}

impl ClusterResidency {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ClusterKind::from_name(name),
            online_percent: 0.0,
            hw_active_freq_mhz: 0.0,
            hw_active_residency: 0.0,
            hw_active_freq_residency: FrequencyResidency::new(),
            idle_residency: 0.0,
            down_residency: 0.0,
        }
    }
}

/// Residency breakdown for one logical CPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuResidency {
    pub cpu_id: u32,
    pub frequency_mhz: f64,
    pub active_residency: FrequencyResidency,
    pub idle_residency: f64,
    pub down_residency: f64,
}

impl CpuResidency {
    pub fn new(cpu_id: u32) -> Self {
        Self {
            cpu_id,
            frequency_mhz: 0.0,
            active_residency: FrequencyResidency::new(),
            idle_residency: 0.0,
            down_residency: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// GPU
// ---------------------------------------------------------------------------

/// GPU residency singleton.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuResidency {
    pub hw_active_residency: f64,
    pub hw_active_freq_residency: FrequencyResidency,
    /// Software-requested power states (`P1`, `P2`, ...).
    pub sw_requested_states: StateResidency,
    /// Software power states actually in effect (`SW_P1`, `SW_P2`, ...).
    pub sw_states: StateResidency,
    pub idle_residency: f64,
    pub power_milliwatts: f64,
}

/// One per-process GPU line, captured at a single instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuProcessSample {
    pub pid: u32,
    pub name: String,
    pub busy_percent: f64,
    pub active_nanos: u64,
    /// Last GPU frequency seen before this line.
    pub frequency_mhz: f64,
}

// ---------------------------------------------------------------------------
// Tasks, I/O, interrupts
// ---------------------------------------------------------------------------

/// One row of the "Running tasks" table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    /// Negative for pseudo-tasks such as `DEAD_TASKS`.
    pub pid: i64,
    pub name: String,
    pub cpu_ms_per_sec: f64,
    pub user_percent: f64,
    pub deadlines_lt_2ms: f64,
    pub deadlines_2_to_5ms: f64,
    pub wakeups_interrupts: f64,
    pub wakeups_pkg_idle: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub in_packets_per_sec: f64,
    pub in_bytes_per_sec: f64,
    pub out_packets_per_sec: f64,
    pub out_bytes_per_sec: f64,
}

/// Disk rates. Byte rates are stored in bytes/sec even though the source
/// reports KBytes/sec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub read_ops_per_sec: f64,
    pub read_bytes_per_sec: f64,
    pub write_ops_per_sec: f64,
    pub write_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterruptMetrics {
    pub cpu_id: u32,
    pub total_irq: f64,
    pub ipi: f64,
    pub timer: f64,
}

impl InterruptMetrics {
    pub fn new(cpu_id: u32) -> Self {
        Self {
            cpu_id,
            total_irq: 0.0,
            ipi: 0.0,
            timer: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A snapshot emitted by the parser.
///
/// Accumulated snapshots always carry `system`; sections whose backing store
/// is still empty are left out. A GPU-process snapshot carries only
/// `gpu_processes`, and the end-of-stream flush carries only `processes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemSample>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gpu_processes: Vec<GpuProcessSample>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<ProcessSample>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<ClusterInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cpu_residencies: Vec<CpuResidency>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cluster_residencies: Vec<ClusterResidency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_residency: Option<GpuResidency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskMetrics>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interrupts: Vec<InterruptMetrics>,
}

impl Metrics {
    /// Look up a CPU residency entry by id.
    pub fn cpu_residency(&self, cpu_id: u32) -> Option<&CpuResidency> {
        self.cpu_residencies.iter().find(|c| c.cpu_id == cpu_id)
    }

    /// Look up a cluster summary by name.
    pub fn cluster(&self, name: &str) -> Option<&ClusterInfo> {
        self.clusters.iter().find(|c| c.name == name)
    }

    /// Look up an interrupt entry by CPU id.
    pub fn interrupt(&self, cpu_id: u32) -> Option<&InterruptMetrics> {
        self.interrupts.iter().find(|i| i.cpu_id == cpu_id)
    }
}
