pub mod replay;
pub mod watch;

use std::fmt::Write as _;
use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};

use clap::Args;
use log::warn;
use powertap_core::{Metrics, Stream, StreamError, total_active};

// ---------------------------------------------------------------------------
// Shared flags
// ---------------------------------------------------------------------------

/// Output flags shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct OutputArgs {
    /// Print one JSON object per rendered snapshot
    #[arg(long)]
    pub json: bool,

    /// Show system gauges (power, frequency, temperature) and clusters
    #[arg(long)]
    pub system: bool,

    /// Show GPU processes and running tasks
    #[arg(long)]
    pub process: bool,

    /// Show per-CPU and per-cluster residency
    #[arg(long)]
    pub cpu_residency: bool,

    /// Show GPU residency and software power states
    #[arg(long)]
    pub gpu_residency: bool,

    /// Show network activity
    #[arg(long)]
    pub network: bool,

    /// Show disk activity
    #[arg(long)]
    pub disk: bool,

    /// Show battery charge
    #[arg(long)]
    pub battery: bool,

    /// Show interrupt distribution
    #[arg(long)]
    pub interrupts: bool,

    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(long)]
    pub debug: bool,
}

/// Which sections to render. No section flag at all means every section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sections {
    pub system: bool,
    pub process: bool,
    pub cpu_residency: bool,
    pub gpu_residency: bool,
    pub network: bool,
    pub disk: bool,
    pub battery: bool,
    pub interrupts: bool,
}

impl Sections {
    pub const ALL: Sections = Sections {
        system: true,
        process: true,
        cpu_residency: true,
        gpu_residency: true,
        network: true,
        disk: true,
        battery: true,
        interrupts: true,
    };
}

impl OutputArgs {
    pub fn sections(&self) -> Sections {
        let selected = Sections {
            system: self.system,
            process: self.process,
            cpu_residency: self.cpu_residency,
            gpu_residency: self.gpu_residency,
            network: self.network,
            disk: self.disk,
            battery: self.battery,
            interrupts: self.interrupts,
        };
        let any = selected.system
            || selected.process
            || selected.cpu_residency
            || selected.gpu_residency
            || selected.network
            || selected.disk
            || selected.battery
            || selected.interrupts;
        if any { selected } else { Sections::ALL }
    }
}

/// Install env_logger. `RUST_LOG` wins over `--debug`.
pub fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

// ---------------------------------------------------------------------------
// Section selection and merging
// ---------------------------------------------------------------------------

/// Copy of `metrics` restricted to the selected sections.
pub fn select_sections(metrics: &Metrics, sections: Sections) -> Metrics {
    fn keep<T: Clone>(on: bool, value: &T) -> Option<T> {
        on.then(|| value.clone())
    }

    Metrics {
        system: if sections.system || sections.battery {
            metrics.system
        } else {
            None
        },
        gpu_processes: keep(sections.process, &metrics.gpu_processes).unwrap_or_default(),
        processes: keep(sections.process, &metrics.processes).unwrap_or_default(),
        clusters: keep(sections.system, &metrics.clusters).unwrap_or_default(),
        cpu_residencies: keep(sections.cpu_residency, &metrics.cpu_residencies)
            .unwrap_or_default(),
        cluster_residencies: keep(sections.cpu_residency, &metrics.cluster_residencies)
            .unwrap_or_default(),
        gpu_residency: keep(sections.gpu_residency, &metrics.gpu_residency).flatten(),
        network: keep(sections.network, &metrics.network).flatten(),
        disk: keep(sections.disk, &metrics.disk).flatten(),
        interrupts: keep(sections.interrupts, &metrics.interrupts).unwrap_or_default(),
    }
}

/// Fold `next` into the pending view. Cumulative snapshots replace the
/// accumulated sections; GPU-process samples pile up until the next render.
pub fn merge(view: &mut Metrics, next: Metrics) {
    if next.system.is_some() {
        view.system = next.system;
        view.clusters = next.clusters;
        view.cpu_residencies = next.cpu_residencies;
        view.cluster_residencies = next.cluster_residencies;
        view.gpu_residency = next.gpu_residency;
        view.network = next.network;
        view.disk = next.disk;
        view.interrupts = next.interrupts;
    }
    view.gpu_processes.extend(next.gpu_processes);
    if !next.processes.is_empty() {
        view.processes = next.processes;
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Write one snapshot. Returns `Ok(false)` when the selection left nothing
/// to show.
pub fn emit<W: Write>(out: &mut W, metrics: &Metrics, output: &OutputArgs) -> io::Result<bool> {
    let sections = output.sections();
    let view = select_sections(metrics, sections);
    if view == Metrics::default() {
        return Ok(false);
    }

    if output.json {
        serde_json::to_writer(&mut *out, &view)?;
        writeln!(out)?;
    } else {
        out.write_all(render_text(&view, sections).as_bytes())?;
    }
    out.flush()?;
    Ok(true)
}

pub fn render_text(metrics: &Metrics, sections: Sections) -> String {
    let mut s = String::new();

    if let Some(system) = metrics.system.filter(|_| sections.system) {
        let _ = writeln!(s, "== System ==");
        let _ = writeln!(
            s,
            "  CPU   {:>8.3} W  {:>6.0} MHz  {:>5.1} C",
            system.cpu_power_watts, system.cpu_frequency_mhz, system.cpu_temperature_c
        );
        let _ = writeln!(
            s,
            "  GPU   {:>8.3} W  {:>6.0} MHz  {:>5.1} C  busy {:>5.1}%",
            system.gpu_power_watts,
            system.gpu_frequency_mhz,
            system.gpu_temperature_c,
            system.gpu_busy_percent
        );
        let _ = writeln!(
            s,
            "  ANE   {:>8.3} W  busy {:>5.1}%",
            system.ane_power_watts, system.ane_busy_percent
        );
        let _ = writeln!(s, "  DRAM  {:>8.3} W", system.dram_power_watts);
        let _ = writeln!(s, "  Total {:>8.3} W", system.combined_power_watts);
        for cluster in &metrics.clusters {
            let _ = writeln!(
                s,
                "  {:<12} {:<11} online {:>5.1}%  {:>6.0} MHz",
                cluster.name,
                cluster.kind.to_string(),
                cluster.online_percent,
                cluster.hw_active_freq_mhz
            );
        }
    }

    if let Some(system) = metrics.system.filter(|_| sections.battery) {
        let _ = writeln!(s, "== Battery ==");
        let _ = writeln!(s, "  charge {:>5.1}%", system.battery_percent);
    }

    if !metrics.cluster_residencies.is_empty() || !metrics.cpu_residencies.is_empty() {
        let _ = writeln!(s, "== CPU residency ==");
        for cluster in &metrics.cluster_residencies {
            let _ = writeln!(
                s,
                "  {:<12} active {:>5.1}%  idle {:>5.1}%  down {:>5.1}%",
                cluster.name,
                cluster.hw_active_residency,
                cluster.idle_residency,
                cluster.down_residency
            );
        }
        for cpu in &metrics.cpu_residencies {
            let _ = writeln!(
                s,
                "  CPU {:<8} active {:>5.1}%  idle {:>5.1}%  down {:>5.1}%  {:>6.0} MHz",
                cpu.cpu_id,
                total_active(&cpu.active_residency),
                cpu.idle_residency,
                cpu.down_residency,
                cpu.frequency_mhz
            );
        }
    }

    if let Some(gpu) = &metrics.gpu_residency {
        let _ = writeln!(s, "== GPU residency ==");
        let _ = writeln!(
            s,
            "  active {:>5.1}%  idle {:>5.1}%  {:>7.1} mW",
            gpu.hw_active_residency, gpu.idle_residency, gpu.power_milliwatts
        );
        let active_states: Vec<String> = gpu
            .sw_states
            .iter()
            .filter(|(_, pct)| **pct > 0.0)
            .map(|(name, pct)| format!("{name} {pct:.1}%"))
            .collect();
        if !active_states.is_empty() {
            let _ = writeln!(s, "  states {}", active_states.join("  "));
        }
    }

    if !metrics.gpu_processes.is_empty() || !metrics.processes.is_empty() {
        let _ = writeln!(s, "== Processes ==");
        for process in &metrics.gpu_processes {
            let _ = writeln!(
                s,
                "  gpu  {:>7} {:<24} busy {:>5.1}%  {:>10} ns",
                process.pid, process.name, process.busy_percent, process.active_nanos
            );
        }
        for process in &metrics.processes {
            let _ = writeln!(
                s,
                "  task {:>7} {:<24} {:>8.2} ms/s  user {:>5.1}%  wakeups {:>7.2}",
                process.pid,
                process.name,
                process.cpu_ms_per_sec,
                process.user_percent,
                process.wakeups_interrupts
            );
        }
    }

    if let Some(network) = &metrics.network {
        let _ = writeln!(s, "== Network ==");
        let _ = writeln!(
            s,
            "  in  {:>9.2} pkt/s {:>12.2} B/s",
            network.in_packets_per_sec, network.in_bytes_per_sec
        );
        let _ = writeln!(
            s,
            "  out {:>9.2} pkt/s {:>12.2} B/s",
            network.out_packets_per_sec, network.out_bytes_per_sec
        );
    }

    if let Some(disk) = &metrics.disk {
        let _ = writeln!(s, "== Disk ==");
        let _ = writeln!(
            s,
            "  read  {:>9.2} ops/s {:>12.2} B/s",
            disk.read_ops_per_sec, disk.read_bytes_per_sec
        );
        let _ = writeln!(
            s,
            "  write {:>9.2} ops/s {:>12.2} B/s",
            disk.write_ops_per_sec, disk.write_bytes_per_sec
        );
    }

    if !metrics.interrupts.is_empty() {
        let _ = writeln!(s, "== Interrupts ==");
        for irq in &metrics.interrupts {
            let _ = writeln!(
                s,
                "  CPU {:<4} total {:>9.2}/s  ipi {:>9.2}/s  timer {:>9.2}/s",
                irq.cpu_id, irq.total_irq, irq.ipi, irq.timer
            );
        }
    }

    s.push('\n');
    s
}

// ---------------------------------------------------------------------------
// Session pump
// ---------------------------------------------------------------------------

/// How often the pump renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Every snapshot, as it arrives.
    Every,
    /// The merged view, at most once per interval, plus once at the end.
    AtMost(Duration),
    /// The merged view, once, after the stream closes.
    Final,
}

/// Consume a session until both channels close. Errors are drained on a
/// helper thread and returned in arrival order.
pub fn pump(stream: Stream, output: &OutputArgs, cadence: Cadence) -> Vec<StreamError> {
    let Stream { metrics, errors } = stream;
    let errors = thread::spawn(move || errors.iter().collect::<Vec<_>>());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut view = Metrics::default();
    let mut dirty = false;
    let mut last_render = Instant::now();

    for snapshot in metrics {
        if cadence == Cadence::Every {
            if let Err(e) = emit(&mut out, &snapshot, output) {
                warn!("stdout closed: {e}");
                break;
            }
            continue;
        }

        merge(&mut view, snapshot);
        dirty = true;

        if let Cadence::AtMost(interval) = cadence {
            if last_render.elapsed() >= interval {
                if let Err(e) = emit(&mut out, &view, output) {
                    warn!("stdout closed: {e}");
                    dirty = false;
                    break;
                }
                view.gpu_processes.clear();
                view.processes.clear();
                dirty = false;
                last_render = Instant::now();
            }
        }
    }

    if dirty {
        let _ = emit(&mut out, &view, output);
    }

    errors.join().unwrap_or_default()
}

/// Print non-cancellation errors. Returns true when any were fatal.
pub fn report_errors(errors: &[StreamError]) -> bool {
    let mut fatal = false;
    for err in errors.iter().filter(|e| !e.is_cancelled()) {
        eprintln!("Error: {err}");
        fatal = true;
    }
    fatal
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Parse a duration string like "500ms", "1s", "2m". A bare number is
/// seconds. Zero is rejected.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        (s, 1000)
    };

    let value: u64 = numeric
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {s}"))?;
    if value == 0 {
        return Err(format!("duration must be positive: {s}"));
    }

    value
        .checked_mul(multiplier)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration too large: {s}"))
}
