//! Per-line dispatch.
//!
//! [`Parser::parse_line`] classifies one line of powermetrics output, folds
//! whatever it carries into the [`Accumulator`], and decides whether the line
//! warrants a snapshot. Lines that nothing recognises are inert.

use crate::accumulator::Accumulator;
use crate::config::Config;
use crate::extract::{
    clamp_percent, derive_busy_percent, has_all, has_any, has_none, parenthesized,
    parse_freq_residency, parse_leading_value_after_colon, parse_named_states,
    parse_power_milliwatts, parse_power_watts, parse_trailing_value, to_nanoseconds,
};
use crate::metrics::{GpuProcessSample, InterruptMetrics, Metrics, ProcessSample};
use crate::patterns::{
    self, Direction, DiskOp, GpuProcessLine, GpuStateKind, InterruptKind, ResidencyKind, TaskRow,
};

const BYTES_PER_KILOBYTE: f64 = 1024.0;

/// Streaming parser for one powermetrics session.
///
/// Not shared between sessions: each session owns its parser and the
/// accumulated state inside it.
#[derive(Debug)]
pub struct Parser {
    config: Config,
    state: Accumulator,
    /// CPU named by the most recent `CPU <n>:` interrupt header.
    interrupt_cpu: Option<u32>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Parser {
    pub fn new(config: Config) -> Self {
        Self {
            config: config.normalized(),
            state: Accumulator::new(),
            interrupt_cpu: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &Accumulator {
        &self.state
    }

    /// Feed one raw line. Returns a snapshot when the line changed anything.
    ///
    /// The `*** Sampled system activity` banner closes the previous cycle:
    /// task rows still pending at that point come back as a processes-only
    /// snapshot.
    ///
    /// A GPU-process line yields a standalone snapshot holding only that
    /// sample. Running-tasks rows are buffered and ride along on the next
    /// accumulated snapshot.
    pub fn parse_line(&mut self, line: &str) -> Option<Metrics> {
        let line = line.trim();
        if patterns::is_sample_banner(line) {
            return self.flush_process_samples();
        }
        if line.is_empty() || line.starts_with("--") || patterns::is_section_banner(line) {
            return None;
        }

        if let Some(process) = patterns::gpu_process(line) {
            return Some(self.gpu_process_snapshot(process));
        }

        if let Some(row) = patterns::task_row(line) {
            self.state.push_pending_process(process_sample(row));
            return None;
        }

        let lower = line.to_ascii_lowercase();

        // Every updater runs; `|=` does not short-circuit.
        let mut wrote = self.update_clusters(line);
        wrote |= self.update_cpus(line);
        wrote |= self.update_network(line);
        wrote |= self.update_disk(line);
        wrote |= self.update_interrupts(line);
        wrote |= self.update_gpu_residency(line);
        wrote |= self.update_battery(line);
        wrote |= self.update_system(line, &lower);

        if !wrote {
            return None;
        }

        let mut snapshot = self.state.snapshot();
        snapshot.processes = self.state.take_pending_processes();
        Some(snapshot)
    }

    /// Emit any buffered running-tasks rows as a processes-only snapshot.
    pub fn flush_process_samples(&mut self) -> Option<Metrics> {
        if !self.state.has_pending_processes() {
            return None;
        }
        Some(Metrics {
            processes: self.state.take_pending_processes(),
            ..Default::default()
        })
    }

    fn gpu_process_snapshot(&self, line: GpuProcessLine<'_>) -> Metrics {
        let active_nanos = to_nanoseconds(line.value, line.unit);
        let sample = GpuProcessSample {
            pid: line.pid,
            name: line.name.to_string(),
            busy_percent: derive_busy_percent(
                active_nanos,
                line.explicit_percent,
                self.config.sample_window,
            ),
            active_nanos,
            frequency_mhz: self.state.system.gpu_frequency_mhz,
        };
        Metrics {
            gpu_processes: vec![sample],
            ..Default::default()
        }
    }

    // -----------------------------------------------------------------------
    // Section updaters
    // -----------------------------------------------------------------------

    fn update_clusters(&mut self, line: &str) -> bool {
        if let Some((name, online)) = patterns::cluster_online(line) {
            let online = clamp_percent(online);
            self.state.ensure_cluster(name).online_percent = online;
            if let Some(residency) = self.state.cluster_residency_mut(name) {
                residency.online_percent = online;
            }
            return true;
        }

        if let Some((name, freq)) = patterns::cluster_hw_frequency(line) {
            self.state.ensure_cluster(name).hw_active_freq_mhz = freq;
            if let Some(residency) = self.state.cluster_residency_mut(name) {
                residency.hw_active_freq_mhz = freq;
            }
            return true;
        }

        if let Some((name, kind, value)) = patterns::cluster_residency(line) {
            let value = clamp_percent(value);
            self.state.ensure_cluster(name);
            let residency = self.state.ensure_cluster_residency(name);
            match kind {
                ResidencyKind::Active => {
                    residency.hw_active_residency = value;
                    if let Some(body) = parenthesized(line) {
                        residency.hw_active_freq_residency = parse_freq_residency(body);
                    }
                }
                ResidencyKind::Idle => residency.idle_residency = value,
                ResidencyKind::Down => residency.down_residency = value,
            }
            return true;
        }

        false
    }

    fn update_cpus(&mut self, line: &str) -> bool {
        if let Some((cpu_id, freq)) = patterns::cpu_frequency(line) {
            self.state.ensure_cpu_residency(cpu_id).frequency_mhz = freq;
            return true;
        }

        let Some((cpu_id, kind, value)) = patterns::cpu_residency(line) else {
            return false;
        };
        let cpu = self.state.ensure_cpu_residency(cpu_id);
        match kind {
            ResidencyKind::Active => {
                if let Some(body) = parenthesized(line) {
                    cpu.active_residency = parse_freq_residency(body);
                }
            }
            ResidencyKind::Idle => cpu.idle_residency = clamp_percent(value),
            ResidencyKind::Down => cpu.down_residency = clamp_percent(value),
        }
        true
    }

    fn update_network(&mut self, line: &str) -> bool {
        let Some((direction, packets, bytes)) = patterns::network(line) else {
            return false;
        };
        let network = self.state.network_mut();
        match direction {
            Direction::In => {
                network.in_packets_per_sec = packets;
                network.in_bytes_per_sec = bytes;
            }
            Direction::Out => {
                network.out_packets_per_sec = packets;
                network.out_bytes_per_sec = bytes;
            }
        }
        true
    }

    fn update_disk(&mut self, line: &str) -> bool {
        let Some((op, ops, kilobytes)) = patterns::disk(line) else {
            return false;
        };
        let disk = self.state.disk_mut();
        match op {
            DiskOp::Read => {
                disk.read_ops_per_sec = ops;
                disk.read_bytes_per_sec = kilobytes * BYTES_PER_KILOBYTE;
            }
            DiskOp::Write => {
                disk.write_ops_per_sec = ops;
                disk.write_bytes_per_sec = kilobytes * BYTES_PER_KILOBYTE;
            }
        }
        true
    }

    fn update_interrupts(&mut self, line: &str) -> bool {
        if let Some(cpu_id) = patterns::interrupt_header(line) {
            self.interrupt_cpu = Some(cpu_id);
            self.state.ensure_interrupt(cpu_id);
            self.state.ensure_cpu_residency(cpu_id);
            return true;
        }

        if let Some(total) = patterns::interrupt_total(line) {
            return self.attach_interrupt(|i| i.total_irq == 0.0, |i| i.total_irq = total);
        }

        match patterns::interrupt_kind(line) {
            Some((InterruptKind::Ipi, rate)) => {
                self.attach_interrupt(|i| i.ipi == 0.0, |i| i.ipi = rate)
            }
            Some((InterruptKind::Timer, rate)) => {
                self.attach_interrupt(|i| i.timer == 0.0, |i| i.timer = rate)
            }
            None => false,
        }
    }

    /// Total/IPI/TIMER lines carry no CPU id. They belong to the CPU of the
    /// last header; before any header, to the lowest CPU whose field is
    /// still unset.
    fn attach_interrupt(
        &mut self,
        unset: impl Fn(&InterruptMetrics) -> bool,
        set: impl FnOnce(&mut InterruptMetrics),
    ) -> bool {
        let target = match self.interrupt_cpu {
            Some(cpu_id) => Some(self.state.ensure_interrupt(cpu_id)),
            None => self.state.first_interrupt_where(unset),
        };
        match target {
            Some(entry) => {
                set(entry);
                true
            }
            None => false,
        }
    }

    fn update_gpu_residency(&mut self, line: &str) -> bool {
        if let Some((kind, value)) = patterns::gpu_residency(line) {
            let value = clamp_percent(value);
            let gpu = self.state.gpu_residency_mut();
            match kind {
                ResidencyKind::Active => {
                    gpu.hw_active_residency = value;
                    if let Some(body) = parenthesized(line) {
                        gpu.hw_active_freq_residency = parse_freq_residency(body);
                    }
                }
                ResidencyKind::Idle => gpu.idle_residency = value,
                ResidencyKind::Down => return false,
            }
            return true;
        }

        let Some((kind, body)) = patterns::gpu_sw_states(line) else {
            return false;
        };
        let gpu = self.state.gpu_residency_mut();
        match kind {
            GpuStateKind::Requested => gpu.sw_requested_states = parse_named_states(body, "P"),
            GpuStateKind::Effective => gpu.sw_states = parse_named_states(body, "SW_P"),
        }
        true
    }

    fn update_battery(&mut self, line: &str) -> bool {
        let Some(percent) = patterns::battery(line) else {
            return false;
        };
        self.state.system.battery_percent = clamp_percent(percent);
        true
    }

    /// Token-gated scalar gauges. `lower` is the ASCII-lowercased line.
    fn update_system(&mut self, line: &str, lower: &str) -> bool {
        let mut wrote = false;

        if has_all(lower, &["cpu", "power"]) && has_none(lower, &["gpu", "combined"]) {
            if let Some(watts) = parse_power_watts(line) {
                self.state.system.cpu_power_watts = watts;
                wrote = true;
            }
        }

        if has_all(lower, &["combined", "power"]) {
            if let Some(watts) = parse_power_watts(line) {
                self.state.system.combined_power_watts = watts;
                wrote = true;
            }
        }

        if has_all(lower, &["cpu", "frequency"]) && has_none(lower, &["gpu"]) {
            if let Some(mhz) = parse_trailing_value(line, "mhz") {
                self.state.system.cpu_frequency_mhz = mhz;
                wrote = true;
            }
        }

        if has_all(lower, &["gpu", "busy"]) {
            if let Some(busy) = parse_trailing_value(line, "%") {
                self.state.system.gpu_busy_percent = clamp_percent(busy);
                wrote = true;
            }
        }

        if has_all(lower, &["gpu", "hw active residency"]) {
            if let Some(busy) = parse_leading_value_after_colon(line, "%") {
                self.state.system.gpu_busy_percent = clamp_percent(busy);
                wrote = true;
            }
        }

        if has_all(lower, &["gpu", "idle residency"]) && self.state.system.gpu_busy_percent == 0.0
        {
            if let Some(idle) = parse_leading_value_after_colon(line, "%") {
                self.state.system.gpu_busy_percent = clamp_percent(100.0 - idle);
                wrote = true;
            }
        }

        if has_all(lower, &["ane", "busy"]) {
            if let Some(busy) = parse_trailing_value(line, "%") {
                self.state.system.ane_busy_percent = clamp_percent(busy);
                wrote = true;
            }
        }

        if has_all(lower, &["ane", "power"]) && has_none(lower, &["combined"]) {
            if let Some(watts) = parse_power_watts(line) {
                self.state.system.ane_power_watts = watts;
                wrote = true;
            }
        }

        if has_all(lower, &["gpu", "power"]) && has_none(lower, &["combined"]) {
            if let Some(watts) = parse_power_watts(line) {
                self.state.system.gpu_power_watts = watts;
                wrote = true;
            }
            if let Some(milliwatts) = parse_power_milliwatts(line) {
                self.state.gpu_residency_mut().power_milliwatts = milliwatts;
                wrote = true;
            }
        }

        if has_all(lower, &["dram", "power"]) {
            if let Some(watts) = parse_power_watts(line) {
                self.state.system.dram_power_watts = watts;
                wrote = true;
            }
        }

        if has_all(lower, &["gpu", "frequency"]) {
            if let Some(mhz) = parse_trailing_value(line, "mhz") {
                self.state.system.gpu_frequency_mhz = mhz;
                wrote = true;
            }
        }

        if lower.contains("temperature") {
            wrote |= self.update_temperature(line, lower);
        }

        wrote
    }

    fn update_temperature(&mut self, line: &str, lower: &str) -> bool {
        let Some(celsius) = parse_trailing_value(line, "c") else {
            return false;
        };
        let system = &mut self.state.system;

        if has_any(lower, &["cpu", "package", "processor"]) {
            system.cpu_temperature_c = celsius;
        } else if has_any(lower, &["gpu", "graphics"]) {
            system.gpu_temperature_c = celsius;
        } else if system.cpu_temperature_c == 0.0 {
            system.cpu_temperature_c = celsius;
        } else if system.gpu_temperature_c == 0.0 {
            system.gpu_temperature_c = celsius;
        } else {
            system.cpu_temperature_c = celsius;
        }
        true
    }
}

fn process_sample(row: TaskRow<'_>) -> ProcessSample {
    let [
        cpu_ms_per_sec,
        user_percent,
        deadlines_lt_2ms,
        deadlines_2_to_5ms,
        wakeups_interrupts,
        wakeups_pkg_idle,
    ] = row.columns;
    ProcessSample {
        pid: row.pid,
        name: row.name.to_string(),
        cpu_ms_per_sec,
        user_percent: clamp_percent(user_percent),
        deadlines_lt_2ms,
        deadlines_2_to_5ms,
        wakeups_interrupts,
        wakeups_pkg_idle,
    }
}
