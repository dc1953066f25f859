//! Long-lived parser state.
//!
//! One logical sample is assembled from dozens of physically separate lines,
//! so every entity lives in a keyed store that absorbs partial updates. Keys
//! are only ever added. Snapshots are deep copies.

use std::collections::BTreeMap;

use crate::metrics::{
    ClusterInfo, ClusterResidency, CpuResidency, DiskMetrics, GpuResidency, InterruptMetrics,
    Metrics, NetworkMetrics, ProcessSample, SystemSample,
};

#[derive(Debug, Default)]
pub struct Accumulator {
    pub system: SystemSample,
    clusters: BTreeMap<String, ClusterInfo>,
    cpu_residencies: BTreeMap<u32, CpuResidency>,
    cluster_residencies: BTreeMap<String, ClusterResidency>,
    gpu_residency: Option<GpuResidency>,
    network: Option<NetworkMetrics>,
    disk: Option<DiskMetrics>,
    interrupts: BTreeMap<u32, InterruptMetrics>,
    pending_processes: Vec<ProcessSample>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // ensure_* accessors
    // -----------------------------------------------------------------------

    pub fn ensure_cluster(&mut self, name: &str) -> &mut ClusterInfo {
        self.clusters
            .entry(name.to_string())
            .or_insert_with(|| ClusterInfo::new(name))
    }

    pub fn ensure_cpu_residency(&mut self, cpu_id: u32) -> &mut CpuResidency {
        self.cpu_residencies
            .entry(cpu_id)
            .or_insert_with(|| CpuResidency::new(cpu_id))
    }

    /// A new residency record starts from whatever the cluster summary
    /// already knows about online share and frequency.
    pub fn ensure_cluster_residency(&mut self, name: &str) -> &mut ClusterResidency {
        let info = self.clusters.get(name);
        self.cluster_residencies
            .entry(name.to_string())
            .or_insert_with(|| {
                let mut residency = ClusterResidency::new(name);
                if let Some(info) = info {
                    residency.online_percent = info.online_percent;
                    residency.hw_active_freq_mhz = info.hw_active_freq_mhz;
                }
                residency
            })
    }

    pub fn ensure_interrupt(&mut self, cpu_id: u32) -> &mut InterruptMetrics {
        self.interrupts
            .entry(cpu_id)
            .or_insert_with(|| InterruptMetrics::new(cpu_id))
    }

    pub fn gpu_residency_mut(&mut self) -> &mut GpuResidency {
        self.gpu_residency.get_or_insert_with(GpuResidency::default)
    }

    pub fn network_mut(&mut self) -> &mut NetworkMetrics {
        self.network.get_or_insert_with(NetworkMetrics::default)
    }

    pub fn disk_mut(&mut self) -> &mut DiskMetrics {
        self.disk.get_or_insert_with(DiskMetrics::default)
    }

    /// Mutable access to an existing cluster residency record, without
    /// creating one.
    pub fn cluster_residency_mut(&mut self, name: &str) -> Option<&mut ClusterResidency> {
        self.cluster_residencies.get_mut(name)
    }

    /// First interrupt entry, in ascending CPU order, for which `unset`
    /// holds.
    pub fn first_interrupt_where(
        &mut self,
        unset: impl Fn(&InterruptMetrics) -> bool,
    ) -> Option<&mut InterruptMetrics> {
        self.interrupts.values_mut().find(|entry| unset(entry))
    }

    // -----------------------------------------------------------------------
    // Read accessors
    // -----------------------------------------------------------------------

    pub fn cluster(&self, name: &str) -> Option<&ClusterInfo> {
        self.clusters.get(name)
    }

    pub fn cpu_residency(&self, cpu_id: u32) -> Option<&CpuResidency> {
        self.cpu_residencies.get(&cpu_id)
    }

    pub fn cluster_residency(&self, name: &str) -> Option<&ClusterResidency> {
        self.cluster_residencies.get(name)
    }

    pub fn interrupt(&self, cpu_id: u32) -> Option<&InterruptMetrics> {
        self.interrupts.get(&cpu_id)
    }

    pub fn gpu_residency(&self) -> Option<&GpuResidency> {
        self.gpu_residency.as_ref()
    }

    pub fn network(&self) -> Option<&NetworkMetrics> {
        self.network.as_ref()
    }

    pub fn disk(&self) -> Option<&DiskMetrics> {
        self.disk.as_ref()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn cpu_count(&self) -> usize {
        self.cpu_residencies.len()
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.len()
    }

    // -----------------------------------------------------------------------
    // Running tasks
    // -----------------------------------------------------------------------

    pub fn push_pending_process(&mut self, sample: ProcessSample) {
        self.pending_processes.push(sample);
    }

    pub fn has_pending_processes(&self) -> bool {
        !self.pending_processes.is_empty()
    }

    pub fn take_pending_processes(&mut self) -> Vec<ProcessSample> {
        std::mem::take(&mut self.pending_processes)
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    /// Cumulative view of everything seen so far. `system` is always present;
    /// other sections appear once their store is non-empty. Pending process
    /// rows are not included; see [`take_pending_processes`](Self::take_pending_processes).
    pub fn snapshot(&self) -> Metrics {
        Metrics {
            system: Some(self.system),
            gpu_processes: Vec::new(),
            processes: Vec::new(),
            clusters: self.clusters.values().cloned().collect(),
            cpu_residencies: self.cpu_residencies.values().cloned().collect(),
            cluster_residencies: self.cluster_residencies.values().cloned().collect(),
            gpu_residency: self.gpu_residency.clone(),
            network: self.network,
            disk: self.disk,
            interrupts: self.interrupts.values().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ClusterKind;

    #[test]
    fn test_ensure_is_idempotent() {
        let mut acc = Accumulator::new();
        acc.ensure_cluster("E-Cluster").online_percent = 75.5;
        acc.ensure_cluster("E-Cluster");
        assert_eq!(acc.cluster_count(), 1);
        assert_eq!(acc.cluster("E-Cluster").unwrap().online_percent, 75.5);

        acc.ensure_cpu_residency(3).frequency_mhz = 1200.0;
        acc.ensure_cpu_residency(3);
        assert_eq!(acc.cpu_count(), 1);
        assert_eq!(acc.cpu_residency(3).unwrap().frequency_mhz, 1200.0);

        acc.ensure_interrupt(1).timer = 4.0;
        acc.ensure_interrupt(1);
        assert_eq!(acc.interrupt_count(), 1);
        assert_eq!(acc.interrupt(1).unwrap().timer, 4.0);
    }

    #[test]
    fn test_cluster_residency_seeded_from_info() {
        let mut acc = Accumulator::new();
        let info = acc.ensure_cluster("P1-Cluster");
        info.online_percent = 100.0;
        info.hw_active_freq_mhz = 3228.0;

        let residency = acc.ensure_cluster_residency("P1-Cluster");
        assert_eq!(residency.kind, ClusterKind::Performance);
        assert_eq!(residency.online_percent, 100.0);
        assert_eq!(residency.hw_active_freq_mhz, 3228.0);

        let fresh = acc.ensure_cluster_residency("E-Cluster");
        assert_eq!(fresh.kind, ClusterKind::Efficiency);
        assert_eq!(fresh.online_percent, 0.0);
    }

    #[test]
    fn test_singletons_start_absent() {
        let mut acc = Accumulator::new();
        assert!(acc.network().is_none());
        assert!(acc.disk().is_none());
        assert!(acc.gpu_residency().is_none());

        acc.network_mut().in_packets_per_sec = 1.0;
        acc.disk_mut();
        acc.gpu_residency_mut();
        assert_eq!(acc.network().unwrap().in_packets_per_sec, 1.0);
        assert_eq!(acc.disk(), Some(&DiskMetrics::default()));
        assert!(acc.gpu_residency().is_some());
    }

    #[test]
    fn test_snapshot_sections() {
        let mut acc = Accumulator::new();
        let empty = acc.snapshot();
        assert!(empty.system.is_some());
        assert!(empty.clusters.is_empty());
        assert!(empty.network.is_none());

        acc.ensure_cluster("P0-Cluster");
        acc.ensure_cluster("E-Cluster");
        acc.system.battery_percent = 36.0;

        let snap = acc.snapshot();
        assert_eq!(snap.system.unwrap().battery_percent, 36.0);
        let names: Vec<&str> = snap.clusters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["E-Cluster", "P0-Cluster"]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut acc = Accumulator::new();
        acc.ensure_cpu_residency(0).active_residency.insert(1020, 39.0);
        let snap = acc.snapshot();

        acc.ensure_cpu_residency(0).active_residency.insert(1020, 80.0);
        assert_eq!(snap.cpu_residency(0).unwrap().active_residency[&1020], 39.0);
    }

    #[test]
    fn test_pending_processes_drain() {
        let mut acc = Accumulator::new();
        acc.push_pending_process(ProcessSample {
            pid: -1,
            name: "DEAD_TASKS".to_string(),
            cpu_ms_per_sec: 1.0,
            user_percent: 0.0,
            deadlines_lt_2ms: 0.0,
            deadlines_2_to_5ms: 0.0,
            wakeups_interrupts: 0.0,
            wakeups_pkg_idle: 0.0,
        });
        assert!(acc.has_pending_processes());
        assert_eq!(acc.take_pending_processes().len(), 1);
        assert!(!acc.has_pending_processes());
        assert!(acc.take_pending_processes().is_empty());
    }

    #[test]
    fn test_first_interrupt_where_ascending() {
        let mut acc = Accumulator::new();
        acc.ensure_interrupt(2);
        acc.ensure_interrupt(0).total_irq = 10.0;
        acc.ensure_interrupt(1);

        let target = acc.first_interrupt_where(|i| i.total_irq == 0.0).unwrap();
        assert_eq!(target.cpu_id, 1);
    }
}
