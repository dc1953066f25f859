//! Line shapes recognised by the parser.
//!
//! Each matcher takes a trimmed line and returns a small typed capture, or
//! `None` when the line has a different shape. Numeric captures that fail to
//! convert count as no match.

use std::sync::LazyLock;

use regex::Regex;

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).expect("Invalid regex"));
    };
}

pattern!(
    GPU_PROCESS,
    r"^pid\s+(\d+)\s+(.+?)\s+([0-9]+(?:\.[0-9]+)?)\s*(us|ms|s)(?:\s+\(([0-9]+(?:\.[0-9]+)?)\s*%\))?(?:\s+.*)?$"
);
pattern!(
    TASK_ROW,
    r"^(.+?)\s+(-?\d+)\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)$"
);
pattern!(
    TASK_ROW_EXTRA_COLUMNS,
    r"^(.+?)\s+(-?\d+)\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)(?:\s+[\d.]+)+$"
);
pattern!(CLUSTER_ONLINE, r"^([A-Z0-9-]+-Cluster) Online:\s*([\d.]+)%");
pattern!(
    CLUSTER_HW_FREQUENCY,
    r"^([A-Z0-9-]+-Cluster) HW active frequency:\s*([\d.]+) MHz"
);
pattern!(
    CLUSTER_RESIDENCY,
    r"^([A-Z0-9-]+-Cluster) (HW active|idle|down) residency:\s*([\d.]+)%"
);
pattern!(CPU_FREQUENCY, r"^CPU (\d+) frequency:\s*([\d.]+) MHz");
pattern!(
    CPU_RESIDENCY,
    r"^CPU (\d+) (active|idle|down) residency:\s*([\d.]+)%"
);
pattern!(INTERRUPT_HEADER, r"^CPU (\d+):$");
pattern!(INTERRUPT_TOTAL, r"^Total IRQ:\s*([\d.]+) interrupts/sec");
pattern!(INTERRUPT_KIND, r"^\|->\s*(IPI|TIMER):\s*([\d.]+) interrupts/sec");
pattern!(
    NETWORK,
    r"^(in|out):\s+([\d.]+) packets/s,\s*([\d.]+) bytes/s"
);
pattern!(
    DISK,
    r"^(read|write):\s+([\d.]+) ops/s\s+([\d.]+) KBytes/s"
);
pattern!(BATTERY, r"Battery: percent_charge:\s*([\d.]+)");
pattern!(GPU_RESIDENCY, r"^GPU (HW active|idle) residency:\s*([\d.]+)%");
pattern!(GPU_SW_STATES, r"^GPU SW (requested state|state):\s*\(([^)]+)\)");

// ---------------------------------------------------------------------------
// Captures
// ---------------------------------------------------------------------------

/// `pid <n> <name> <value><us|ms|s> [(<pct>%)]`
#[derive(Debug, Clone, PartialEq)]
pub struct GpuProcessLine<'a> {
    pub pid: u32,
    pub name: &'a str,
    pub value: f64,
    pub unit: &'a str,
    pub explicit_percent: Option<&'a str>,
}

/// One "Running tasks" row: a name followed by a pid and six numeric columns.
/// Columns past the sixth are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow<'a> {
    pub name: &'a str,
    pub pid: i64,
    pub columns: [f64; 6],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidencyKind {
    Active,
    Idle,
    Down,
}

impl ResidencyKind {
    fn parse(label: &str) -> Option<Self> {
        match label {
            "HW active" | "active" => Some(Self::Active),
            "idle" => Some(Self::Idle),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskOp {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    Ipi,
    Timer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuStateKind {
    /// `GPU SW requested state`, names prefixed `P`.
    Requested,
    /// `GPU SW state`, names prefixed `SW_P`.
    Effective,
}

// ---------------------------------------------------------------------------
// Matchers
// ---------------------------------------------------------------------------

pub fn gpu_process(line: &str) -> Option<GpuProcessLine<'_>> {
    let caps = GPU_PROCESS.captures(line)?;
    Some(GpuProcessLine {
        pid: caps.get(1)?.as_str().parse().ok()?,
        name: caps.get(2)?.as_str().trim().trim_matches(['(', ')']),
        value: caps.get(3)?.as_str().parse().ok()?,
        unit: caps.get(4)?.as_str(),
        explicit_percent: caps.get(5).map(|m| m.as_str()),
    })
}

pub fn task_row(line: &str) -> Option<TaskRow<'_>> {
    // The exact six-column form wins so names ending in a number stay whole.
    let caps = TASK_ROW
        .captures(line)
        .or_else(|| TASK_ROW_EXTRA_COLUMNS.captures(line))?;
    let mut columns = [0.0; 6];
    for (i, column) in columns.iter_mut().enumerate() {
        *column = caps.get(i + 3)?.as_str().parse().ok()?;
    }
    Some(TaskRow {
        name: caps.get(1)?.as_str().trim(),
        pid: caps.get(2)?.as_str().parse().ok()?,
        columns,
    })
}

/// `*** Sampled system activity ... ***`, which opens each sample cycle.
pub fn is_sample_banner(line: &str) -> bool {
    line.starts_with("*** Sampled system activity")
}

/// `**** Section ****` style banners.
pub fn is_section_banner(line: &str) -> bool {
    line.len() >= 6 && line.starts_with("***") && line.ends_with("***")
}

pub fn cluster_online(line: &str) -> Option<(&str, f64)> {
    let caps = CLUSTER_ONLINE.captures(line)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str().parse().ok()?))
}

pub fn cluster_hw_frequency(line: &str) -> Option<(&str, f64)> {
    let caps = CLUSTER_HW_FREQUENCY.captures(line)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str().parse().ok()?))
}

pub fn cluster_residency(line: &str) -> Option<(&str, ResidencyKind, f64)> {
    let caps = CLUSTER_RESIDENCY.captures(line)?;
    Some((
        caps.get(1)?.as_str(),
        ResidencyKind::parse(caps.get(2)?.as_str())?,
        caps.get(3)?.as_str().parse().ok()?,
    ))
}

pub fn cpu_frequency(line: &str) -> Option<(u32, f64)> {
    let caps = CPU_FREQUENCY.captures(line)?;
    Some((
        caps.get(1)?.as_str().parse().ok()?,
        caps.get(2)?.as_str().parse().ok()?,
    ))
}

pub fn cpu_residency(line: &str) -> Option<(u32, ResidencyKind, f64)> {
    let caps = CPU_RESIDENCY.captures(line)?;
    Some((
        caps.get(1)?.as_str().parse().ok()?,
        ResidencyKind::parse(caps.get(2)?.as_str())?,
        caps.get(3)?.as_str().parse().ok()?,
    ))
}

/// `CPU <n>:` on a line of its own, which opens an interrupt block.
pub fn interrupt_header(line: &str) -> Option<u32> {
    INTERRUPT_HEADER.captures(line)?.get(1)?.as_str().parse().ok()
}

pub fn interrupt_total(line: &str) -> Option<f64> {
    INTERRUPT_TOTAL.captures(line)?.get(1)?.as_str().parse().ok()
}

pub fn interrupt_kind(line: &str) -> Option<(InterruptKind, f64)> {
    let caps = INTERRUPT_KIND.captures(line)?;
    let kind = match caps.get(1)?.as_str() {
        "IPI" => InterruptKind::Ipi,
        _ => InterruptKind::Timer,
    };
    Some((kind, caps.get(2)?.as_str().parse().ok()?))
}

/// Returns `(direction, packets/s, bytes/s)`.
pub fn network(line: &str) -> Option<(Direction, f64, f64)> {
    let caps = NETWORK.captures(line)?;
    let direction = match caps.get(1)?.as_str() {
        "in" => Direction::In,
        _ => Direction::Out,
    };
    Some((
        direction,
        caps.get(2)?.as_str().parse().ok()?,
        caps.get(3)?.as_str().parse().ok()?,
    ))
}

/// Returns `(op, ops/s, KBytes/s)`. The caller converts to bytes.
pub fn disk(line: &str) -> Option<(DiskOp, f64, f64)> {
    let caps = DISK.captures(line)?;
    let op = match caps.get(1)?.as_str() {
        "read" => DiskOp::Read,
        _ => DiskOp::Write,
    };
    Some((
        op,
        caps.get(2)?.as_str().parse().ok()?,
        caps.get(3)?.as_str().parse().ok()?,
    ))
}

pub fn battery(line: &str) -> Option<f64> {
    BATTERY.captures(line)?.get(1)?.as_str().parse().ok()
}

pub fn gpu_residency(line: &str) -> Option<(ResidencyKind, f64)> {
    let caps = GPU_RESIDENCY.captures(line)?;
    Some((
        ResidencyKind::parse(caps.get(1)?.as_str())?,
        caps.get(2)?.as_str().parse().ok()?,
    ))
}

/// Returns the state kind and the raw parenthesised body.
pub fn gpu_sw_states(line: &str) -> Option<(GpuStateKind, &str)> {
    let caps = GPU_SW_STATES.captures(line)?;
    let kind = match caps.get(1)?.as_str() {
        "requested state" => GpuStateKind::Requested,
        _ => GpuStateKind::Effective,
    };
    Some((kind, caps.get(2)?.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_process_with_percent() {
        let m = gpu_process("pid 1234 Safari 5.2ms (85.5%)").unwrap();
        assert_eq!(m.pid, 1234);
        assert_eq!(m.name, "Safari");
        assert_eq!(m.value, 5.2);
        assert_eq!(m.unit, "ms");
        assert_eq!(m.explicit_percent, Some("85.5"));
    }

    #[test]
    fn test_gpu_process_name_with_spaces_and_trailer() {
        let m = gpu_process("pid 42 Google Chrome Helper 12us extra columns").unwrap();
        assert_eq!(m.pid, 42);
        assert_eq!(m.name, "Google Chrome Helper");
        assert_eq!(m.value, 12.0);
        assert_eq!(m.unit, "us");
        assert_eq!(m.explicit_percent, None);
    }

    #[test]
    fn test_gpu_process_parenthesized_name() {
        let m = gpu_process("pid 5678   (chrome)   2.1ms  (45.0%)").unwrap();
        assert_eq!(m.pid, 5678);
        assert_eq!(m.name, "chrome");
        assert_eq!(m.value, 2.1);
        assert_eq!(m.explicit_percent, Some("45.0"));
    }

    #[test]
    fn test_gpu_process_rejects_other_shapes() {
        assert!(gpu_process("pid abc Safari 5ms").is_none());
        assert!(gpu_process("pid 99999999999 Safari 5ms").is_none());
        assert!(gpu_process("CPU Power: 5 mW").is_none());
    }

    #[test]
    fn test_task_row() {
        let row = task_row("WindowServer  412  26.06  68.38  12.50  0.00  301.26  109.59").unwrap();
        assert_eq!(row.name, "WindowServer");
        assert_eq!(row.pid, 412);
        assert_eq!(row.columns, [26.06, 68.38, 12.50, 0.00, 301.26, 109.59]);

        let dead = task_row("DEAD_TASKS  -1  0.50  0.00  0.00  0.00  1.00  0.00").unwrap();
        assert_eq!(dead.pid, -1);

        let spaced = task_row("Code Helper (Renderer)  901  1.0  2.0  3.0  4.0  5.0  6.0").unwrap();
        assert_eq!(spaced.name, "Code Helper (Renderer)");
    }

    #[test]
    fn test_task_row_extra_columns() {
        let row = task_row("iTerm2  24739  250.43  78.27  0.20  0.00  171.69  0.00  12.5").unwrap();
        assert_eq!(row.name, "iTerm2");
        assert_eq!(row.pid, 24739);
        assert_eq!(row.columns, [250.43, 78.27, 0.20, 0.00, 171.69, 0.00]);

        let numbered = task_row("Helper 2  901  1.0  2.0  3.0  4.0  5.0  6.0").unwrap();
        assert_eq!(numbered.name, "Helper 2");
        assert_eq!(numbered.pid, 901);
    }

    #[test]
    fn test_task_row_rejects_short_rows() {
        assert!(task_row("Name  ID  CPU ms/s  User%  Deadlines (<2 ms, 2-5 ms)").is_none());
        assert!(task_row("CPU Power: 15.5 W").is_none());
    }

    #[test]
    fn test_section_banner() {
        assert!(is_section_banner("**** Processor usage ****"));
        assert!(is_section_banner("*** Sampled system activity ***"));
        assert!(!is_section_banner("***"));
        assert!(!is_section_banner("*** open"));
    }

    #[test]
    fn test_cluster_lines() {
        assert_eq!(cluster_online("E-Cluster Online: 100%"), Some(("E-Cluster", 100.0)));
        assert_eq!(
            cluster_hw_frequency("P1-Cluster HW active frequency: 3228 MHz"),
            Some(("P1-Cluster", 3228.0))
        );
        assert_eq!(
            cluster_residency("P0-Cluster HW active residency:  12.50% (600 MHz: 10%)"),
            Some(("P0-Cluster", ResidencyKind::Active, 12.5))
        );
        assert_eq!(
            cluster_residency("E-Cluster idle residency:  30.00%"),
            Some(("E-Cluster", ResidencyKind::Idle, 30.0))
        );
        assert_eq!(
            cluster_residency("E-Cluster down residency:   5.00%"),
            Some(("E-Cluster", ResidencyKind::Down, 5.0))
        );
    }

    #[test]
    fn test_cpu_lines() {
        assert_eq!(cpu_frequency("CPU 0 frequency: 1286 MHz"), Some((0, 1286.0)));
        assert_eq!(
            cpu_residency("CPU 3 active residency:  55.11% (1020 MHz: 39%)"),
            Some((3, ResidencyKind::Active, 55.11))
        );
        assert_eq!(
            cpu_residency("CPU 3 idle residency:  44.89%"),
            Some((3, ResidencyKind::Idle, 44.89))
        );
        assert_eq!(interrupt_header("CPU 7:"), Some(7));
        assert_eq!(interrupt_header("CPU 7: something"), None);
    }

    #[test]
    fn test_interrupt_lines() {
        assert_eq!(interrupt_total("Total IRQ: 1234.56 interrupts/sec"), Some(1234.56));
        assert_eq!(
            interrupt_kind("|-> IPI: 111.00 interrupts/sec"),
            Some((InterruptKind::Ipi, 111.0))
        );
        assert_eq!(
            interrupt_kind("|-> TIMER: 99.50 interrupts/sec"),
            Some((InterruptKind::Timer, 99.5))
        );
    }

    #[test]
    fn test_io_lines() {
        assert_eq!(
            network("in:  10.00 packets/s, 2048.00 bytes/s"),
            Some((Direction::In, 10.0, 2048.0))
        );
        assert_eq!(
            network("out: 5.00 packets/s, 512.00 bytes/s"),
            Some((Direction::Out, 5.0, 512.0))
        );
        assert_eq!(
            disk("read: 3.00 ops/s 48.00 KBytes/s"),
            Some((DiskOp::Read, 3.0, 48.0))
        );
        assert_eq!(
            disk("write: 7.50 ops/s 100.00 KBytes/s"),
            Some((DiskOp::Write, 7.5, 100.0))
        );
    }

    #[test]
    fn test_battery_and_gpu() {
        assert_eq!(battery("Battery: percent_charge: 36"), Some(36.0));
        assert_eq!(
            gpu_residency("GPU HW active residency:   1.63% (338 MHz: 1.6%)"),
            Some((ResidencyKind::Active, 1.63))
        );
        assert_eq!(
            gpu_residency("GPU idle residency:  98.37%"),
            Some((ResidencyKind::Idle, 98.37))
        );
        assert_eq!(
            gpu_sw_states("GPU SW requested state: (P1 : 100% P2 :   0%)"),
            Some((GpuStateKind::Requested, "P1 : 100% P2 :   0%"))
        );
        assert_eq!(
            gpu_sw_states("GPU SW state: (SW_P1 : 1.6% SW_P2 :   0%)"),
            Some((GpuStateKind::Effective, "SW_P1 : 1.6% SW_P2 :   0%"))
        );
    }
}
