//! Parsers for the `/proc` and `/sys` files the provider reads.
//!
//! These are pure functions over file content so they can be tested with
//! string inputs.

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parses a kernel CPU/node range list such as `0-3,8,10-11`.
///
/// Returns ids in ascending order without duplicates. Blank input is an
/// empty list.
pub fn parse_cpu_list(content: &str) -> Result<Vec<usize>, ParseError> {
    let mut ids = Vec::new();

    for part in content.trim().split(',').filter(|p| !p.is_empty()) {
        let parse = |s: &str| -> Result<usize, ParseError> {
            s.trim()
                .parse()
                .map_err(|_| ParseError::new(format!("invalid id in range list: {:?}", s)))
        };

        match part.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (parse(lo)?, parse(hi)?);
                if hi < lo {
                    return Err(ParseError::new(format!("descending range: {}", part)));
                }
                ids.extend(lo..=hi);
            }
            None => ids.push(parse(part)?),
        }
    }

    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Single CPU line from `/proc/stat`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuStat {
    pub cpu_id: Option<usize>, // None for aggregate "cpu" line
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

/// Global stats from `/proc/stat`.
#[derive(Debug, Clone, Default)]
pub struct GlobalStat {
    pub cpus: Vec<CpuStat>,
    pub ctxt: u64,
    pub btime: u64,
    pub processes: u64,
    pub procs_running: u64,
    pub procs_blocked: u64,
}

impl GlobalStat {
    /// Line of one CPU; offline CPUs have none.
    pub fn cpu(&self, id: usize) -> Option<&CpuStat> {
        self.cpus.iter().find(|c| c.cpu_id == Some(id))
    }
}

/// Parses `/proc/stat` content.
pub fn parse_global_stat(content: &str) -> Result<GlobalStat, ParseError> {
    let mut stat = GlobalStat::default();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        let get = |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        if let Some(suffix) = parts[0].strip_prefix("cpu") {
            let cpu_id = if suffix.is_empty() {
                None
            } else {
                Some(
                    suffix
                        .parse()
                        .map_err(|_| ParseError::new(format!("invalid cpu line: {}", parts[0])))?,
                )
            };

            stat.cpus.push(CpuStat {
                cpu_id,
                user: get(1),
                nice: get(2),
                system: get(3),
                idle: get(4),
                iowait: get(5),
                irq: get(6),
                softirq: get(7),
                steal: get(8),
            });
        } else {
            match parts[0] {
                "ctxt" => stat.ctxt = get(1),
                "btime" => stat.btime = get(1),
                "processes" => stat.processes = get(1),
                "procs_running" => stat.procs_running = get(1),
                "procs_blocked" => stat.procs_blocked = get(1),
                _ => {}
            }
        }
    }

    if stat.cpus.is_empty() {
        return Err(ParseError::new("no cpu lines in stat"));
    }
    Ok(stat)
}

/// Parsed data from `/proc/meminfo`, in kB.
#[derive(Debug, Clone, Default)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    pub mem_available: u64,
    pub swap_total: u64,
    pub swap_free: u64,
    pub committed_as: u64,
}

/// Parses `/proc/meminfo` content.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let mut info = MemInfo::default();

    let parse_kb = |line: &str| -> u64 {
        line.split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    for line in content.lines() {
        if line.starts_with("MemTotal:") {
            info.mem_total = parse_kb(line);
        } else if line.starts_with("MemFree:") {
            info.mem_free = parse_kb(line);
        } else if line.starts_with("MemAvailable:") {
            info.mem_available = parse_kb(line);
        } else if line.starts_with("SwapTotal:") {
            info.swap_total = parse_kb(line);
        } else if line.starts_with("SwapFree:") {
            info.swap_free = parse_kb(line);
        } else if line.starts_with("Committed_AS:") {
            info.committed_as = parse_kb(line);
        }
    }

    if info.mem_total == 0 {
        return Err(ParseError::new("missing MemTotal in meminfo"));
    }
    Ok(info)
}

/// One row of `/proc/interrupts`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterruptLine {
    /// Text before the colon: an IRQ number or a name like `LOC`.
    pub label: String,
    /// Count per CPU column; shorter than the header for lines like `ERR`.
    pub counts: Vec<u64>,
    /// Text after the counts: controller, trigger and device names. Empty
    /// for the `ERR` and `MIS` totals.
    pub description: String,
}

impl InterruptLine {
    pub fn total(&self) -> u64 {
        self.counts.iter().fold(0u64, |acc, c| acc.wrapping_add(*c))
    }

    /// IRQ number for numbered lines.
    pub fn irq(&self) -> Option<i32> {
        self.label.parse().ok()
    }
}

/// Parsed `/proc/interrupts`.
#[derive(Debug, Clone, Default)]
pub struct InterruptTable {
    /// CPU ids of the count columns, from the header.
    pub cpus: Vec<usize>,
    pub lines: Vec<InterruptLine>,
}

impl InterruptTable {
    pub fn line(&self, label: &str) -> Option<&InterruptLine> {
        self.lines.iter().find(|l| l.label == label)
    }

    /// Sum of one CPU's column over every line.
    pub fn cpu_total(&self, cpu: usize) -> u64 {
        let Some(col) = self.cpus.iter().position(|c| *c == cpu) else {
            return 0;
        };
        self.lines
            .iter()
            .filter_map(|l| l.counts.get(col))
            .fold(0u64, |acc, c| acc.wrapping_add(*c))
    }
}

/// Parses `/proc/interrupts` content.
pub fn parse_interrupts(content: &str) -> Result<InterruptTable, ParseError> {
    let mut lines = content.lines();
    let header = lines
        .next()
        .ok_or_else(|| ParseError::new("empty interrupts file"))?;

    let cpus = header
        .split_whitespace()
        .map(|col| {
            col.strip_prefix("CPU")
                .and_then(|id| id.parse().ok())
                .ok_or_else(|| ParseError::new(format!("invalid interrupts header column: {}", col)))
        })
        .collect::<Result<Vec<usize>, _>>()?;

    let mut table = InterruptTable {
        cpus,
        lines: Vec::new(),
    };

    for line in lines {
        let Some((label, rest)) = line.split_once(':') else {
            continue;
        };
        let mut tokens = rest.split_whitespace().peekable();
        let mut counts = Vec::with_capacity(table.cpus.len());
        while counts.len() < table.cpus.len() {
            match tokens.peek().and_then(|s| s.parse::<u64>().ok()) {
                Some(count) => {
                    counts.push(count);
                    tokens.next();
                }
                None => break,
            }
        }
        table.lines.push(InterruptLine {
            label: label.trim().to_string(),
            counts,
            description: tokens.collect::<Vec<_>>().join(" "),
        });
    }

    Ok(table)
}

/// Parsed `/proc/sys/fs/dentry-state`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DentryState {
    pub nr_dentry: u64,
    pub nr_unused: u64,
    pub age_limit: u64,
    pub want_pages: u64,
    pub nr_negative: u64,
}

/// Parses `/proc/sys/fs/dentry-state` content.
pub fn parse_dentry_state(content: &str) -> Result<DentryState, ParseError> {
    let values: Vec<u64> = content
        .split_whitespace()
        .map(|s| {
            s.parse()
                .map_err(|_| ParseError::new(format!("invalid dentry-state value: {}", s)))
        })
        .collect::<Result<_, _>>()?;

    if values.len() < 4 {
        return Err(ParseError::new(format!(
            "not enough fields in dentry-state: expected 4+, got {}",
            values.len()
        )));
    }

    Ok(DentryState {
        nr_dentry: values[0],
        nr_unused: values[1],
        age_limit: values[2],
        want_pages: values[3],
        nr_negative: values.get(4).copied().unwrap_or(0),
    })
}

/// Parses `/proc/uptime` content into seconds since boot.
pub fn parse_uptime(content: &str) -> Result<f64, ParseError> {
    content
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::new("empty uptime"))?
        .parse()
        .map_err(|_| ParseError::new("invalid uptime"))
}

/// Parses a `/sys` CPU `online` flag.
pub fn parse_online_flag(content: &str) -> Result<bool, ParseError> {
    match content.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(ParseError::new(format!("invalid online flag: {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3\n").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpu_list("0,2-3,8").unwrap(), vec![0, 2, 3, 8]);
        assert_eq!(parse_cpu_list("5").unwrap(), vec![5]);
        assert_eq!(parse_cpu_list("3,1-2,2").unwrap(), vec![1, 2, 3]);
        assert!(parse_cpu_list("\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_cpu_list_invalid() {
        assert!(parse_cpu_list("a-3").is_err());
        assert!(parse_cpu_list("3-1").is_err());
    }

    #[test]
    fn test_parse_global_stat() {
        let content = "\
cpu  10000 500 3000 80000 1000 200 100 7 0 0
cpu0 5000 250 1500 40000 500 100 50 3 0 0
cpu2 5000 250 1500 40000 500 100 50 4 0 0
intr 1000000 50 0 0
ctxt 500000
btime 1700000000
processes 12345
procs_running 3
procs_blocked 1
";
        let stat = parse_global_stat(content).unwrap();

        assert_eq!(stat.cpus.len(), 3);
        assert_eq!(stat.cpus[0].cpu_id, None);
        assert_eq!(stat.cpu(2).unwrap().steal, 4);
        assert!(stat.cpu(1).is_none());
        assert_eq!(stat.cpu(0).unwrap().softirq, 50);
        assert_eq!(stat.ctxt, 500000);
        assert_eq!(stat.btime, 1700000000);
        assert_eq!(stat.processes, 12345);
        assert_eq!(stat.procs_running, 3);
        assert_eq!(stat.procs_blocked, 1);
    }

    #[test]
    fn test_parse_global_stat_short_lines() {
        // Old kernels have fewer columns.
        let stat = parse_global_stat("cpu0 1 2 3 4\n").unwrap();
        assert_eq!(stat.cpus[0].idle, 4);
        assert_eq!(stat.cpus[0].iowait, 0);
    }

    #[test]
    fn test_parse_global_stat_without_cpus() {
        assert!(parse_global_stat("ctxt 1\n").is_err());
        assert!(parse_global_stat("cpuX 1 2 3\n").is_err());
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
SwapCached:            0 kB
SwapTotal:       4096000 kB
SwapFree:        2048000 kB
Committed_AS:    6000000 kB
";
        let info = parse_meminfo(content).unwrap();
        assert_eq!(info.mem_total, 16384000);
        assert_eq!(info.mem_free, 8192000);
        assert_eq!(info.mem_available, 12000000);
        assert_eq!(info.swap_total, 4096000);
        assert_eq!(info.swap_free, 2048000);
        assert_eq!(info.committed_as, 6000000);

        assert!(parse_meminfo("MemFree: 1 kB\n").is_err());
    }

    #[test]
    fn test_parse_interrupts() {
        let content = "\
           CPU0       CPU1       CPU3
  0:         44          0          0   IO-APIC   2-edge      timer
 16:       1000        200          3   IO-APIC  16-fasteoi   ehci_hcd:usb1
NMI:          5          6          7   Non-maskable interrupts
LOC:     300000     310000     290000   Local timer interrupts
ERR:          0
MIS:          0
";
        let table = parse_interrupts(content).unwrap();

        assert_eq!(table.cpus, vec![0, 1, 3]);
        assert_eq!(table.lines.len(), 6);
        assert_eq!(table.lines[1].label, "16");
        assert_eq!(table.lines[1].irq(), Some(16));
        assert_eq!(table.lines[1].total(), 1203);
        assert_eq!(table.line("LOC").unwrap().total(), 900_000);
        assert_eq!(table.line("ERR").unwrap().counts, vec![0]);
        assert_eq!(table.line("NMI").unwrap().irq(), None);
        assert_eq!(table.line("NMI").unwrap().description, "Non-maskable interrupts");
        assert_eq!(
            table.lines[1].description,
            "IO-APIC 16-fasteoi ehci_hcd:usb1"
        );
        assert!(table.line("MIS").unwrap().description.is_empty());

        assert_eq!(table.cpu_total(3), 290_010);
        assert_eq!(table.cpu_total(2), 0);
    }

    #[test]
    fn test_parse_interrupts_bad_header() {
        assert!(parse_interrupts("").is_err());
        assert!(parse_interrupts("CPU0 XYZ\n").is_err());
    }

    #[test]
    fn test_parse_dentry_state() {
        let state = parse_dentry_state("84123\t61234\t45\t0\t1200\t0\n").unwrap();
        assert_eq!(state.nr_dentry, 84123);
        assert_eq!(state.nr_unused, 61234);
        assert_eq!(state.age_limit, 45);
        assert_eq!(state.nr_negative, 1200);

        // Kernels before 4.19 have no negative dentry count.
        let state = parse_dentry_state("10 5 45 0 0 0").unwrap();
        assert_eq!(state.nr_negative, 0);

        assert!(parse_dentry_state("10 5").is_err());
    }

    #[test]
    fn test_parse_uptime() {
        assert_eq!(parse_uptime("12345.67 98765.43\n").unwrap(), 12345.67);
        assert!(parse_uptime("").is_err());
        assert!(parse_uptime("abc 1").is_err());
    }

    #[test]
    fn test_parse_online_flag() {
        assert!(parse_online_flag("1\n").unwrap());
        assert!(!parse_online_flag("0").unwrap());
        assert!(parse_online_flag("2").is_err());
    }
}
