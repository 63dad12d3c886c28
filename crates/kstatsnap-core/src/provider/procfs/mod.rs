//! Provider backed by Linux `/proc` and `/sys`.
//!
//! Records are synthesized from procfs files on every read:
//!
//! | record                  | source                                          |
//! |-------------------------|-------------------------------------------------|
//! | `cpu_info:N:cpu_infoN`  | `/sys/devices/system/cpu/cpuN/{topology,cpufreq}` |
//! | `cpu:N:sys`             | `cpuN` line of `/proc/stat`, column N of `/proc/interrupts` |
//! | `cpu:N:vm`              | no per-CPU paging counters on Linux; empty      |
//! | `unix:0:sysinfo`        | `/proc/stat`                                    |
//! | `unix:0:vminfo`         | `/proc/meminfo`                                 |
//! | `unix:0:dnlcstats`      | `/proc/sys/fs/dentry-state`                     |
//! | `unix:0:system_misc`    | `LOC` row of `/proc/interrupts`, `/proc/stat`   |
//! | `irq:N:irqN`, `irq:0:NMI`, ... | rows of `/proc/interrupts`               |
//!
//! `/proc/stat` and `/proc/interrupts` are parsed once per
//! [`StatsProvider::refresh_chain`]; every record read until the next refresh
//! is served from that sample, so one snapshot sees a single instant.
//!
//! Processor groups are NUMA nodes. Group ids are node ids plus one, since
//! group 0 holds CPUs without a group; a single-node machine has no groups.

pub mod parser;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use self::parser::{
    GlobalStat, InterruptLine, InterruptTable, ParseError, parse_cpu_list, parse_dentry_state,
    parse_global_stat, parse_interrupts, parse_meminfo, parse_online_flag, parse_uptime,
};
use super::{CpuState, GroupId, ProviderError, RecordId, RecordKind, StatsProvider};
use crate::counters::{CounterData, CounterRecord, FieldValue, INTR_BUCKETS, NamedValue};
use crate::fs::FileSystem;

/// `/proc/interrupts` row counting local timer ticks.
const CLOCK_LINE: &str = "LOC";

/// Module name of interrupt records.
const IRQ_MODULE: &str = "irq";

impl From<ParseError> for ProviderError {
    fn from(e: ParseError) -> Self {
        ProviderError::other(e.to_string())
    }
}

/// Statistics provider reading a Linux host's `/proc` and `/sys`.
pub struct ProcfsProvider<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    sys_path: PathBuf,
    chain: Vec<RecordId>,
    max_cpu_id: usize,
    /// NUMA group of each CPU slot as of the last refresh.
    cpu_groups: Vec<Option<GroupId>>,
    /// Counter files sampled by the last refresh.
    stat: GlobalStat,
    interrupts: InterruptTable,
    /// When each chain entry first showed up; 0 for records present at open.
    created: HashMap<RecordId, i64>,
    last_hrtime: i64,
}

impl<F: FileSystem> ProcfsProvider<F> {
    /// Opens the provider and builds the initial record chain.
    pub fn open(
        fs: F,
        proc_path: impl Into<PathBuf>,
        sys_path: impl Into<PathBuf>,
    ) -> Result<Self, ProviderError> {
        let mut provider = Self {
            fs,
            proc_path: proc_path.into(),
            sys_path: sys_path.into(),
            chain: Vec::new(),
            max_cpu_id: 0,
            cpu_groups: Vec::new(),
            stat: GlobalStat::default(),
            interrupts: InterruptTable::default(),
            created: HashMap::new(),
            last_hrtime: 0,
        };
        provider.refresh_chain()?;
        debug!(
            records = provider.chain.len(),
            max_cpu_id = provider.max_cpu_id,
            "procfs provider opened"
        );
        Ok(provider)
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn fs_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    fn proc_file(&self, name: &str) -> PathBuf {
        self.proc_path.join(name)
    }

    fn cpu_root(&self) -> PathBuf {
        self.sys_path.join("devices/system/cpu")
    }

    fn cpu_dir(&self, slot: usize) -> PathBuf {
        self.cpu_root().join(format!("cpu{slot}"))
    }

    fn node_root(&self) -> PathBuf {
        self.sys_path.join("devices/system/node")
    }

    fn read_file(&self, path: &Path) -> Result<String, ProviderError> {
        self.fs.read_to_string(path).map_err(|e| io_error(path, e))
    }

    /// Reads a file belonging to a single CPU, node or IRQ; a missing file
    /// means the entity went away.
    fn read_entity_file(&self, path: &Path) -> Result<String, ProviderError> {
        match self.fs.read_to_string(path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ProviderError::vanished(path.display().to_string()))
            }
            Err(e) => Err(io_error(path, e)),
        }
    }

    /// Numeric sysfs attribute, 0 when absent or unreadable.
    fn read_attr(&self, path: &Path) -> u64 {
        self.fs
            .read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn read_stat(&self) -> Result<GlobalStat, ProviderError> {
        let content = self.read_file(&self.proc_file("stat"))?;
        Ok(parse_global_stat(&content)?)
    }

    fn read_interrupts(&self) -> Result<InterruptTable, ProviderError> {
        let content = self.read_file(&self.proc_file("interrupts"))?;
        Ok(parse_interrupts(&content)?)
    }

    /// Slots with a `cpuN` directory in sysfs.
    fn present_cpus(&self) -> Result<Vec<usize>, ProviderError> {
        let root = self.cpu_root();
        let entries = self.fs.read_dir(&root).map_err(|e| io_error(&root, e))?;

        let mut cpus: Vec<usize> = entries
            .iter()
            .filter_map(|path| path.file_name()?.to_str()?.strip_prefix("cpu")?.parse().ok())
            .collect();
        cpus.sort_unstable();
        Ok(cpus)
    }

    /// Online NUMA nodes; kernels without NUMA support have no node directory.
    fn online_nodes(&self) -> Result<Vec<usize>, ProviderError> {
        let path = self.node_root().join("online");
        if !self.fs.exists(&path) {
            return Ok(Vec::new());
        }
        Ok(parse_cpu_list(&self.read_file(&path)?)?)
    }

    fn scan_groups(&self) -> Result<Vec<GroupId>, ProviderError> {
        let nodes = self.online_nodes()?;
        if nodes.len() < 2 {
            return Ok(Vec::new());
        }
        Ok(nodes.into_iter().map(node_group).collect())
    }

    fn scan_cpu_groups(&self, max_cpu_id: usize) -> Result<Vec<Option<GroupId>>, ProviderError> {
        let mut groups = vec![None; max_cpu_id + 1];
        let nodes = self.online_nodes()?;
        if nodes.len() < 2 {
            return Ok(groups);
        }

        for node in nodes {
            let path = self.node_root().join(format!("node{node}/cpulist"));
            for cpu in parse_cpu_list(&self.read_entity_file(&path)?)? {
                if let Some(slot) = groups.get_mut(cpu) {
                    *slot = Some(node_group(node));
                }
            }
        }
        Ok(groups)
    }

    fn cpu_info(&self, slot: usize) -> Result<CounterData, ProviderError> {
        let dir = self.cpu_dir(slot);
        let state = self
            .cpu_state(slot)
            .ok_or_else(|| ProviderError::vanished(dir.display().to_string()))?;

        Ok(CounterData::Named(vec![
            NamedValue::new("state", FieldValue::Str(state.as_str().to_string())),
            NamedValue::new(
                "clock_MHz",
                FieldValue::UInt64(self.read_attr(&dir.join("cpufreq/scaling_cur_freq")) / 1000),
            ),
            NamedValue::new(
                "chip_id",
                FieldValue::UInt64(self.read_attr(&dir.join("topology/physical_package_id"))),
            ),
            NamedValue::new(
                "core_id",
                FieldValue::UInt64(self.read_attr(&dir.join("topology/core_id"))),
            ),
        ]))
    }

    fn cpu_sys(&self, slot: usize) -> Result<CounterData, ProviderError> {
        // Offline CPUs have no line.
        let cpu = self
            .stat
            .cpu(slot)
            .ok_or_else(|| ProviderError::vanished(format!("cpu{slot} not in stat")))?;
        let intr = self.interrupts.cpu_total(slot);

        Ok(named(&[
            ("cpu_ticks_idle", cpu.idle),
            ("cpu_ticks_user", cpu.user.wrapping_add(cpu.nice)),
            (
                "cpu_ticks_kernel",
                cpu.system.wrapping_add(cpu.irq).wrapping_add(cpu.softirq),
            ),
            ("cpu_ticks_wait", cpu.iowait),
            ("cpu_ticks_steal", cpu.steal),
            ("intr", intr),
        ]))
    }

    fn cpu_vm(&self, slot: usize) -> Result<CounterData, ProviderError> {
        if !self.fs.exists(&self.cpu_dir(slot)) {
            return Err(ProviderError::vanished(format!("cpu{slot}")));
        }
        Ok(CounterData::Named(Vec::new()))
    }

    fn sysinfo(&self) -> CounterData {
        let stat = &self.stat;
        named(&[
            ("procs_running", stat.procs_running),
            ("procs_blocked", stat.procs_blocked),
            ("ctxt", stat.ctxt),
            ("processes", stat.processes),
        ])
    }

    fn vminfo(&self) -> Result<CounterData, ProviderError> {
        let info = parse_meminfo(&self.read_file(&self.proc_file("meminfo"))?)?;
        Ok(named(&[
            ("physmem", info.mem_total),
            ("freemem", info.mem_free),
            ("availrmem", info.mem_available),
            ("swap_total", info.swap_total),
            ("swap_free", info.swap_free),
            ("swap_resv", info.committed_as),
        ]))
    }

    fn dnlcstats(&self) -> Result<CounterData, ProviderError> {
        let state = parse_dentry_state(&self.read_file(&self.proc_file("sys/fs/dentry-state"))?)?;
        Ok(named(&[
            ("entries", state.nr_dentry),
            ("unused", state.nr_unused),
            ("negative", state.nr_negative),
            ("age_limit", state.age_limit),
        ]))
    }

    fn system_misc(&self) -> CounterData {
        let stat = &self.stat;
        let clk_intr = self.interrupts.line(CLOCK_LINE).map_or(0, InterruptLine::total);
        let ncpus = stat.cpus.iter().filter(|c| c.cpu_id.is_some()).count() as u64;

        CounterData::Named(vec![
            NamedValue::new("clk_intr", FieldValue::UInt64(clk_intr)),
            NamedValue::new("deficit", FieldValue::Int64(0)),
            NamedValue::new("boot_time", FieldValue::UInt64(stat.btime)),
            NamedValue::new("ncpus", FieldValue::UInt64(ncpus)),
        ])
    }

    fn interrupt(&self, id: &RecordId) -> Result<CounterData, ProviderError> {
        let line = self
            .interrupts
            .lines
            .iter()
            .find(|l| interrupt_name(l) == id.name)
            .ok_or_else(|| ProviderError::vanished(format!("{id}")))?;

        let mut buckets = [0u64; INTR_BUCKETS];
        buckets[0] = line.total();
        Ok(CounterData::Intr(buckets))
    }
}

impl<F: FileSystem> StatsProvider for ProcfsProvider<F> {
    fn refresh_chain(&mut self) -> Result<bool, ProviderError> {
        let possible = parse_cpu_list(&self.read_file(&self.cpu_root().join("possible"))?)?;
        let max_cpu_id = possible.last().copied().unwrap_or(0);
        let present = self.present_cpus()?;
        let stat = self.read_stat()?;
        let interrupts = self.read_interrupts()?;
        let cpu_groups = self.scan_cpu_groups(max_cpu_id)?;

        let chain = build_chain(&present, &interrupts);
        let changed = chain != self.chain
            || max_cpu_id != self.max_cpu_id
            || cpu_groups != self.cpu_groups;

        if changed {
            trace!(records = chain.len(), "record chain rebuilt");
            let now = if self.created.is_empty() { 0 } else { self.hrtime() };
            let mut created = HashMap::with_capacity(chain.len());
            for id in &chain {
                let crtime = self.created.get(id).copied().unwrap_or(now);
                created.insert(id.clone(), crtime);
            }
            self.created = created;
        }
        self.chain = chain;
        self.max_cpu_id = max_cpu_id;
        self.cpu_groups = cpu_groups;
        self.stat = stat;
        self.interrupts = interrupts;
        Ok(changed)
    }

    fn chain(&self) -> &[RecordId] {
        &self.chain
    }

    fn read(&mut self, id: &RecordId) -> Result<CounterRecord, ProviderError> {
        let slot = || {
            usize::try_from(id.instance).map_err(|_| ProviderError::not_found(id.to_string()))
        };

        let data = match (id.kind, id.module.as_str(), id.name.as_str()) {
            (RecordKind::Intr, IRQ_MODULE, _) => self.interrupt(id)?,
            (RecordKind::Named, "cpu_info", _) => self.cpu_info(slot()?)?,
            (RecordKind::Named, "cpu", "sys") => self.cpu_sys(slot()?)?,
            (RecordKind::Named, "cpu", "vm") => self.cpu_vm(slot()?)?,
            (RecordKind::Named, "unix", "sysinfo") => self.sysinfo(),
            (RecordKind::Named, "unix", "vminfo") => self.vminfo()?,
            (RecordKind::Named, "unix", "dnlcstats") => self.dnlcstats()?,
            (RecordKind::Named, "unix", "system_misc") => self.system_misc(),
            _ => return Err(ProviderError::not_found(id.to_string())),
        };

        Ok(CounterRecord {
            id: id.clone(),
            crtime: self.created.get(id).copied().unwrap_or(0),
            snaptime: self.hrtime(),
            data,
        })
    }

    fn hrtime(&mut self) -> i64 {
        match self
            .read_file(&self.proc_file("uptime"))
            .and_then(|s| parse_uptime(&s).map_err(ProviderError::from))
        {
            Ok(secs) => {
                let now = (secs * 1e9).round() as i64;
                self.last_hrtime = self.last_hrtime.max(now);
            }
            Err(e) => trace!("uptime unreadable, reusing last hrtime: {}", e),
        }
        self.last_hrtime
    }

    fn max_cpu_id(&self) -> usize {
        self.max_cpu_id
    }

    fn cpu_state(&self, slot: usize) -> Option<CpuState> {
        let dir = self.cpu_dir(slot);
        if !self.fs.exists(&dir) {
            return None;
        }
        let online = match self.fs.read_to_string(&dir.join("online")) {
            Ok(content) => parse_online_flag(&content).unwrap_or(true),
            Err(_) => true,
        };
        Some(if online {
            CpuState::Online
        } else {
            CpuState::Offline
        })
    }

    fn cpu_group(&self, slot: usize) -> Option<GroupId> {
        self.cpu_groups.get(slot).copied().flatten()
    }

    fn group_count(&mut self) -> Result<usize, ProviderError> {
        Ok(self.scan_groups()?.len())
    }

    fn group_list(&mut self) -> Result<Vec<GroupId>, ProviderError> {
        self.scan_groups()
    }
}

fn io_error(path: &Path, e: io::Error) -> ProviderError {
    let mut err = ProviderError::from(e);
    err.context = format!("{}: {}", path.display(), err.context);
    err
}

fn node_group(node: usize) -> GroupId {
    node as GroupId + 1
}

fn named(fields: &[(&str, u64)]) -> CounterData {
    CounterData::Named(
        fields
            .iter()
            .map(|(name, value)| NamedValue::new(*name, FieldValue::UInt64(*value)))
            .collect(),
    )
}

/// Rows that count a device or an architectural source on every CPU. The
/// clock row is not a source, nor are the `ERR` and `MIS` totals, which carry
/// no description.
fn is_interrupt_source(line: &InterruptLine, ncpus: usize) -> bool {
    line.label != CLOCK_LINE && !line.description.is_empty() && line.counts.len() == ncpus
}

fn interrupt_name(line: &InterruptLine) -> String {
    match line.irq() {
        Some(irq) => format!("irq{irq}"),
        None => line.label.clone(),
    }
}

fn build_chain(present: &[usize], interrupts: &InterruptTable) -> Vec<RecordId> {
    let mut chain = Vec::with_capacity(present.len() * 3 + 4 + interrupts.lines.len());

    for &cpu in present {
        let instance = cpu as i32;
        chain.push(RecordId::named("cpu_info", instance, format!("cpu_info{cpu}")));
        chain.push(RecordId::named("cpu", instance, "sys"));
        chain.push(RecordId::named("cpu", instance, "vm"));
    }

    for name in ["sysinfo", "vminfo", "dnlcstats", "system_misc"] {
        chain.push(RecordId::named("unix", 0, name));
    }

    for line in interrupts
        .lines
        .iter()
        .filter(|l| is_interrupt_source(l, interrupts.cpus.len()))
    {
        chain.push(RecordId::intr(
            IRQ_MODULE,
            line.irq().unwrap_or(0),
            interrupt_name(line),
        ));
    }

    chain
}
