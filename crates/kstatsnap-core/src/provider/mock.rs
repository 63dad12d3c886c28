//! In-memory provider for testing the snapshot engine.
//!
//! `MockProvider` keeps a record chain, a CPU table and a group list in
//! memory. Tests mutate it between acquisitions to simulate hot-plug, group
//! changes and counters moving, and can inject failures on a given read or
//! refresh to drive the retry paths.

use std::collections::{HashMap, VecDeque};

use super::{CpuState, ErrorKind, GroupId, ProviderError, RecordId, StatsProvider};
use crate::counters::{CounterData, CounterRecord, FieldValue, INTR_BUCKETS, NamedValue};

#[derive(Debug, Clone, Copy)]
struct MockCpu {
    state: CpuState,
    group: Option<GroupId>,
}

/// In-memory statistics provider.
#[derive(Debug, Clone)]
pub struct MockProvider {
    chain: Vec<RecordId>,
    records: HashMap<RecordId, CounterData>,
    /// Clock value when each record entered the chain.
    created: HashMap<RecordId, i64>,
    cpus: Vec<Option<MockCpu>>,
    groups: Vec<GroupId>,
    hrtime: i64,
    hrtime_step: i64,
    reads: usize,
    refreshes: usize,
    read_faults: VecDeque<(usize, ErrorKind)>,
    refresh_faults: VecDeque<ErrorKind>,
    pending_group: Option<GroupId>,
}

impl MockProvider {
    /// Creates an empty provider with `max_cpu_id + 1` CPU slots.
    pub fn new(max_cpu_id: usize) -> Self {
        Self {
            chain: Vec::new(),
            records: HashMap::new(),
            created: HashMap::new(),
            cpus: vec![None; max_cpu_id + 1],
            groups: Vec::new(),
            hrtime: 1_000_000,
            hrtime_step: 1_000_000,
            reads: 0,
            refreshes: 0,
            read_faults: VecDeque::new(),
            refresh_faults: VecDeque::new(),
            pending_group: None,
        }
    }

    /// Adds or replaces a named record.
    pub fn set_named(&mut self, id: RecordId, fields: &[(&str, u64)]) {
        let fields = fields
            .iter()
            .map(|(name, value)| NamedValue::new(*name, FieldValue::UInt64(*value)))
            .collect();
        self.insert(id, CounterData::Named(fields));
    }

    /// Sets one numeric field of an existing named record.
    ///
    /// Returns `false` if the record or field does not exist.
    pub fn set_field(&mut self, id: &RecordId, field: &str, value: u64) -> bool {
        let Some(CounterData::Named(fields)) = self.records.get_mut(id) else {
            return false;
        };
        match fields.iter_mut().find(|f| f.name == field) {
            Some(f) => {
                f.value = FieldValue::UInt64(value);
                true
            }
            None => false,
        }
    }

    /// Adds `by` to every numeric field of a named record.
    pub fn advance(&mut self, id: &RecordId, by: u64) {
        if let Some(CounterData::Named(fields)) = self.records.get_mut(id) {
            for f in fields.iter_mut() {
                if let Some(v) = f.value.as_u64() {
                    f.value = FieldValue::UInt64(v.wrapping_add(by));
                }
            }
        }
    }

    /// Adds a present CPU with `cpu_info`, `vm` and `sys` records.
    pub fn add_cpu(&mut self, slot: usize, state: CpuState, group: Option<GroupId>) {
        if slot >= self.cpus.len() {
            self.cpus.resize(slot + 1, None);
        }
        self.cpus[slot] = Some(MockCpu { state, group });

        let instance = slot as i32;
        self.set_named(
            RecordId::named("cpu_info", instance, format!("cpu_info{slot}")),
            &[("clock_MHz", 2400), ("chip_id", 0), ("core_id", slot as u64)],
        );
        self.set_named(
            RecordId::named("cpu", instance, "vm"),
            &[("pgin", 10), ("pgout", 5), ("pgfrec", 3), ("prot_fault", 7)],
        );
        self.set_named(
            RecordId::named("cpu", instance, "sys"),
            &[
                ("cpu_ticks_idle", 9000),
                ("cpu_ticks_user", 600),
                ("cpu_ticks_kernel", 300),
                ("cpu_ticks_wait", 100),
                ("intr", 2000),
                ("syscall", 5000),
                ("pswitch", 800),
            ],
        );
    }

    /// Removes a CPU and its records.
    pub fn remove_cpu(&mut self, slot: usize) {
        if let Some(entry) = self.cpus.get_mut(slot) {
            *entry = None;
        }
        self.drop_cpu_records(slot);
    }

    /// Drops a CPU's records while the slot stays present, as seen when the
    /// chain lags behind a hot-plug.
    pub fn drop_cpu_records(&mut self, slot: usize) {
        let instance = slot as i32;
        self.remove_where(|id| {
            id.instance == instance && (id.module == "cpu" || id.module == "cpu_info")
        });
    }

    pub fn set_cpu_state(&mut self, slot: usize, state: CpuState) {
        if let Some(Some(cpu)) = self.cpus.get_mut(slot) {
            cpu.state = state;
        }
    }

    pub fn set_cpu_group(&mut self, slot: usize, group: Option<GroupId>) {
        if let Some(Some(cpu)) = self.cpus.get_mut(slot) {
            cpu.group = group;
        }
    }

    pub fn add_group(&mut self, id: GroupId) {
        if !self.groups.contains(&id) {
            self.groups.push(id);
        }
    }

    /// Removes a group; its CPUs fall back to no group.
    pub fn remove_group(&mut self, id: GroupId) {
        self.groups.retain(|g| *g != id);
        for cpu in self.cpus.iter_mut().flatten() {
            if cpu.group == Some(id) {
                cpu.group = None;
            }
        }
    }

    /// Adds an interrupt source with the given per-origin buckets.
    pub fn add_interrupt(&mut self, module: &str, instance: i32, name: &str, buckets: [u64; INTR_BUCKETS]) {
        self.insert(RecordId::intr(module, instance, name), CounterData::Intr(buckets));
    }

    pub fn remove_interrupt(&mut self, name: &str) {
        self.remove_where(|id| id.kind == super::RecordKind::Intr && id.name == name);
    }

    /// Makes the `n`-th read from now fail with `kind`.
    pub fn fail_read_at(&mut self, n: usize, kind: ErrorKind) {
        self.read_faults.push_back((self.reads + n, kind));
    }

    /// Makes the next refresh calls fail, one per queued kind.
    pub fn fail_refresh(&mut self, times: usize, kind: ErrorKind) {
        self.refresh_faults.extend(std::iter::repeat_n(kind, times));
    }

    /// Creates `id` between the next `group_count` and `group_list` calls.
    pub fn grow_groups_between_queries(&mut self, id: GroupId) {
        self.pending_group = Some(id);
    }

    /// Step the clock advances on every `hrtime` call.
    pub fn set_hrtime(&mut self, now: i64, step: i64) {
        self.hrtime = now;
        self.hrtime_step = step;
    }

    /// Total reads served or failed so far.
    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes
    }

    fn insert(&mut self, id: RecordId, data: CounterData) {
        if !self.records.contains_key(&id) {
            self.chain.push(id.clone());
            self.created.insert(id.clone(), self.hrtime);
        }
        self.records.insert(id, data);
    }

    fn remove_where(&mut self, pred: impl Fn(&RecordId) -> bool) {
        self.chain.retain(|id| !pred(id));
        self.records.retain(|id, _| !pred(id));
        self.created.retain(|id, _| !pred(id));
    }

    fn tick(&mut self) -> i64 {
        self.hrtime = self.hrtime.wrapping_add(self.hrtime_step);
        self.hrtime
    }
}

impl StatsProvider for MockProvider {
    fn refresh_chain(&mut self) -> Result<bool, ProviderError> {
        self.refreshes += 1;
        if let Some(kind) = self.refresh_faults.pop_front() {
            return Err(ProviderError::new(kind, "injected refresh failure"));
        }
        Ok(false)
    }

    fn chain(&self) -> &[RecordId] {
        &self.chain
    }

    fn read(&mut self, id: &RecordId) -> Result<CounterRecord, ProviderError> {
        self.reads += 1;
        if let Some(pos) = self.read_faults.iter().position(|(n, _)| *n == self.reads) {
            if let Some((_, kind)) = self.read_faults.remove(pos) {
                return Err(ProviderError::new(kind, format!("injected failure reading {id}")));
            }
        }

        let data = self
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::vanished(format!("{id}")))?;
        let snaptime = self.tick();
        Ok(CounterRecord {
            id: id.clone(),
            crtime: self.created.get(id).copied().unwrap_or(0),
            snaptime,
            data,
        })
    }

    fn hrtime(&mut self) -> i64 {
        self.tick()
    }

    fn max_cpu_id(&self) -> usize {
        self.cpus.len().saturating_sub(1)
    }

    fn cpu_state(&self, slot: usize) -> Option<CpuState> {
        self.cpus.get(slot).copied().flatten().map(|c| c.state)
    }

    fn cpu_group(&self, slot: usize) -> Option<GroupId> {
        self.cpus.get(slot).copied().flatten().and_then(|c| c.group)
    }

    fn group_count(&mut self) -> Result<usize, ProviderError> {
        let count = self.groups.len();
        if let Some(id) = self.pending_group.take() {
            self.add_group(id);
        }
        Ok(count)
    }

    fn group_list(&mut self) -> Result<Vec<GroupId>, ProviderError> {
        Ok(self.groups.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_cpu_records() {
        let mut p = MockProvider::new(3);
        p.add_cpu(1, CpuState::Online, Some(5));
        assert_eq!(p.cpu_state(1), Some(CpuState::Online));
        assert_eq!(p.cpu_group(1), Some(5));
        assert!(p.lookup("cpu", Some(1), Some("sys")).is_some());
        assert!(p.lookup("cpu_info", Some(1), None).is_some());

        p.remove_cpu(1);
        assert_eq!(p.cpu_state(1), None);
        assert!(p.lookup("cpu", Some(1), None).is_none());
        assert_eq!(p.max_cpu_id(), 3);
    }

    #[test]
    fn injected_read_fault_fires_once() {
        let mut p = MockProvider::new(0);
        p.add_cpu(0, CpuState::Online, None);
        let id = RecordId::named("cpu", 0, "sys");

        p.fail_read_at(2, ErrorKind::Vanished);
        assert!(p.read(&id).is_ok());
        assert_eq!(p.read(&id).unwrap_err().kind, ErrorKind::Vanished);
        assert!(p.read(&id).is_ok());
        assert_eq!(p.reads(), 3);
    }

    #[test]
    fn reads_carry_increasing_snaptime() {
        let mut p = MockProvider::new(0);
        p.add_cpu(0, CpuState::Online, None);
        let id = RecordId::named("cpu", 0, "vm");
        let a = p.read(&id).unwrap();
        let b = p.read(&id).unwrap();
        assert!(b.snaptime > a.snaptime);
    }

    #[test]
    fn group_grows_between_queries() {
        let mut p = MockProvider::new(1);
        p.add_group(1);
        p.grow_groups_between_queries(2);
        assert_eq!(p.group_count().unwrap(), 1);
        assert_eq!(p.group_list().unwrap(), vec![1, 2]);
        assert_eq!(p.group_count().unwrap(), 2);
    }

    #[test]
    fn set_and_advance_fields() {
        let mut p = MockProvider::new(0);
        p.add_cpu(0, CpuState::Online, None);
        let id = RecordId::named("cpu", 0, "sys");
        assert!(p.set_field(&id, "cpu_ticks_user", 1));
        assert!(!p.set_field(&id, "missing", 1));
        p.advance(&id, 10);
        let rec = p.read(&id).unwrap();
        assert_eq!(rec.value("cpu_ticks_user"), 11);
        assert_eq!(rec.value("cpu_ticks_idle"), 9010);
    }

    #[test]
    fn refresh_faults_drain_in_order() {
        let mut p = MockProvider::new(0);
        p.fail_refresh(2, ErrorKind::WouldBlock);
        assert!(p.refresh_chain().is_err());
        assert!(p.refresh_chain().is_err());
        assert!(p.refresh_chain().is_ok());
        assert_eq!(p.refreshes(), 3);
    }

    #[test]
    fn records_remember_when_they_appeared() {
        let mut p = MockProvider::new(1);
        p.add_cpu(0, CpuState::Online, None);
        let first = p.read(&RecordId::named("cpu", 0, "sys")).unwrap();
        assert_eq!(first.crtime, 1_000_000);

        p.set_hrtime(50_000_000, 1_000_000);
        p.add_cpu(1, CpuState::Online, None);
        let later = p.read(&RecordId::named("cpu", 1, "sys")).unwrap();
        assert_eq!(later.crtime, 50_000_000);
        assert!(later.snaptime > later.crtime);

        let again = p.read(&RecordId::named("cpu", 0, "sys")).unwrap();
        assert_eq!(again.crtime, 1_000_000);
    }
}
