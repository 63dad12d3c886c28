//! Snapshot data model.
//!
//! A [`Snapshot`] is one consistent sample of the provider: the per-CPU
//! table, processor groups, interrupt sources and system-wide totals, for the
//! facets that were requested. Snapshots are plain owned data; dropping one
//! releases every counter record it holds.
//!
//! ```text
//! Snapshot
//!   ├── cpus[slot]        CpuRecord (vm + sys records for active CPUs)
//!   ├── groups[]          GroupRecord ── slot indices into cpus
//!   ├── interrupts[]      InterruptRecord ("clock" first)
//!   └── system            SystemAggregate (global records + CPU sums)
//! ```

mod acquire;
mod cpus;
mod groups;
mod interrupts;
mod system;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use acquire::{AcquireConfig, AcquireStats, Acquirer, SnapshotError, Stage, acquire_snapshot};
pub use cpus::collect_cpus;
pub use groups::collect_groups;
pub use interrupts::{CLOCK_INTERRUPT, collect_interrupts};
pub use system::collect_system;

use crate::counters::CounterRecord;
use crate::provider::{CpuState, GroupId, UNGROUPED};

/// One selectable part of a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facet {
    /// Every CPU, independently.
    Cpus,
    /// Processor groups and their CPUs.
    Groups,
    /// System-wide records, including summed CPU records.
    System,
    /// Interrupt sources and counts.
    Interrupts,
}

impl Facet {
    pub const ALL: [Facet; 4] = [Facet::Cpus, Facet::Groups, Facet::System, Facet::Interrupts];

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// A set of facets.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FacetSet(u8);

impl FacetSet {
    pub const EMPTY: FacetSet = FacetSet(0);
    pub const ALL: FacetSet = FacetSet(0b1111);

    pub const fn with(self, facet: Facet) -> Self {
        FacetSet(self.0 | facet.bit())
    }

    pub const fn contains(self, facet: Facet) -> bool {
        self.0 & facet.bit() != 0
    }

    /// Whether the CPU table has to be built: groups and system totals are
    /// derived from it.
    pub const fn needs_cpus(self) -> bool {
        self.contains(Facet::Cpus) || self.contains(Facet::Groups) || self.contains(Facet::System)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Facet> {
        Facet::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl From<Facet> for FacetSet {
    fn from(facet: Facet) -> Self {
        FacetSet::EMPTY.with(facet)
    }
}

impl FromIterator<Facet> for FacetSet {
    fn from_iter<I: IntoIterator<Item = Facet>>(iter: I) -> Self {
        iter.into_iter().fold(FacetSet::EMPTY, FacetSet::with)
    }
}

impl std::ops::BitOr for Facet {
    type Output = FacetSet;

    fn bitor(self, rhs: Facet) -> FacetSet {
        FacetSet::from(self).with(rhs)
    }
}

impl std::ops::BitOr<Facet> for FacetSet {
    type Output = FacetSet;

    fn bitor(self, rhs: Facet) -> FacetSet {
        self.with(rhs)
    }
}

impl std::ops::BitOr for FacetSet {
    type Output = FacetSet;

    fn bitor(self, rhs: FacetSet) -> FacetSet {
        FacetSet(self.0 | rhs.0)
    }
}

impl std::fmt::Debug for FacetSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// One CPU slot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuRecord {
    /// CPU id; `None` when no CPU occupies the slot.
    pub id: Option<usize>,
    /// Owning group, [`UNGROUPED`] when none.
    pub group: GroupId,
    /// `None` when the slot is empty.
    pub state: Option<CpuState>,
    pub vm: CounterRecord,
    pub sys: CounterRecord,
}

impl CpuRecord {
    pub(crate) fn absent() -> Self {
        Self {
            id: None,
            group: UNGROUPED,
            state: None,
            vm: CounterRecord::default(),
            sys: CounterRecord::default(),
        }
    }

    /// Present and online; only active CPUs carry counters.
    pub fn is_active(&self) -> bool {
        self.id.is_some() && self.state.is_some_and(CpuState::is_online)
    }
}

/// A processor group and the slots of its active CPUs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    /// Slot indices into [`Snapshot::cpus`], in slot order.
    pub cpus: Vec<usize>,
}

impl GroupRecord {
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }
}

/// Cumulative count of one interrupt source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptRecord {
    pub name: String,
    pub count: u64,
}

/// Global records plus CPU totals.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemAggregate {
    pub sysinfo: CounterRecord,
    pub vminfo: CounterRecord,
    pub nc_stats: CounterRecord,
    /// Sum of the `vm` records of all active CPUs.
    pub cpu_vm: CounterRecord,
    /// Sum of the `sys` records of all active CPUs.
    pub cpu_sys: CounterRecord,
    /// Clock interrupts since boot.
    pub ticks: u64,
    /// Scheduling deficit.
    pub deficit: i64,
    /// Active CPUs folded into the totals.
    pub active_cpus: usize,
}

/// One consistent sample of the provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub facets: FacetSet,
    /// Indexed by CPU slot; empty unless CPUs, groups or system were requested.
    pub cpus: Vec<CpuRecord>,
    /// Group 0 first, then the provider's groups in list order.
    pub groups: Vec<GroupRecord>,
    /// The synthetic clock entry first, then sources in chain order.
    pub interrupts: Vec<InterruptRecord>,
    pub system: SystemAggregate,
    /// Provider time when the snapshot completed.
    pub snaptime: i64,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn active_cpus(&self) -> impl Iterator<Item = &CpuRecord> {
        self.cpus.iter().filter(|c| c.is_active())
    }

    pub fn nr_active_cpus(&self) -> usize {
        self.active_cpus().count()
    }

    /// CPU with the given id, if its slot is occupied.
    pub fn cpu(&self, id: usize) -> Option<&CpuRecord> {
        self.cpus.get(id).filter(|c| c.id.is_some())
    }

    pub fn group(&self, id: GroupId) -> Option<&GroupRecord> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Resolves a group's slot indices against the CPU table.
    pub fn group_cpus<'a>(&'a self, group: &'a GroupRecord) -> impl Iterator<Item = &'a CpuRecord> {
        group.cpus.iter().filter_map(|slot| self.cpus.get(*slot))
    }

    pub fn interrupt(&self, name: &str) -> Option<&InterruptRecord> {
        self.interrupts.iter().find(|i| i.name == name)
    }
}
