//! Structural comparison of two snapshots.
//!
//! Entities are paired by identity: CPUs by slot id, groups by group id,
//! interrupt sources by name. Each pairing is handed to a callback, which
//! typically computes rates for ordinary pairings and prints a notice for
//! additions and removals.

use std::collections::BTreeMap;
use std::io;

use crate::provider::GroupId;
use crate::snapshot::{CpuRecord, Facet, GroupRecord, InterruptRecord, Snapshot};

/// How an entity relates across the two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Present in both.
    Unchanged,
    /// Only in the new snapshot.
    Added,
    /// Only in the old snapshot.
    Removed,
}

impl Change {
    fn of<T>(old: Option<&T>, new: Option<&T>) -> Change {
        match (old, new) {
            (Some(_), None) => Change::Removed,
            (None, Some(_)) => Change::Added,
            _ => Change::Unchanged,
        }
    }

    pub fn is_structural(self) -> bool {
        self != Change::Unchanged
    }
}

/// One entity paired across two snapshots. At least one side is present.
#[derive(Debug, Clone, Copy)]
pub enum Pairing<'a> {
    Cpu(Option<&'a CpuRecord>, Option<&'a CpuRecord>),
    Group(Option<&'a GroupRecord>, Option<&'a GroupRecord>),
    Interrupt(Option<&'a InterruptRecord>, Option<&'a InterruptRecord>),
}

impl Pairing<'_> {
    pub fn change(&self) -> Change {
        match self {
            Pairing::Cpu(o, n) => Change::of(*o, *n),
            Pairing::Group(o, n) => Change::of(*o, *n),
            Pairing::Interrupt(o, n) => Change::of(*o, *n),
        }
    }
}

/// Old and new group of a paired CPU that moved between groups.
pub fn cpu_moved(pairing: &Pairing<'_>) -> Option<(GroupId, GroupId)> {
    match pairing {
        Pairing::Cpu(Some(o), Some(n)) if o.group != n.group => Some((o.group, n.group)),
        _ => None,
    }
}

/// Pairs the entities of `facet` and calls `callback` once per pairing.
///
/// CPUs and groups come in ascending id order; interrupt sources in the old
/// table's order followed by sources only the new table has. Only active
/// CPUs take part. With no `old` snapshot every entity is an addition. The
/// `System` facet walks the CPUs, since those are what its totals are built
/// from.
///
/// Returns `true` if anything was added or removed.
pub fn diff_snapshots<'a, F>(
    old: Option<&'a Snapshot>,
    new: &'a Snapshot,
    facet: Facet,
    mut callback: F,
) -> bool
where
    F: FnMut(Pairing<'a>),
{
    match facet {
        Facet::Cpus | Facet::System => {
            let old_cpus = old.map(active_cpus).unwrap_or_default();
            pair_by_id(old_cpus, active_cpus(new), |o, n| {
                callback(Pairing::Cpu(o, n))
            })
        }
        Facet::Groups => {
            let by_id = |s: &'a Snapshot| s.groups.iter().map(|g| (g.id, g)).collect::<Vec<_>>();
            pair_by_id(old.map(by_id).unwrap_or_default(), by_id(new), |o, n| {
                callback(Pairing::Group(o, n))
            })
        }
        Facet::Interrupts => {
            let old_intrs = old.map(|s| s.interrupts.as_slice()).unwrap_or_default();
            pair_interrupts(old_intrs, &new.interrupts, |o, n| {
                callback(Pairing::Interrupt(o, n))
            })
        }
    }
}

/// Whether `new` differs structurally from `old`: no previous snapshot,
/// different facets, any addition or removal, or a CPU that moved between
/// groups.
pub fn snapshot_has_changed(old: Option<&Snapshot>, new: &Snapshot) -> bool {
    let Some(old) = old else {
        return true;
    };
    if old.facets != new.facets {
        return true;
    }

    let mut moved = false;
    for facet in new.facets.iter() {
        let structural = diff_snapshots(Some(old), new, facet, |pairing| {
            moved |= cpu_moved(&pairing).is_some();
        });
        if structural || moved {
            return true;
        }
    }
    false
}

/// One `<<...>>` notice per topology change between `old` and `new`.
///
/// Nothing is reported for the first sample. Groups and interrupt sources are
/// only compared when both snapshots carry them.
pub fn describe_changes(old: Option<&Snapshot>, new: &Snapshot) -> Vec<String> {
    let mut notices = Vec::new();
    let Some(old) = old else {
        return notices;
    };

    if old.facets.needs_cpus() && new.facets.needs_cpus() {
        diff_snapshots(Some(old), new, Facet::Cpus, |pairing| {
            notices.extend(describe_cpu(pairing));
        });
    }

    if old.facets.contains(Facet::Groups) && new.facets.contains(Facet::Groups) {
        diff_snapshots(Some(old), new, Facet::Groups, |pairing| match pairing {
            Pairing::Group(None, Some(g)) => notices.push(format!("<<group created: {}>>", g.id)),
            Pairing::Group(Some(g), None) => notices.push(format!("<<group destroyed: {}>>", g.id)),
            _ => {}
        });
    }

    if old.facets.contains(Facet::Interrupts) && new.facets.contains(Facet::Interrupts) {
        diff_snapshots(Some(old), new, Facet::Interrupts, |pairing| match pairing {
            Pairing::Interrupt(None, Some(i)) => {
                notices.push(format!("<<interrupt source added: {}>>", i.name))
            }
            Pairing::Interrupt(Some(i), None) => {
                notices.push(format!("<<interrupt source removed: {}>>", i.name))
            }
            _ => {}
        });
    }

    notices
}

/// Writes the [`describe_changes`] notices to `sink`, one per line.
pub fn report_changes<W: io::Write>(
    old: Option<&Snapshot>,
    new: &Snapshot,
    sink: &mut W,
) -> io::Result<()> {
    for notice in describe_changes(old, new) {
        writeln!(sink, "{}", notice)?;
    }
    Ok(())
}

fn describe_cpu(pairing: Pairing<'_>) -> Option<String> {
    let Pairing::Cpu(old, new) = pairing else {
        return None;
    };
    match (old, new) {
        (None, Some(n)) => Some(format!("<<processor {} added>>", slot(n))),
        (Some(o), None) => Some(format!("<<processor {} removed>>", slot(o))),
        (Some(_), Some(n)) => cpu_moved(&pairing).map(|(from, to)| {
            format!(
                "<<processor {} moved from group: {} to: {}>>",
                slot(n),
                from,
                to
            )
        }),
        (None, None) => None,
    }
}

fn slot(cpu: &CpuRecord) -> usize {
    cpu.id.unwrap_or_default()
}

fn active_cpus(snapshot: &Snapshot) -> Vec<(usize, &CpuRecord)> {
    snapshot
        .active_cpus()
        .filter_map(|c| c.id.map(|id| (id, c)))
        .collect()
}

/// Merges two id-keyed lists, visiting ids in ascending order.
fn pair_by_id<'a, K: Ord, T>(
    old: Vec<(K, &'a T)>,
    new: Vec<(K, &'a T)>,
    mut visit: impl FnMut(Option<&'a T>, Option<&'a T>),
) -> bool {
    let mut pairs: BTreeMap<K, (Option<&'a T>, Option<&'a T>)> = BTreeMap::new();
    for (id, item) in old {
        pairs.entry(id).or_default().0 = Some(item);
    }
    for (id, item) in new {
        pairs.entry(id).or_default().1 = Some(item);
    }

    let mut structural = false;
    for (o, n) in pairs.into_values() {
        structural |= Change::of(o, n).is_structural();
        visit(o, n);
    }
    structural
}

fn pair_interrupts<'a>(
    old: &'a [InterruptRecord],
    new: &'a [InterruptRecord],
    mut visit: impl FnMut(Option<&'a InterruptRecord>, Option<&'a InterruptRecord>),
) -> bool {
    let mut structural = false;
    for o in old {
        let n = new.iter().find(|n| n.name == o.name);
        structural |= n.is_none();
        visit(Some(o), n);
    }
    for n in new.iter().filter(|n| !old.iter().any(|o| o.name == n.name)) {
        structural = true;
        visit(None, Some(n));
    }
    structural
}
