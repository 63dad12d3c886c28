//! Processor groups.

use tracing::trace;

use super::{CpuRecord, GroupRecord};
use crate::provider::{GroupId, ProviderError, StatsProvider, UNGROUPED};

/// Builds the group table from an already collected CPU table.
///
/// Group ids are discovered in two queries, a count and then the list. If
/// they disagree the group set changed underneath us and the whole snapshot
/// has to be retaken, so the mismatch is returned as a would-block error
/// instead of being patched up here. Group 0 always comes first and collects
/// every active CPU without an explicit group.
pub fn collect_groups<P: StatsProvider + ?Sized>(
    provider: &mut P,
    cpus: &[CpuRecord],
) -> Result<Vec<GroupRecord>, ProviderError> {
    let expected = provider.group_count()?;
    let ids = provider.group_list()?;
    if ids.len() != expected {
        return Err(ProviderError::would_block(format!(
            "processor group count changed from {} to {} while listing",
            expected,
            ids.len()
        )));
    }

    let mut groups: Vec<GroupRecord> = std::iter::once(UNGROUPED)
        .chain(ids.iter().copied().filter(|id| *id != UNGROUPED))
        .map(|id| GroupRecord {
            id,
            cpus: Vec::with_capacity(cpus.len()),
        })
        .collect();

    for (slot, cpu) in cpus.iter().enumerate().filter(|(_, c)| c.is_active()) {
        let group = find_group(&mut groups, cpu.group).ok_or_else(|| {
            ProviderError::vanished(format!(
                "cpu {} belongs to unknown processor group {}",
                slot, cpu.group
            ))
        })?;
        group.cpus.push(slot);
    }

    trace!(groups = groups.len(), "processor groups built");
    Ok(groups)
}

fn find_group(groups: &mut [GroupRecord], id: GroupId) -> Option<&mut GroupRecord> {
    groups.iter_mut().find(|g| g.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CpuState, ErrorKind, MockProvider};
    use crate::snapshot::collect_cpus;

    #[test]
    fn every_active_cpu_in_exactly_one_group() {
        let mut p = MockProvider::typical_system();
        let cpus = collect_cpus(&mut p).unwrap();
        let groups = collect_groups(&mut p, &cpus).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].id, UNGROUPED);
        assert_eq!(groups[0].cpus, vec![0, 1]);
        assert_eq!(groups[1].id, 1);
        assert_eq!(groups[1].cpus, vec![2, 3]);
    }

    #[test]
    fn offline_cpus_are_not_classified() {
        let mut p = MockProvider::with_offline_cpu();
        let cpus = collect_cpus(&mut p).unwrap();
        let groups = collect_groups(&mut p, &cpus).unwrap();
        assert_eq!(groups[0].cpus, vec![0]);
    }

    #[test]
    fn empty_groups_are_kept() {
        let mut p = MockProvider::typical_system();
        p.add_group(7);
        let cpus = collect_cpus(&mut p).unwrap();
        let groups = collect_groups(&mut p, &cpus).unwrap();
        assert_eq!(groups.len(), 3);
        assert!(groups[2].is_empty());
    }

    #[test]
    fn count_mismatch_is_retryable() {
        let mut p = MockProvider::typical_system();
        let cpus = collect_cpus(&mut p).unwrap();
        p.grow_groups_between_queries(4);
        let err = collect_groups(&mut p, &cpus).unwrap_err();
        assert_eq!(err.kind, ErrorKind::WouldBlock);

        let groups = collect_groups(&mut p, &cpus).unwrap();
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn cpu_in_unlisted_group_is_vanished() {
        let mut p = MockProvider::typical_system();
        p.add_cpu(5, CpuState::Online, Some(9));
        let cpus = collect_cpus(&mut p).unwrap();
        let err = collect_groups(&mut p, &cpus).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Vanished);
    }
}
