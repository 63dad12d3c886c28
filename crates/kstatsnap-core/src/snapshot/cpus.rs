//! Per-CPU slot table.

use tracing::trace;

use super::CpuRecord;
use crate::provider::{ProviderError, StatsProvider, UNGROUPED};

/// Builds the table of all CPU slots `0..=max_cpu_id`.
///
/// Empty slots stay placeholders. Present CPUs get their state and group;
/// active ones also get copies of their `cpu:<id>:vm` and `cpu:<id>:sys`
/// records. A present CPU whose records are missing from the chain has just
/// come or gone, so that is reported as [`ErrorKind::Vanished`].
///
/// [`ErrorKind::Vanished`]: crate::provider::ErrorKind::Vanished
pub fn collect_cpus<P: StatsProvider + ?Sized>(
    provider: &mut P,
) -> Result<Vec<CpuRecord>, ProviderError> {
    let nr_slots = provider.max_cpu_id() + 1;
    let mut cpus = vec![CpuRecord::absent(); nr_slots];

    for (slot, cpu) in cpus.iter_mut().enumerate() {
        let Some(state) = provider.cpu_state(slot) else {
            continue;
        };
        cpu.id = Some(slot);
        cpu.state = Some(state);

        let instance = slot as i32;
        read_cpu_record(provider, "cpu_info", instance, None)?;

        cpu.group = provider.cpu_group(slot).unwrap_or(UNGROUPED);

        if !cpu.is_active() {
            trace!(slot, state = state.as_str(), "cpu present but not active");
            continue;
        }

        cpu.vm = read_cpu_record(provider, "cpu", instance, Some("vm"))?;
        cpu.sys = read_cpu_record(provider, "cpu", instance, Some("sys"))?;
    }

    trace!(slots = nr_slots, "cpu table built");
    Ok(cpus)
}

fn read_cpu_record<P: StatsProvider + ?Sized>(
    provider: &mut P,
    module: &str,
    instance: i32,
    name: Option<&str>,
) -> Result<crate::counters::CounterRecord, ProviderError> {
    let id = provider
        .lookup(module, Some(instance), name)
        .ok_or_else(|| {
            ProviderError::vanished(format!(
                "no {}:{}:{} record for present cpu",
                module,
                instance,
                name.unwrap_or("*")
            ))
        })?;
    provider.read(&id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CpuState, ErrorKind, MockProvider};

    #[test]
    fn table_covers_every_slot() {
        let mut p = MockProvider::typical_system();
        let cpus = collect_cpus(&mut p).unwrap();

        assert_eq!(cpus.len(), 8);
        assert_eq!(cpus.iter().filter(|c| c.is_active()).count(), 4);
        assert!(cpus[4..].iter().all(|c| c.id.is_none() && c.sys.is_empty()));
        assert_eq!(cpus[2].group, 1);
        assert_eq!(cpus[0].group, UNGROUPED);
        assert_eq!(cpus[0].sys.value("cpu_ticks_idle"), 9000);
    }

    #[test]
    fn offline_cpu_has_no_counters() {
        let mut p = MockProvider::with_offline_cpu();
        let cpus = collect_cpus(&mut p).unwrap();

        assert_eq!(cpus[1].id, Some(1));
        assert_eq!(cpus[1].state, Some(CpuState::Offline));
        assert!(!cpus[1].is_active());
        assert!(cpus[1].vm.is_empty());
        assert!(cpus[1].sys.is_empty());
    }

    #[test]
    fn read_failure_aborts() {
        let mut p = MockProvider::typical_system();
        p.fail_read_at(2, ErrorKind::Other);
        let err = collect_cpus(&mut p).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Other);
    }

    #[test]
    fn missing_records_for_present_cpu_are_vanished() {
        let mut p = MockProvider::typical_system();
        p.drop_cpu_records(2);
        let err = collect_cpus(&mut p).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Vanished);
        assert!(err.to_string().contains("cpu_info:2:*"));
    }
}
