//! System-wide totals.

use tracing::trace;

use super::{CpuRecord, SystemAggregate};
use crate::counters::accumulate;
use crate::provider::{ProviderError, StatsProvider, lookup_read};

/// Copies the global records and sums the counters of every active CPU.
pub fn collect_system<P: StatsProvider + ?Sized>(
    provider: &mut P,
    cpus: &[CpuRecord],
) -> Result<SystemAggregate, ProviderError> {
    let mut system = SystemAggregate {
        sysinfo: lookup_read(provider, "unix", Some(0), Some("sysinfo"))?,
        vminfo: lookup_read(provider, "unix", Some(0), Some("vminfo"))?,
        nc_stats: lookup_read(provider, "unix", Some(0), Some("dnlcstats"))?,
        ..SystemAggregate::default()
    };

    let misc = lookup_read(provider, "unix", Some(0), Some("system_misc"))?;
    system.ticks = misc.value("clk_intr");
    system.deficit = misc
        .field("deficit")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    for cpu in cpus.iter().filter(|c| c.is_active()) {
        accumulate(&cpu.vm, &mut system.cpu_vm);
        accumulate(&cpu.sys, &mut system.cpu_sys);
        system.active_cpus += 1;
    }

    trace!(active_cpus = system.active_cpus, "system totals built");
    Ok(system)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ErrorKind, MockProvider, RecordId};
    use crate::snapshot::collect_cpus;

    #[test]
    fn sums_active_cpus() {
        let mut p = MockProvider::typical_system();
        p.advance(&RecordId::named("cpu", 3, "sys"), 1);
        let cpus = collect_cpus(&mut p).unwrap();
        let system = collect_system(&mut p, &cpus).unwrap();

        assert_eq!(system.active_cpus, 4);
        assert_eq!(system.cpu_sys.value("cpu_ticks_idle"), 4 * 9000 + 1);
        assert_eq!(system.cpu_vm.value("pgin"), 40);
        assert_eq!(system.ticks, 360_000);
        assert_eq!(system.deficit, 0);
        assert_eq!(system.vminfo.value("freemem"), 1_048_576);
        assert_eq!(system.nc_stats.value("hits"), 90_000);
        // Summing must not alias the per-CPU copies.
        assert_eq!(cpus[0].sys.value("cpu_ticks_idle"), 9000);
    }

    #[test]
    fn offline_cpu_not_counted() {
        let mut p = MockProvider::with_offline_cpu();
        let cpus = collect_cpus(&mut p).unwrap();
        let system = collect_system(&mut p, &cpus).unwrap();
        assert_eq!(system.active_cpus, 3);
        assert_eq!(system.cpu_sys.value("cpu_ticks_user"), 3 * 600);
    }

    #[test]
    fn missing_global_record_is_fatal() {
        let mut p = MockProvider::new(0);
        let err = collect_system(&mut p, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(!err.is_retryable());
    }
}
