//! Ready-made mock provider states.

use super::mock::MockProvider;
use super::{CpuState, RecordId};

impl MockProvider {
    /// Eight CPU slots, CPUs 0-3 online, CPUs 2 and 3 in group 1, two
    /// interrupt sources.
    pub fn typical_system() -> Self {
        let mut p = Self::new(7);

        p.add_group(1);
        p.add_cpu(0, CpuState::Online, None);
        p.add_cpu(1, CpuState::Online, None);
        p.add_cpu(2, CpuState::Online, Some(1));
        p.add_cpu(3, CpuState::NoIntr, Some(1));

        p.add_interrupt("ata", 0, "ata0", [1200, 0, 0, 3, 0]);
        p.add_interrupt("e1000g", 0, "e1000g0", [45000, 12, 0, 0, 0]);

        p.set_named(
            RecordId::named("unix", 0, "sysinfo"),
            &[("updates", 120), ("runque", 4), ("runocc", 2), ("waiting", 1)],
        );
        p.set_named(
            RecordId::named("unix", 0, "vminfo"),
            &[
                ("freemem", 1_048_576),
                ("swap_resv", 2048),
                ("swap_alloc", 1024),
                ("swap_avail", 8192),
                ("swap_free", 7168),
            ],
        );
        p.set_named(
            RecordId::named("unix", 0, "dnlcstats"),
            &[("hits", 90_000), ("misses", 1_500), ("enters", 1_200)],
        );
        p.set_named(
            RecordId::named("unix", 0, "system_misc"),
            &[("clk_intr", 360_000), ("deficit", 0), ("nproc", 98), ("ncpus", 4)],
        );

        p
    }

    /// Like [`MockProvider::typical_system`] with CPU 1 present but offline.
    pub fn with_offline_cpu() -> Self {
        let mut p = Self::typical_system();
        p.set_cpu_state(1, CpuState::Offline);
        p
    }
}
