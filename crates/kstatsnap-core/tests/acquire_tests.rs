//! End-to-end acquisition and change detection against the mock and procfs
//! providers.

use std::time::Duration;

use kstatsnap_core::counters::CounterRecord;
use kstatsnap_core::diff::{diff_snapshots, report_changes, snapshot_has_changed};
use kstatsnap_core::fs::MockFs;
use kstatsnap_core::provider::{CpuState, ErrorKind, MockProvider, ProcfsProvider};
use kstatsnap_core::snapshot::{AcquireConfig, Acquirer, Facet, FacetSet, Snapshot};

fn config() -> AcquireConfig {
    AcquireConfig::new(Duration::ZERO)
}

/// Clears every capture time so snapshots taken at different moments compare
/// by content.
fn without_times(mut s: Snapshot) -> Snapshot {
    fn clear(r: &mut CounterRecord) {
        r.snaptime = 0;
    }

    s.snaptime = 0;
    s.taken_at = Default::default();
    for cpu in &mut s.cpus {
        clear(&mut cpu.vm);
        clear(&mut cpu.sys);
    }
    for r in [
        &mut s.system.sysinfo,
        &mut s.system.vminfo,
        &mut s.system.nc_stats,
        &mut s.system.cpu_vm,
        &mut s.system.cpu_sys,
    ] {
        clear(r);
    }
    s
}

#[test]
fn restart_yields_same_snapshot_as_clean_run() {
    let base = MockProvider::typical_system();
    let clean = Acquirer::new(base.clone(), config())
        .acquire(FacetSet::ALL)
        .unwrap();
    let clean = without_times(clean);

    for kind in [ErrorKind::Vanished, ErrorKind::WouldBlock] {
        for n in 1..=19 {
            let mut faulty = base.clone();
            faulty.fail_read_at(n, kind);
            let mut acquirer = Acquirer::new(faulty, config());

            let snapshot = acquirer.acquire(FacetSet::ALL).unwrap();
            assert_eq!(acquirer.last_stats().unwrap().attempts, 2, "{kind:?} on read {n}");
            assert_eq!(without_times(snapshot), clean, "{kind:?} on read {n}");
        }
    }
}

#[test]
fn groups_partition_active_cpus() {
    let mut scenarios = vec![
        MockProvider::typical_system(),
        MockProvider::with_offline_cpu(),
    ];
    let mut crowded = MockProvider::typical_system();
    crowded.add_group(4);
    crowded.add_cpu(6, CpuState::Online, Some(4));
    crowded.add_cpu(7, CpuState::Offline, Some(4));
    scenarios.push(crowded);

    for provider in scenarios {
        let s = Acquirer::new(provider, config())
            .acquire(Facet::Groups.into())
            .unwrap();

        let mut grouped: Vec<usize> = s.groups.iter().flat_map(|g| g.cpus.iter().copied()).collect();
        grouped.sort_unstable();
        let before_dedup = grouped.len();
        grouped.dedup();
        assert_eq!(grouped.len(), before_dedup, "cpu listed twice");

        let active: Vec<usize> = s.active_cpus().filter_map(|c| c.id).collect();
        assert_eq!(grouped, active);

        for group in &s.groups {
            assert!(s.group_cpus(group).all(|c| c.group == group.id));
        }
    }
}

#[test]
fn system_totals_match_cpu_sums() {
    let mut provider = MockProvider::typical_system();
    provider.advance(
        &kstatsnap_core::provider::RecordId::named("cpu", 2, "sys"),
        500,
    );
    let s = Acquirer::new(provider, config())
        .acquire(FacetSet::ALL)
        .unwrap();

    for field in ["cpu_ticks_idle", "cpu_ticks_user", "intr"] {
        let sum: u64 = s.active_cpus().map(|c| c.sys.value(field)).sum();
        assert_eq!(s.system.cpu_sys.value(field), sum, "{field}");
    }
    assert_eq!(s.system.active_cpus, s.nr_active_cpus());
}

#[test]
fn procfs_numa_snapshot() {
    let provider = ProcfsProvider::open(MockFs::two_node_procfs(), "/proc", "/sys").unwrap();
    let s = Acquirer::new(provider, config())
        .acquire(FacetSet::ALL)
        .unwrap();

    assert_eq!(s.cpus.len(), 8);
    assert_eq!(s.nr_active_cpus(), 4);
    let layout: Vec<(u32, Vec<usize>)> = s.groups.iter().map(|g| (g.id, g.cpus.clone())).collect();
    assert_eq!(layout, vec![(0, vec![]), (1, vec![0, 1]), (2, vec![2, 3])]);

    assert_eq!(s.interrupts[0].name, "clock");
    assert_eq!(s.interrupts[0].count, 1_200_000);
    assert_eq!(s.interrupt("irq24").map(|i| i.count), Some(26_000));

    assert_eq!(s.system.active_cpus, 4);
    assert_eq!(s.system.cpu_sys.value("cpu_ticks_idle"), 320_000);
    assert_eq!(s.system.ticks, 1_200_000);
}

#[test]
fn procfs_hotplug_is_reported() {
    let mut provider = ProcfsProvider::open(MockFs::typical_procfs(), "/proc", "/sys").unwrap();
    let mut acquirer = Acquirer::new(&mut provider, config());
    let old = acquirer.acquire(FacetSet::ALL).unwrap();
    assert_eq!(old.nr_active_cpus(), 3);

    let fs = acquirer.provider_mut().fs_mut();
    fs.add_file("/sys/devices/system/cpu/cpu2/online", "0\n");
    fs.add_file("/sys/devices/system/cpu/cpu3/online", "1\n");
    fs.add_file(
        "/proc/stat",
        "\
cpu  30000 1500 9000 240000 3000 600 300 0 0 0
cpu0 10100 500 3000 80000 1000 200 100 0 0 0
cpu1 10100 500 3000 80000 1000 200 100 0 0 0
cpu3 10 0 10 100 0 0 0 0 0 0
ctxt 510000
procs_running 2
",
    );
    let new = acquirer.acquire(FacetSet::ALL).unwrap();

    assert!(snapshot_has_changed(Some(&old), &new));
    let mut out = Vec::new();
    report_changes(Some(&old), &new, &mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "<<processor 2 removed>>\n<<processor 3 added>>\n"
    );

    let mut deltas = Vec::new();
    diff_snapshots(Some(&old), &new, Facet::Cpus, |pairing| {
        if let kstatsnap_core::Pairing::Cpu(Some(o), Some(n)) = pairing {
            deltas.push(kstatsnap_core::counters::cpu_ticks_delta(Some(&o.sys), &n.sys));
        }
    });
    assert_eq!(deltas, vec![100, 100]);
}

#[test]
fn snapshots_serialize_to_json() {
    let s = Acquirer::new(MockProvider::typical_system(), config())
        .acquire(FacetSet::ALL)
        .unwrap();
    let json = serde_json::to_string(&s).unwrap();
    let back: Snapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back, s);
}
