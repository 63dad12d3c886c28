//! Interval reports built from two consecutive snapshots.
//!
//! An [`IntervalReport`] holds the rates and percentages for one sampling
//! interval. It renders either as an mpstat-like text table or as one JSON
//! line.

use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;

use kstatsnap_core::counters::{CounterRecord, field_delta, hrtime_delta};
use kstatsnap_core::diff::{Pairing, describe_changes, diff_snapshots};
use kstatsnap_core::provider::GroupId;
use kstatsnap_core::snapshot::{Facet, Snapshot};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// CPU time split, in percent of the ticks that elapsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Usage {
    pub usr: f64,
    pub sys: f64,
    pub wt: f64,
    pub idl: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct TickDelta {
    user: u64,
    kernel: u64,
    wait: u64,
    idle: u64,
}

impl TickDelta {
    fn between(old: Option<&CounterRecord>, new: &CounterRecord) -> Self {
        Self {
            user: field_delta(old, new, "cpu_ticks_user"),
            kernel: field_delta(old, new, "cpu_ticks_kernel"),
            wait: field_delta(old, new, "cpu_ticks_wait"),
            idle: field_delta(old, new, "cpu_ticks_idle"),
        }
    }

    fn add(&mut self, other: TickDelta) {
        self.user = self.user.wrapping_add(other.user);
        self.kernel = self.kernel.wrapping_add(other.kernel);
        self.wait = self.wait.wrapping_add(other.wait);
        self.idle = self.idle.wrapping_add(other.idle);
    }

    fn usage(self) -> Usage {
        let total = self
            .user
            .wrapping_add(self.kernel)
            .wrapping_add(self.wait)
            .wrapping_add(self.idle);
        if total == 0 {
            return Usage::default();
        }
        let pct = |v: u64| v as f64 * 100.0 / total as f64;
        Usage {
            usr: pct(self.user),
            sys: pct(self.kernel),
            wt: pct(self.wait),
            idl: pct(self.idle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuReport {
    pub cpu: usize,
    pub group: GroupId,
    #[serde(flatten)]
    pub usage: Usage,
    pub intr_per_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    pub group: GroupId,
    pub ncpus: usize,
    #[serde(flatten)]
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterruptReport {
    pub name: String,
    pub per_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemReport {
    pub active_cpus: usize,
    #[serde(flatten)]
    pub usage: Usage,
    pub clock_per_sec: f64,
    pub freemem: u64,
}

/// Rates for one interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalReport {
    pub taken_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    /// Topology change notices, one per line.
    pub changes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cpus: Vec<CpuReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interrupts: Vec<InterruptReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemReport>,
}

impl IntervalReport {
    /// Computes the report for the interval between `old` and `new`.
    pub fn build(old: &Snapshot, new: &Snapshot) -> Self {
        let elapsed_secs = hrtime_delta(old.snaptime, new.snaptime) as f64 / NANOS_PER_SEC;
        let rate = |delta: u64| {
            if elapsed_secs > 0.0 {
                delta as f64 / elapsed_secs
            } else {
                0.0
            }
        };

        let changes = describe_changes(Some(old), new);

        let mut cpus = Vec::new();
        if new.facets.contains(Facet::Cpus) {
            diff_snapshots(Some(old), new, Facet::Cpus, |pairing| {
                if let Pairing::Cpu(o, Some(n)) = pairing {
                    let old_sys = o.map(|c| &c.sys);
                    cpus.push(CpuReport {
                        cpu: n.id.unwrap_or_default(),
                        group: n.group,
                        usage: TickDelta::between(old_sys, &n.sys).usage(),
                        intr_per_sec: rate(field_delta(old_sys, &n.sys, "intr")),
                    });
                }
            });
        }

        let groups = if new.facets.contains(Facet::Groups) {
            new.groups
                .iter()
                .map(|group| {
                    let mut ticks = TickDelta::default();
                    for cpu in new.group_cpus(group) {
                        let old_cpu = cpu.id.and_then(|id| old.cpu(id)).filter(|c| c.is_active());
                        if let Some(o) = old_cpu {
                            ticks.add(TickDelta::between(Some(&o.sys), &cpu.sys));
                        }
                    }
                    GroupReport {
                        group: group.id,
                        ncpus: group.len(),
                        usage: ticks.usage(),
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut interrupts = Vec::new();
        if new.facets.contains(Facet::Interrupts) {
            diff_snapshots(Some(old), new, Facet::Interrupts, |pairing| {
                if let Pairing::Interrupt(Some(o), Some(n)) = pairing {
                    interrupts.push(InterruptReport {
                        name: n.name.clone(),
                        per_sec: rate(n.count.wrapping_sub(o.count)),
                    });
                }
            });
        }

        let system = new.facets.contains(Facet::System).then(|| {
            SystemReport {
                active_cpus: new.system.active_cpus,
                usage: paired_ticks(old, new).usage(),
                clock_per_sec: rate(new.system.ticks.wrapping_sub(old.system.ticks)),
                freemem: new.system.vminfo.value("freemem"),
            }
        });

        Self {
            taken_at: new.taken_at,
            elapsed_secs,
            changes,
            cpus,
            groups,
            interrupts,
            system,
        }
    }

    /// Writes the report as text tables.
    pub fn render_text<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for line in &self.changes {
            writeln!(out, "{}", line)?;
        }

        if !self.cpus.is_empty() {
            writeln!(out, "CPU  grp    usr    sys     wt    idl    intr/s")?;
            for c in &self.cpus {
                writeln!(
                    out,
                    "{:>3} {:>4} {} {:>9.1}",
                    c.cpu,
                    c.group,
                    format_usage(&c.usage),
                    c.intr_per_sec
                )?;
            }
        }

        if !self.groups.is_empty() {
            writeln!(out, "GRP ncpu    usr    sys     wt    idl")?;
            for g in &self.groups {
                writeln!(out, "{:>3} {:>4} {}", g.group, g.ncpus, format_usage(&g.usage))?;
            }
        }

        if !self.interrupts.is_empty() {
            writeln!(out, "{:<20} {:>10}", "SOURCE", "intr/s")?;
            for i in &self.interrupts {
                writeln!(out, "{:<20} {:>10.1}", i.name, i.per_sec)?;
            }
        }

        if let Some(s) = &self.system {
            writeln!(out, "SYS  ncpu    usr    sys     wt    idl     clk/s    freemem")?;
            writeln!(
                out,
                "{:>8} {} {:>9.1} {:>10}",
                s.active_cpus,
                format_usage(&s.usage),
                s.clock_per_sec,
                s.freemem
            )?;
        }

        writeln!(out)
    }

    /// Writes the report as a single JSON line.
    pub fn render_json<W: Write>(&self, out: &mut W) -> io::Result<()> {
        serde_json::to_writer(&mut *out, self)?;
        writeln!(out)
    }
}

/// Tick deltas summed over the CPUs active in both snapshots. CPUs that came
/// or went during the interval have no delta to contribute.
fn paired_ticks(old: &Snapshot, new: &Snapshot) -> TickDelta {
    let mut ticks = TickDelta::default();
    diff_snapshots(Some(old), new, Facet::Cpus, |pairing| {
        if let Pairing::Cpu(Some(o), Some(n)) = pairing {
            ticks.add(TickDelta::between(Some(&o.sys), &n.sys));
        }
    });
    ticks
}

fn format_usage(u: &Usage) -> String {
    format!("{:>6.1} {:>6.1} {:>6.1} {:>6.1}", u.usr, u.sys, u.wt, u.idl)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use kstatsnap_core::provider::{MockProvider, RecordId};
    use kstatsnap_core::snapshot::{AcquireConfig, Acquirer, FacetSet};

    fn take(p: &mut MockProvider) -> Snapshot {
        Acquirer::new(p, AcquireConfig::new(Duration::ZERO))
            .acquire(FacetSet::ALL)
            .unwrap()
    }

    /// Two snapshots two seconds apart with only CPU 0 and two interrupt
    /// sources moving.
    fn interval() -> (Snapshot, Snapshot) {
        let mut p = MockProvider::typical_system();
        let old = take(&mut p);

        let sys = RecordId::named("cpu", 0, "sys");
        p.set_field(&sys, "cpu_ticks_idle", 9025);
        p.set_field(&sys, "cpu_ticks_user", 650);
        p.set_field(&sys, "cpu_ticks_kernel", 325);
        p.set_field(&sys, "intr", 2400);
        p.set_field(&RecordId::named("unix", 0, "system_misc"), "clk_intr", 360_200);
        p.add_interrupt("e1000g", 0, "e1000g0", [46000, 12, 0, 0, 0]);

        let mut new = take(&mut p);
        new.snaptime = old.snaptime + 2_000_000_000;
        (old, new)
    }

    #[test]
    fn cpu_usage_and_rates() {
        let (old, new) = interval();
        let report = IntervalReport::build(&old, &new);

        assert_eq!(report.elapsed_secs, 2.0);
        assert!(report.changes.is_empty());
        assert_eq!(report.cpus.len(), 4);

        let cpu0 = &report.cpus[0];
        assert_eq!(cpu0.cpu, 0);
        assert_eq!(
            cpu0.usage,
            Usage {
                usr: 50.0,
                sys: 25.0,
                wt: 0.0,
                idl: 25.0
            }
        );
        assert_eq!(cpu0.intr_per_sec, 200.0);
        assert_eq!(report.cpus[1].usage, Usage::default());
    }

    #[test]
    fn groups_and_system_totals() {
        let (old, new) = interval();
        let report = IntervalReport::build(&old, &new);

        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.groups[0].ncpus, 2);
        assert_eq!(report.groups[0].usage.usr, 50.0);
        assert_eq!(report.groups[1].usage, Usage::default());

        let system = report.system.as_ref().unwrap();
        assert_eq!(system.active_cpus, 4);
        assert_eq!(system.usage.idl, 25.0);
        assert_eq!(system.clock_per_sec, 100.0);
        assert_eq!(system.freemem, 1_048_576);
    }

    #[test]
    fn interrupt_rates() {
        let (old, new) = interval();
        let report = IntervalReport::build(&old, &new);

        let rates: Vec<(&str, f64)> = report
            .interrupts
            .iter()
            .map(|i| (i.name.as_str(), i.per_sec))
            .collect();
        assert_eq!(rates, vec![("clock", 100.0), ("ata0", 0.0), ("e1000g0", 500.0)]);
    }

    #[test]
    fn changes_are_carried() {
        let mut p = MockProvider::typical_system();
        let old = take(&mut p);
        p.remove_cpu(1);
        let new = take(&mut p);

        let report = IntervalReport::build(&old, &new);
        assert_eq!(report.changes, vec!["<<processor 1 removed>>".to_string()]);
        assert_eq!(report.cpus.len(), 3);
    }

    #[test]
    fn text_output() {
        let (old, new) = interval();
        let mut out = Vec::new();
        IntervalReport::build(&old, &new).render_text(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("CPU  grp"));
        assert!(text.contains("  0    0   50.0   25.0    0.0   25.0     200.0\n"));
        assert!(text.contains("e1000g0                   500.0\n"));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn json_output_is_one_line() {
        let (old, new) = interval();
        let mut out = Vec::new();
        IntervalReport::build(&old, &new).render_json(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(text.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["cpus"].as_array().map(Vec::len), Some(4));
        assert_eq!(value["cpus"][0]["usr"], 50.0);
        assert_eq!(value["system"]["active_cpus"], 4);
    }

    #[test]
    fn usage_survives_cpu_removal() {
        let mut p = MockProvider::typical_system();
        let old = take(&mut p);

        p.remove_cpu(1);
        let sys = RecordId::named("cpu", 0, "sys");
        p.set_field(&sys, "cpu_ticks_idle", 9025);
        p.set_field(&sys, "cpu_ticks_user", 650);
        p.set_field(&sys, "cpu_ticks_kernel", 325);
        let new = take(&mut p);

        let report = IntervalReport::build(&old, &new);
        let expected = Usage {
            usr: 50.0,
            sys: 25.0,
            wt: 0.0,
            idl: 25.0,
        };
        assert_eq!(report.system.as_ref().unwrap().usage, expected);
        assert_eq!(report.groups[0].usage, expected);
        assert_eq!(report.groups[0].ncpus, 1);
    }

    #[test]
    fn idle_interval_after_removal_reports_nothing() {
        let mut p = MockProvider::typical_system();
        let old = take(&mut p);
        p.remove_cpu(1);
        let new = take(&mut p);

        let report = IntervalReport::build(&old, &new);
        assert_eq!(report.system.as_ref().unwrap().usage, Usage::default());
    }
}
