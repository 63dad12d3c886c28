//! Pre-built mock `/proc` and `/sys` trees.

use super::mock::MockFs;

const MEMINFO: &str = "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
Committed_AS:    6000000 kB
";

impl MockFs {
    /// Single NUMA node, CPUs 0-3 present out of 0-7 possible, CPU 3 offline.
    pub fn typical_procfs() -> Self {
        let mut fs = Self::new();

        fs.add_file("/proc/uptime", "12345.67 98765.43\n");
        fs.add_file("/proc/meminfo", MEMINFO);
        fs.add_file("/proc/sys/fs/dentry-state", "84123\t61234\t45\t0\t1200\t0\n");
        fs.add_file(
            "/proc/stat",
            "\
cpu  30000 1500 9000 240000 3000 600 300 0 0 0
cpu0 10000 500 3000 80000 1000 200 100 0 0 0
cpu1 10000 500 3000 80000 1000 200 100 0 0 0
cpu2 10000 500 3000 80000 1000 200 100 0 0 0
intr 1000000 44 0 0
ctxt 500000
btime 1700000000
processes 12345
procs_running 3
procs_blocked 1
",
        );
        fs.add_file(
            "/proc/interrupts",
            "\
           CPU0       CPU1       CPU2
  0:         44          0          0   IO-APIC   2-edge      timer
 16:       1000        200          3   IO-APIC  16-fasteoi   ehci_hcd:usb1
 24:       5000       6000       7000   PCI-MSI 524288-edge      nvme0q0
NMI:          5          6          7   Non-maskable interrupts
LOC:     300000     310000     290000   Local timer interrupts
ERR:          0
MIS:          0
",
        );

        fs.add_file("/sys/devices/system/cpu/possible", "0-7\n");
        for cpu in 0..4 {
            let dir = format!("/sys/devices/system/cpu/cpu{cpu}");
            fs.add_file(format!("{dir}/topology/physical_package_id"), "0\n");
            fs.add_file(format!("{dir}/topology/core_id"), format!("{cpu}\n"));
            fs.add_file(format!("{dir}/cpufreq/scaling_cur_freq"), "2400000\n");
            // cpu0 usually cannot be taken offline and has no online file
            if cpu > 0 {
                let online = if cpu == 3 { "0\n" } else { "1\n" };
                fs.add_file(format!("{dir}/online"), online);
            }
        }

        fs.add_file("/sys/devices/system/node/online", "0\n");
        fs.add_file("/sys/devices/system/node/node0/cpulist", "0-3\n");

        fs
    }

    /// Two NUMA nodes of two CPUs each, all online.
    pub fn two_node_procfs() -> Self {
        let mut fs = Self::typical_procfs();

        fs.add_file(
            "/proc/stat",
            "\
cpu  40000 2000 12000 320000 4000 800 400 0 0 0
cpu0 10000 500 3000 80000 1000 200 100 0 0 0
cpu1 10000 500 3000 80000 1000 200 100 0 0 0
cpu2 10000 500 3000 80000 1000 200 100 0 0 0
cpu3 10000 500 3000 80000 1000 200 100 0 0 0
ctxt 600000
btime 1700000000
processes 12400
procs_running 4
procs_blocked 0
",
        );
        fs.add_file(
            "/proc/interrupts",
            "\
           CPU0       CPU1       CPU2       CPU3
  0:         44          0          0          0   IO-APIC   2-edge      timer
 16:       1000        200          3          0   IO-APIC  16-fasteoi   ehci_hcd:usb1
 24:       5000       6000       7000       8000   PCI-MSI 524288-edge      nvme0q0
NMI:          5          6          7          8   Non-maskable interrupts
LOC:     300000     310000     290000     300000   Local timer interrupts
ERR:          0
MIS:          0
",
        );
        fs.add_file("/sys/devices/system/cpu/cpu3/online", "1\n");

        fs.add_file("/sys/devices/system/node/online", "0-1\n");
        fs.add_file("/sys/devices/system/node/node0/cpulist", "0-1\n");
        fs.add_file("/sys/devices/system/node/node1/cpulist", "2-3\n");

        fs
    }
}
