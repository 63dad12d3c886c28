//! kstatsnap - per-interval CPU, processor group and interrupt statistics.
//!
//! Takes a snapshot of the kernel counters every interval and prints what
//! changed since the previous one: per-CPU utilization, NUMA group totals,
//! interrupt rates and topology changes such as CPUs going offline.

mod report;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use kstatsnap_core::fs::RealFs;
use kstatsnap_core::provider::{ProcfsProvider, StatsProvider, open_with_retry};
use kstatsnap_core::snapshot::{AcquireConfig, Facet, FacetSet, acquire_snapshot};

use crate::report::IntervalReport;

/// Snapshot facets selectable on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum FacetArg {
    Cpus,
    Groups,
    System,
    Interrupts,
}

impl From<FacetArg> for Facet {
    fn from(arg: FacetArg) -> Self {
        match arg {
            FacetArg::Cpus => Facet::Cpus,
            FacetArg::Groups => Facet::Groups,
            FacetArg::System => Facet::System,
            FacetArg::Interrupts => Facet::Interrupts,
        }
    }
}

/// Per-interval kernel statistics.
#[derive(Parser)]
#[command(name = "kstatsnap", about = "Per-interval kernel statistics", version)]
struct Args {
    /// Sampling interval in seconds.
    #[arg(short, long, default_value = "1")]
    interval: u64,

    /// Number of reports to print before exiting. Runs until interrupted if omitted.
    #[arg(short, long)]
    count: Option<u64>,

    /// Facets to report, comma separated. All facets if omitted.
    #[arg(short, long, value_enum, value_delimiter = ',')]
    facets: Vec<FacetArg>,

    /// Pause before retrying a busy provider or a restarted snapshot, in milliseconds.
    #[arg(long, default_value = "200")]
    retry_delay_ms: u64,

    /// Path to proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: PathBuf,

    /// Path to sys filesystem (for testing/mocking).
    #[arg(long, default_value = "/sys")]
    sys_path: PathBuf,

    /// Print one JSON object per interval instead of tables.
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is warn level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn facet_set(&self) -> FacetSet {
        if self.facets.is_empty() {
            FacetSet::ALL
        } else {
            self.facets.iter().copied().map(Facet::from).collect()
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Logs go to stderr so they never mix with the report on stdout.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["kstatsnap", "kstatsnap_core"] {
        match format!("{}={}", target, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Sleeps for `interval`, waking early when `running` is cleared.
fn sleep_interval(interval: Duration, running: &AtomicBool) {
    let sleep_interval = Duration::from_millis(100);
    let mut remaining = interval;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let sleep_time = remaining.min(sleep_interval);
        std::thread::sleep(sleep_time);
        remaining = remaining.saturating_sub(sleep_time);
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let facets = args.facet_set();
    let config = AcquireConfig::new(Duration::from_millis(args.retry_delay_ms));
    let interval = Duration::from_secs(args.interval.max(1));

    info!("kstatsnap {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={}s, facets={:?}, proc={}, sys={}",
        interval.as_secs(),
        facets,
        args.proc_path.display(),
        args.sys_path.display()
    );

    let mut provider = match open_with_retry(
        || ProcfsProvider::open(RealFs::new(), &args.proc_path, &args.sys_path),
        config.retry_delay,
    ) {
        Ok(provider) => provider,
        Err(e) => {
            error!("Failed to open statistics provider: {}", e);
            std::process::exit(2);
        }
    };
    debug!(
        "Provider ready: {} records, max cpu id {}",
        provider.chain().len(),
        provider.max_cpu_id()
    );

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let mut previous = acquire_snapshot(&mut provider, facets, &config);
    let mut reports: u64 = 0;
    let stdout = io::stdout();

    while running.load(Ordering::SeqCst) && args.count.is_none_or(|n| reports < n) {
        sleep_interval(interval, &running);
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let current = acquire_snapshot(&mut provider, facets, &config);
        let report = IntervalReport::build(&previous, &current);
        reports += 1;

        let mut out = stdout.lock();
        let written = if args.json {
            report.render_json(&mut out)
        } else {
            report.render_text(&mut out)
        };
        if let Err(e) = written.and_then(|()| out.flush()) {
            // Typically a closed pipe; nothing left to report to.
            debug!("Output closed: {}", e);
            break;
        }

        previous = current;
    }

    info!("Shutdown complete after {} reports", reports);
}
