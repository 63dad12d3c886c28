//! Snapshot acquisition.
//!
//! Each attempt starts from a fresh [`SnapshotBuilder`], refreshes the
//! provider chain and runs the collectors in a fixed order: interrupts, CPUs,
//! groups, system. The builder only turns into a [`Snapshot`] when every
//! requested collector succeeded. On a retryable error the builder is dropped
//! and the attempt starts over; anything else is returned to the caller.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, trace, warn};

use super::{
    CpuRecord, Facet, FacetSet, GroupRecord, InterruptRecord, Snapshot, SystemAggregate,
    collect_cpus, collect_groups, collect_interrupts, collect_system,
};
use crate::provider::{ProviderError, StatsProvider};

/// Consecutive restarts between warnings about a snapshot that never settles.
const RESTARTS_BEFORE_WARN: u32 = 10;

/// Acquisition settings.
#[derive(Debug, Clone)]
pub struct AcquireConfig {
    /// Pause before retrying a busy provider or a restarted snapshot.
    pub retry_delay: Duration,
}

impl AcquireConfig {
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RETRY_DELAY)
    }
}

/// Bookkeeping from the last successful acquisition.
#[derive(Debug, Clone, Default)]
pub struct AcquireStats {
    /// Attempts made, including the one that succeeded.
    pub attempts: u32,
    /// Chain refreshes that had to wait for a busy provider.
    pub busy_refreshes: u32,
    /// Wall time spent, retries included.
    pub total: Duration,
}

/// Step of an attempt, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Refresh,
    Interrupts,
    Cpus,
    Groups,
    System,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Refresh => "chain refresh",
            Stage::Interrupts => "interrupts",
            Stage::Cpus => "cpus",
            Stage::Groups => "processor groups",
            Stage::System => "system totals",
        }
    }
}

/// Unrecoverable acquisition failure.
#[derive(Debug)]
pub struct SnapshotError {
    pub stage: Stage,
    pub source: ProviderError,
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "acquiring snapshot failed during {}: {}",
            self.stage.as_str(),
            self.source
        )
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Partial snapshot of one attempt.
struct SnapshotBuilder {
    facets: FacetSet,
    cpus: Vec<CpuRecord>,
    groups: Vec<GroupRecord>,
    interrupts: Vec<InterruptRecord>,
    system: SystemAggregate,
}

impl SnapshotBuilder {
    fn new(facets: FacetSet) -> Self {
        Self {
            facets,
            cpus: Vec::new(),
            groups: Vec::new(),
            interrupts: Vec::new(),
            system: SystemAggregate::default(),
        }
    }

    fn collect<P: StatsProvider + ?Sized>(
        &mut self,
        provider: &mut P,
    ) -> Result<(), (Stage, ProviderError)> {
        if self.facets.contains(Facet::Interrupts) {
            self.interrupts = collect_interrupts(provider).map_err(|e| (Stage::Interrupts, e))?;
        }
        if self.facets.needs_cpus() {
            self.cpus = collect_cpus(provider).map_err(|e| (Stage::Cpus, e))?;
        }
        if self.facets.contains(Facet::Groups) {
            self.groups = collect_groups(provider, &self.cpus).map_err(|e| (Stage::Groups, e))?;
        }
        if self.facets.contains(Facet::System) {
            self.system = collect_system(provider, &self.cpus).map_err(|e| (Stage::System, e))?;
        }
        Ok(())
    }

    fn finish(self, snaptime: i64) -> Snapshot {
        Snapshot {
            facets: self.facets,
            cpus: self.cpus,
            groups: self.groups,
            interrupts: self.interrupts,
            system: self.system,
            snaptime,
            taken_at: Utc::now(),
        }
    }
}

/// Takes snapshots from a provider.
pub struct Acquirer<P: StatsProvider> {
    provider: P,
    config: AcquireConfig,
    last_stats: Option<AcquireStats>,
}

impl<P: StatsProvider> Acquirer<P> {
    pub fn new(provider: P, config: AcquireConfig) -> Self {
        Self {
            provider,
            config,
            last_stats: None,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn into_inner(self) -> P {
        self.provider
    }

    pub fn config(&self) -> &AcquireConfig {
        &self.config
    }

    /// Statistics of the last successful [`Acquirer::acquire`] call.
    pub fn last_stats(&self) -> Option<&AcquireStats> {
        self.last_stats.as_ref()
    }

    /// Takes a complete snapshot of the requested facets.
    ///
    /// Blocks through busy providers and topology changes; only errors that
    /// retrying cannot fix are returned.
    pub fn acquire(&mut self, facets: FacetSet) -> Result<Snapshot, SnapshotError> {
        let start = Instant::now();
        let mut stats = AcquireStats::default();

        loop {
            stats.attempts += 1;
            let mut builder = SnapshotBuilder::new(facets);

            self.refresh_chain(&mut stats)?;

            match builder.collect(&mut self.provider) {
                Ok(()) => {
                    let snapshot = builder.finish(self.provider.hrtime());
                    stats.total = start.elapsed();
                    trace!(attempts = stats.attempts, "snapshot acquired");
                    self.last_stats = Some(stats);
                    return Ok(snapshot);
                }
                Err((stage, e)) if e.is_retryable() => {
                    if stats.attempts % RESTARTS_BEFORE_WARN == 0 {
                        warn!(
                            "snapshot restarted {} times in a row, last during {}: {}",
                            stats.attempts,
                            stage.as_str(),
                            e
                        );
                    } else {
                        debug!(
                            "restarting snapshot after {} changed: {}",
                            stage.as_str(),
                            e
                        );
                    }
                    drop(builder);
                    std::thread::sleep(self.config.retry_delay);
                }
                Err((stage, source)) => return Err(SnapshotError { stage, source }),
            }
        }
    }

    fn refresh_chain(&mut self, stats: &mut AcquireStats) -> Result<(), SnapshotError> {
        loop {
            match self.provider.refresh_chain() {
                Ok(changed) => {
                    if changed {
                        debug!("record chain changed");
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    stats.busy_refreshes += 1;
                    debug!("chain refresh busy, retrying: {}", e);
                    std::thread::sleep(self.config.retry_delay);
                }
                Err(source) => {
                    return Err(SnapshotError {
                        stage: Stage::Refresh,
                        source,
                    });
                }
            }
        }
    }
}

/// Takes a snapshot or terminates the process.
///
/// Unrecoverable provider errors are logged and end the process with exit
/// status 2.
pub fn acquire_snapshot<P: StatsProvider + ?Sized>(
    provider: &mut P,
    facets: FacetSet,
    config: &AcquireConfig,
) -> Snapshot {
    match Acquirer::new(provider, config.clone()).acquire(facets) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    }
}
