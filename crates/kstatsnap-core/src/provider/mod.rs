//! Statistics provider abstraction.
//!
//! A provider exposes a chain of named counter records plus the platform
//! queries needed to lay out CPUs and processor groups. The snapshot engine
//! only ever talks to a provider through [`StatsProvider`], so the same
//! acquisition code runs against the live Linux provider and the in-memory
//! mock used in tests.
//!
//! ```text
//!                 ┌──────────────────────┐
//!                 │   Snapshot engine    │
//!                 └──────────┬───────────┘
//!                            │
//!                   ┌────────▼────────┐
//!                   │  StatsProvider  │ (trait)
//!                   └────────┬────────┘
//!              ┌─────────────┴─────────────┐
//!       ┌──────▼───────┐            ┌──────▼───────┐
//!       │ProcfsProvider│            │ MockProvider │
//!       │ /proc + /sys │            │  (testing)   │
//!       └──────────────┘            └──────────────┘
//! ```

pub mod mock;
#[cfg(feature = "procfs")]
pub mod procfs;
mod scenarios;

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use crate::counters::{RecordId, RecordKind};
use crate::counters::CounterRecord;
pub use mock::MockProvider;
#[cfg(feature = "procfs")]
pub use procfs::ProcfsProvider;

/// Processor group identifier; [`UNGROUPED`] collects CPUs with no group.
pub type GroupId = u32;

/// Group id of CPUs that belong to no explicit group.
pub const UNGROUPED: GroupId = 0;

/// Operational state of a present CPU, as reported by `p_online(2)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuState {
    Online,
    /// Online but not taking interrupts.
    NoIntr,
    Offline,
    Faulted,
    Spare,
    PoweredOff,
}

impl CpuState {
    /// Whether the CPU runs threads and therefore has counters.
    pub fn is_online(self) -> bool {
        matches!(self, CpuState::Online | CpuState::NoIntr)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CpuState::Online => "on-line",
            CpuState::NoIntr => "no-intr",
            CpuState::Offline => "off-line",
            CpuState::Faulted => "faulted",
            CpuState::Spare => "spare",
            CpuState::PoweredOff => "powered-off",
        }
    }
}

/// Failure class of a provider call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Provider busy or short on memory; try again shortly.
    WouldBlock,
    /// A record or entity disappeared between two reads.
    Vanished,
    /// A record that must exist was not found.
    NotFound,
    /// Anything else (permissions, corruption, misuse).
    Other,
}

impl ErrorKind {
    /// Whether a snapshot attempt hitting this error should start over.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::WouldBlock | ErrorKind::Vanished)
    }
}

/// Error returned by provider calls.
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub context: String,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }

    pub fn would_block(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::WouldBlock, context)
    }

    pub fn vanished(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Vanished, context)
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, context)
    }

    pub fn other(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, context)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ErrorKind::WouldBlock => write!(f, "resource temporarily unavailable: {}", self.context),
            ErrorKind::Vanished => write!(f, "source disappeared: {}", self.context),
            ErrorKind::NotFound => write!(f, "not found: {}", self.context),
            ErrorKind::Other => write!(f, "{}", self.context),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<io::Error> for ProviderError {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::OutOfMemory => {
                ErrorKind::WouldBlock
            }
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::Other,
        };
        ProviderError::new(kind, e.to_string())
    }
}

/// Source of counter records and CPU topology.
///
/// Calls are not re-entrant: the engine holds the provider by `&mut` for a
/// whole acquisition.
pub trait StatsProvider {
    /// Brings the record chain up to date.
    ///
    /// Returns `true` if the chain changed since the previous refresh.
    fn refresh_chain(&mut self) -> Result<bool, ProviderError>;

    /// Current record chain, in provider order.
    fn chain(&self) -> &[RecordId];

    /// Finds a record; `None` for `instance` or `name` matches anything.
    fn lookup(&self, module: &str, instance: Option<i32>, name: Option<&str>) -> Option<RecordId> {
        self.chain()
            .iter()
            .find(|id| id.matches(module, instance, name))
            .cloned()
    }

    /// Reads the current data of a record.
    fn read(&mut self, id: &RecordId) -> Result<CounterRecord, ProviderError>;

    /// High-resolution monotonic time, in nanoseconds. May wrap.
    fn hrtime(&mut self) -> i64;

    /// Highest CPU id the platform can ever hand out.
    fn max_cpu_id(&self) -> usize;

    /// State of the CPU in `slot`, `None` when no CPU occupies it.
    fn cpu_state(&self, slot: usize) -> Option<CpuState>;

    /// Group the CPU belongs to, `None` when it has no explicit group.
    fn cpu_group(&self, slot: usize) -> Option<GroupId>;

    /// Number of processor groups currently defined.
    fn group_count(&mut self) -> Result<usize, ProviderError>;

    /// Ids of the processor groups currently defined.
    fn group_list(&mut self) -> Result<Vec<GroupId>, ProviderError>;
}

impl<P: StatsProvider + ?Sized> StatsProvider for &mut P {
    fn refresh_chain(&mut self) -> Result<bool, ProviderError> {
        (**self).refresh_chain()
    }

    fn chain(&self) -> &[RecordId] {
        (**self).chain()
    }

    fn lookup(&self, module: &str, instance: Option<i32>, name: Option<&str>) -> Option<RecordId> {
        (**self).lookup(module, instance, name)
    }

    fn read(&mut self, id: &RecordId) -> Result<CounterRecord, ProviderError> {
        (**self).read(id)
    }

    fn hrtime(&mut self) -> i64 {
        (**self).hrtime()
    }

    fn max_cpu_id(&self) -> usize {
        (**self).max_cpu_id()
    }

    fn cpu_state(&self, slot: usize) -> Option<CpuState> {
        (**self).cpu_state(slot)
    }

    fn cpu_group(&self, slot: usize) -> Option<GroupId> {
        (**self).cpu_group(slot)
    }

    fn group_count(&mut self) -> Result<usize, ProviderError> {
        (**self).group_count()
    }

    fn group_list(&mut self) -> Result<Vec<GroupId>, ProviderError> {
        (**self).group_list()
    }
}

/// Looks a record up and reads it. A missing record is `NotFound`.
pub fn lookup_read<P: StatsProvider + ?Sized>(
    provider: &mut P,
    module: &str,
    instance: Option<i32>,
    name: Option<&str>,
) -> Result<CounterRecord, ProviderError> {
    let id = provider.lookup(module, instance, name).ok_or_else(|| {
        ProviderError::not_found(format!(
            "{}:{}:{}",
            module,
            instance.map_or_else(|| "*".to_string(), |i| i.to_string()),
            name.unwrap_or("*")
        ))
    })?;
    provider.read(&id)
}

/// Records of the given kind, in chain order.
pub fn records_of_kind(chain: &[RecordId], kind: RecordKind) -> impl Iterator<Item = &RecordId> {
    chain.iter().filter(move |id| id.kind == kind)
}

/// Opens a provider, sleeping `delay` between attempts while it would block.
pub fn open_with_retry<P, F>(mut open: F, delay: Duration) -> Result<P, ProviderError>
where
    F: FnMut() -> Result<P, ProviderError>,
{
    loop {
        match open() {
            Ok(provider) => return Ok(provider),
            Err(e) if e.kind == ErrorKind::WouldBlock => {
                debug!("provider busy, retrying open: {}", e);
                std::thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}
