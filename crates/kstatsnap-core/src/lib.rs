//! kstatsnap-core — consistent snapshots of kernel performance counters.
//!
//! Provides:
//! - `counters` — counter records, copy/accumulate and wrap-safe deltas
//! - `provider` — statistics source abstraction, in-memory mock provider
//! - `snapshot` — snapshot model and the retrying acquisition engine
//! - `diff` — pairing two snapshots and reporting topology changes
//! - `fs` — filesystem abstraction used by file-backed providers
//!
//! With `procfs` feature (default):
//! - `provider::procfs` — provider backed by Linux `/proc` and `/sys`

pub mod counters;
pub mod diff;
pub mod fs;
pub mod provider;
pub mod snapshot;

pub use diff::{
    Change, Pairing, describe_changes, diff_snapshots, report_changes, snapshot_has_changed,
};
pub use provider::{ErrorKind, ProviderError, StatsProvider};
pub use snapshot::{AcquireConfig, Acquirer, Facet, FacetSet, Snapshot, acquire_snapshot};
