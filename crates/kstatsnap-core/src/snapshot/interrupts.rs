//! Interrupt sources.

use tracing::trace;

use super::InterruptRecord;
use crate::provider::{ProviderError, RecordKind, StatsProvider, lookup_read, records_of_kind};

/// Name of the synthetic entry that always sits at index 0.
pub const CLOCK_INTERRUPT: &str = "clock";

/// Builds the interrupt table: `"clock"` from `unix:0:system_misc`, then one
/// entry per interrupt record in chain order.
pub fn collect_interrupts<P: StatsProvider + ?Sized>(
    provider: &mut P,
) -> Result<Vec<InterruptRecord>, ProviderError> {
    let sources: Vec<_> = records_of_kind(provider.chain(), RecordKind::Intr)
        .cloned()
        .collect();
    let mut interrupts = Vec::with_capacity(sources.len() + 1);

    let misc = lookup_read(provider, "unix", Some(0), Some("system_misc"))?;
    interrupts.push(InterruptRecord {
        name: CLOCK_INTERRUPT.to_string(),
        count: misc.value("clk_intr"),
    });

    for id in &sources {
        let record = provider.read(id)?;
        interrupts.push(InterruptRecord {
            name: id.name.clone(),
            count: record.intr_total(),
        });
    }

    trace!(sources = interrupts.len(), "interrupt table built");
    Ok(interrupts)
}
