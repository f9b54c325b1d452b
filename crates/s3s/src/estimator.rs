//! 🧾 Dry-run estimator: what a real run would scan, without querying anything.
//!
//! The supervisor feeds it the exact same enumeration a real run would produce (same
//! prefixes, same key filter). It adds up sizes instead of issuing queries.

use async_channel::Receiver;
use tracing::trace;

use crate::common::ObjectDescriptor;

/// 📊 The bill, before anyone pays it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DryRunSummary {
    pub total_bytes: u64,
    pub total_objects: u64,
}

impl DryRunSummary {
    /// ➕ Accounts for one more object.
    pub fn absorb(&mut self, descriptor: &ObjectDescriptor) {
        self.total_bytes = self.total_bytes.saturating_add(descriptor.size);
        self.total_objects += 1;
    }
}

/// 🧮 Drains `rx` until every sender is gone and returns the totals.
pub(crate) async fn tally(rx: Receiver<ObjectDescriptor>) -> DryRunSummary {
    let mut summary = DryRunSummary::default();
    while let Ok(descriptor) = rx.recv().await {
        trace!("🧾 {} ({} bytes)", descriptor.uri(), descriptor.size);
        summary.absorb(&descriptor);
    }
    summary
}
