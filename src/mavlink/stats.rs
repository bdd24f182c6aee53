//! Per-sender and aggregate decoder statistics.

use std::collections::HashMap;

/// Sentinel system id the aggregate bucket is keyed under.
pub const ANY_SENDER: u8 = 0;

#[derive(Debug, Default, Clone, Copy)]
pub struct SenderStats {
    pub handled: u64,
    pub no_handler: u64,
    pub bad_checksum: u64,
    pub bad_length: u64,
    pub unknown_id: u64,
    pub bytes_received: u64,
    pub stx_syncs: u64,
}

#[derive(Debug, Default, Clone)]
pub struct Stats {
    per_sender: HashMap<u8, SenderStats>,
    aggregate: SenderStats,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub fn for_sender(&self, sender_id: u8) -> SenderStats {
        self.per_sender.get(&sender_id).copied().unwrap_or_default()
    }

    pub fn aggregate(&self) -> SenderStats {
        self.aggregate
    }

    pub(super) fn record(&mut self, sender_id: Option<u8>, f: impl Fn(&mut SenderStats)) {
        f(&mut self.aggregate);
        if let Some(id) = sender_id {
            f(self.per_sender.entry(id).or_default());
        }
    }
}
