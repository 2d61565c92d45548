use std::collections::VecDeque;

use crate::config::constants;
use crate::model::{Side, TradeLeg};

/// A deferred entry placement, queued when the per-loop cap is hit
/// (spec.md §4.3.2).
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub slot_id: u64,
    pub local_id: u64,
    pub side: Side,
    pub price: f64,
    pub volume: f64,
    pub trade_id: TradeLeg,
}

/// Entry-velocity scheduler: bounds `PlaceOrder(role=entry)` executions per
/// loop, deferring overflow to `pending`, cap tightening as open-order
/// headroom shrinks (spec.md §4.3.2).
#[derive(Debug, Default)]
pub struct EntryScheduler {
    pub pending: VecDeque<PendingEntry>,
}

impl EntryScheduler {
    /// `headroom` is `ENTRY_SCHEDULER_HEADROOM_MAX_OPEN_ORDERS` minus the
    /// count of currently open orders across all slots; the cap tightens as
    /// it shrinks toward zero.
    pub fn adaptive_cap(headroom: usize) -> usize {
        match headroom {
            0 => 0,
            1 => 1,
            2 => 2,
            3 => 3,
            _ => constants::ENTRY_SCHEDULER_DEFAULT_CAP,
        }
    }

    pub fn enqueue(&mut self, entry: PendingEntry) {
        self.pending.push_back(entry);
    }

    /// Drain up to `cap` queued entries, returning them for placement.
    pub fn drain(&mut self, cap: usize) -> Vec<PendingEntry> {
        let n = cap.min(self.pending.len());
        self.pending.drain(..n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(local_id: u64) -> PendingEntry {
        PendingEntry { slot_id: 1, local_id, side: Side::Buy, price: 0.1, volume: 1.0, trade_id: TradeLeg::A }
    }

    #[test]
    fn adaptive_cap_tightens_with_shrinking_headroom() {
        assert_eq!(EntryScheduler::adaptive_cap(0), 0);
        assert_eq!(EntryScheduler::adaptive_cap(1), 1);
        assert_eq!(EntryScheduler::adaptive_cap(2), 2);
        assert_eq!(EntryScheduler::adaptive_cap(3), 3);
        assert_eq!(EntryScheduler::adaptive_cap(100), constants::ENTRY_SCHEDULER_DEFAULT_CAP);
    }

    #[test]
    fn drain_respects_cap_and_leaves_remainder_queued() {
        let mut scheduler = EntryScheduler::default();
        for i in 0..5 {
            scheduler.enqueue(entry(i));
        }
        let drained = scheduler.drain(2);
        assert_eq!(drained.len(), 2);
        assert_eq!(scheduler.pending.len(), 3);
    }

    #[test]
    fn drain_more_than_available_takes_all() {
        let mut scheduler = EntryScheduler::default();
        scheduler.enqueue(entry(1));
        let drained = scheduler.drain(10);
        assert_eq!(drained.len(), 1);
        assert!(scheduler.pending.is_empty());
    }
}
