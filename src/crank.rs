//! Crank - applying queued events to open orders records.
//!
//! Fills credit makers, releases unlock cancelled and expired orders. The
//! crank is permissionless: anyone may run it for any set of records, but it
//! only ever advances over a contiguous prefix of events owned by that set.

use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::command::OpenOrdersHandle;
use crate::custody::Asset;
use crate::error::Result;
use crate::event_queue::{Event, EventGap};
use crate::market::{maker_credit, Market};
use crate::open_orders::OpenOrders;

/// Result of one `consume_events` call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumeReport {
    pub consumed: u32,
    /// Set when events were overwritten before anyone consumed them
    pub gap: Option<EventGap>,
}

impl Market {
    /// Consume up to `limit` events from the head of the queue.
    ///
    /// Stops early at the first event whose owner is not in `owners`; that
    /// event and everything after it stays queued.
    pub fn consume_events(
        &mut self,
        owners: &[OpenOrdersHandle],
        limit: u16,
    ) -> Result<ConsumeReport> {
        // Skipped only once the batch commits, so a failed call reports it again
        let gap = self.events.gap();

        // Work on copies so a failure part-way leaves every record untouched
        let mut scratch: FxHashMap<OpenOrdersHandle, OpenOrders> = FxHashMap::default();
        let mut count: u32 = 0;

        for queued in self.events.iter().take(limit as usize) {
            let handle = queued.event.owner_slot();
            if !owners.contains(&handle) {
                break;
            }
            let record = match scratch.entry(handle) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(*self.ledger.record_mut(handle)?),
            };

            match queued.event {
                Event::Fill(fill) if fill.maker => {
                    let (base, quote) = maker_credit(&fill);
                    record.credit_free(Asset::Base, base)?;
                    record.credit_free(Asset::Quote, quote)?;
                }
                // Taker funds moved when the order was placed
                Event::Fill(_) => {}
                Event::Out(out) if out.release_funds => {
                    record.unlock(Market::locked_asset(out.side), out.native_qty_released)?;
                }
                Event::Out(_) => {}
            }
            count += 1;
        }

        for (handle, record) in scratch {
            *self.ledger.record_mut(handle)? = record;
        }
        if let Some(gap) = self.events.take_gap() {
            warn!(
                lost = gap.lost,
                first_retained = gap.first_retained,
                "event consumer fell behind the queue"
            );
        }
        for _ in 0..count {
            self.events.pop_front();
        }

        debug!(consumed = count, remaining = self.events.len(), "events consumed");
        Ok(ConsumeReport {
            consumed: count,
            gap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{NewOrder, Side};
    use crate::fees::FeeSchedule;
    use crate::test_util::{market, Trader};

    #[test]
    fn test_consume_credits_maker() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        let maker = Trader::open(&mut m, &mut custody, 1);
        let taker = Trader::open(&mut m, &mut custody, 2);

        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Bid, 55, 2), 0)
            .unwrap();
        m.place_order(&mut custody, taker.id, NewOrder::limit(Side::Ask, 55, 2), 0)
            .unwrap();
        assert_eq!(m.ledger().by_owner(maker.id).unwrap().base_free, 0);

        let report = m.consume_events(&[maker.handle, taker.handle], 10).unwrap();
        assert_eq!(report.consumed, 2);
        assert_eq!(report.gap, None);
        assert!(m.event_queue().is_empty());

        let record = m.ledger().by_owner(maker.id).unwrap();
        assert_eq!(record.base_free, 2);
        assert_eq!(record.quote_locked, 0);
        // Taker fill changed nothing further
        assert_eq!(m.ledger().by_owner(taker.id).unwrap().quote_free, 110);
    }

    #[test]
    fn test_consume_stops_at_foreign_owner() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        let maker = Trader::open(&mut m, &mut custody, 1);
        let taker = Trader::open(&mut m, &mut custody, 2);

        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Bid, 10, 1), 0)
            .unwrap();
        m.place_order(&mut custody, taker.id, NewOrder::limit(Side::Ask, 10, 1), 0)
            .unwrap();

        // Maker fill first, taker fill second: only the first is ours
        let report = m.consume_events(&[maker.handle], 10).unwrap();
        assert_eq!(report.consumed, 1);
        assert_eq!(m.event_queue().len(), 1);

        // Head now belongs to the taker; a maker-only crank makes no progress
        let report = m.consume_events(&[maker.handle], 10).unwrap();
        assert_eq!(report.consumed, 0);
        assert_eq!(m.event_queue().len(), 1);
    }

    #[test]
    fn test_consume_respects_limit() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        let alice = Trader::open(&mut m, &mut custody, 1);
        for _ in 0..3 {
            let placed = m
                .place_order(&mut custody, alice.id, NewOrder::limit(Side::Ask, 10, 1), 0)
                .unwrap();
            m.cancel_order(alice.id, placed.order_id).unwrap();
        }
        assert_eq!(m.consume_events(&[alice.handle], 2).unwrap().consumed, 2);
        assert_eq!(m.ledger().by_owner(alice.id).unwrap().base_free, 2);
        assert_eq!(m.consume_events(&[alice.handle], 2).unwrap().consumed, 1);
        let record = m.ledger().by_owner(alice.id).unwrap();
        assert_eq!((record.base_free, record.base_locked), (3, 0));
    }

    #[test]
    fn test_consume_reports_gap_after_overwrite() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        m.events = crate::event_queue::EventQueue::new(2);
        let alice = Trader::open(&mut m, &mut custody, 1);

        for _ in 0..3 {
            let placed = m
                .place_order(&mut custody, alice.id, NewOrder::limit(Side::Ask, 10, 1), 0)
                .unwrap();
            m.cancel_order(alice.id, placed.order_id).unwrap();
        }
        // First release was overwritten and orphaned
        assert_eq!(m.vault().orphaned_base, 1);

        let report = m.consume_events(&[alice.handle], 10).unwrap();
        assert_eq!(report.consumed, 2);
        let gap = report.gap.unwrap();
        assert_eq!((gap.requested, gap.first_retained, gap.lost), (0, 1, 1));

        let record = m.ledger().by_owner(alice.id).unwrap();
        assert_eq!((record.base_free, record.base_locked), (2, 0));
        m.check_conservation().unwrap();
    }

    #[test]
    fn test_gap_survives_failed_consume() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        m.events = crate::event_queue::EventQueue::new(2);
        let alice = Trader::open(&mut m, &mut custody, 1);
        for _ in 0..3 {
            let placed = m
                .place_order(&mut custody, alice.id, NewOrder::limit(Side::Ask, 10, 1), 0)
                .unwrap();
            m.cancel_order(alice.id, placed.order_id).unwrap();
        }
        let cursor = m.event_queue().cursor();

        // A release that cannot be credited aborts the whole batch
        m.ledger.record_mut(alice.handle).unwrap().base_free = u64::MAX;
        assert!(m.consume_events(&[alice.handle], 10).is_err());
        assert_eq!(m.event_queue().cursor(), cursor);
        assert_eq!(m.event_queue().len(), 2);

        m.ledger.record_mut(alice.handle).unwrap().base_free = 0;
        let report = m.consume_events(&[alice.handle], 10).unwrap();
        assert_eq!(report.consumed, 2);
        assert_eq!(report.gap.map(|g| g.lost), Some(1));

        let report = m.consume_events(&[alice.handle], 10).unwrap();
        assert_eq!(report, ConsumeReport::default());
    }

    #[test]
    fn test_gap_skipped_without_progress() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        m.events = crate::event_queue::EventQueue::new(2);
        let alice = Trader::open(&mut m, &mut custody, 1);
        for _ in 0..3 {
            let placed = m
                .place_order(&mut custody, alice.id, NewOrder::limit(Side::Ask, 10, 1), 0)
                .unwrap();
            m.cancel_order(alice.id, placed.order_id).unwrap();
        }

        // Nobody's events consumed, but the gap is still reported and skipped
        let report = m.consume_events(&[], 10).unwrap();
        assert_eq!(report.consumed, 0);
        assert_eq!(report.gap.map(|g| g.first_retained), Some(1));
        assert_eq!(m.event_queue().cursor(), 1);
        assert_eq!(m.consume_events(&[], 10).unwrap().gap, None);
    }
}
