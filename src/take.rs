//! Take - immediate matching without an open orders record.
//!
//! The taker pays from and is paid into its external accounts within the
//! instruction. Nothing rests; unmatched size is simply not traded.

use tracing::debug;

use crate::command::{Side, TakeOrder, TraderId};
use crate::custody::{Asset, Custody, Transfer};
use crate::error::{CheckedState, ExchangeError, Result};
use crate::event_queue::QueuedEvent;
use crate::market::Market;
use crate::matching::MatchRequest;

/// Result of a successful `take`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TakeOutcome {
    pub base_lots_filled: u64,
    /// Native base moved from the taker (asks) or to the taker (bids)
    pub base_native: u64,
    /// Native quote the taker paid, fees included (bids)
    pub quote_paid: u64,
    /// Native quote the taker received, net of fees (asks)
    pub quote_received: u64,
    pub taker_fees: u64,
    /// Maker fills and any releases of expired or self-traded orders
    pub events: Vec<QueuedEvent>,
}

impl Market {
    /// Match immediately against the book, bounded by both size caps and the
    /// slippage floors. Fails with `SlippageNotMet` and no effect if the
    /// floors cannot be reached.
    pub fn take<C: Custody>(
        &mut self,
        custody: &mut C,
        taker: TraderId,
        order: TakeOrder,
        now: i64,
    ) -> Result<TakeOutcome> {
        if !self.flags.accepting_orders {
            return Err(ExchangeError::InvalidOrderParameters("market is not accepting orders"));
        }
        if order.limit_price == 0 {
            return Err(ExchangeError::InvalidOrderParameters("price must be positive"));
        }
        if order.max_base_qty == 0 || order.max_quote_qty == 0 {
            return Err(ExchangeError::InvalidOrderParameters("size caps must be positive"));
        }
        let side = order.side;

        let plan = self.plan_match(&MatchRequest {
            side,
            limit_price: order.limit_price,
            any_price: false,
            max_base_lots: order.max_base_qty,
            quote_cap: order.max_quote_qty,
            limit: order.limit,
            owner: Some(taker),
            self_trade: Default::default(),
            now,
        })?;

        let base_native = self
            .base_native(plan.base_lots_filled)
            .ok_or(ExchangeError::InvariantViolation("filled base overflow"))?;
        let (quote_paid, quote_received) = match side {
            Side::Bid => (
                plan.quote_notional
                    .add_or_violate(plan.taker_fees, "bid spend overflow")?,
                0,
            ),
            Side::Ask => (
                0,
                plan.quote_notional
                    .sub_or_violate(plan.taker_fees, "fees exceed proceeds")?,
            ),
        };
        let quote_measured = match side {
            Side::Bid => quote_paid,
            Side::Ask => quote_received,
        };
        if plan.base_lots_filled < order.min_base_qty || quote_measured < order.min_quote_qty {
            return Err(ExchangeError::SlippageNotMet {
                base_lots: plan.base_lots_filled,
                quote_native: quote_measured,
                min_base_lots: order.min_base_qty,
                min_quote_native: order.min_quote_qty,
            });
        }

        // Taker pays in, then the vault pays out
        let (pay_asset, pay, recv_asset, recv) = match side {
            Side::Bid => (Asset::Quote, quote_paid, Asset::Base, base_native),
            Side::Ask => (Asset::Base, base_native, Asset::Quote, quote_received),
        };
        custody.transfer_all(
            &self.signer,
            &[
                Transfer::Deposit { from: taker, asset: pay_asset, amount: pay },
                Transfer::Withdraw { to: taker, asset: recv_asset, amount: recv },
            ],
        )?;

        self.vault.deposit(pay_asset, pay)?;
        self.vault.withdraw(recv_asset, recv)?;
        let events = self.apply_match(&plan, side, None)?;

        debug!(
            taker,
            side = ?side,
            filled = plan.base_lots_filled,
            quote_paid,
            quote_received,
            "take executed"
        );

        Ok(TakeOutcome {
            base_lots_filled: plan.base_lots_filled,
            base_native,
            quote_paid,
            quote_received,
            taker_fees: plan.taker_fees,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::NewOrder;
    use crate::event_queue::Event;
    use crate::fees::FeeSchedule;
    use crate::test_util::{market, Trader, WALLET};

    fn take_order(side: Side, price: u64, qty: u64) -> TakeOrder {
        TakeOrder {
            side,
            limit_price: price,
            max_base_qty: qty,
            max_quote_qty: u64::MAX,
            min_base_qty: 0,
            min_quote_qty: 0,
            limit: u16::MAX,
        }
    }

    #[test]
    fn test_take_bid_settles_directly() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        let maker = Trader::open(&mut m, &mut custody, 1);
        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Ask, 20, 3), 0)
            .unwrap();

        custody.fund(9, Asset::Quote, 100);
        let out = m
            .take(&mut custody, 9, take_order(Side::Bid, 25, 2), 0)
            .unwrap();
        assert_eq!(out.base_lots_filled, 2);
        assert_eq!(out.quote_paid, 40);
        assert_eq!(custody.balance(9, Asset::Quote), 60);
        assert_eq!(custody.balance(9, Asset::Base), 2);

        // Only the maker's fill is queued
        assert_eq!(out.events.len(), 1);
        assert!(matches!(out.events[0].event, Event::Fill(f) if f.maker));
        assert_eq!(m.book().depth_at(Side::Ask, 20), (1, 1));
        assert_eq!(m.vault().base_deposits_total, 1);
        assert_eq!(m.vault().quote_deposits_total, 40);
    }

    #[test]
    fn test_take_slippage_not_met_on_empty_book() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        custody.fund(9, Asset::Quote, 100);
        let before = m.state_hash();

        let mut order = take_order(Side::Bid, 10, 4);
        order.min_base_qty = 1;
        let err = m.take(&mut custody, 9, order, 0).unwrap_err();
        assert!(matches!(err, ExchangeError::SlippageNotMet { base_lots: 0, .. }));
        assert_eq!(m.state_hash(), before);
        assert_eq!(custody.balance(9, Asset::Quote), 100);
    }

    #[test]
    fn test_take_ask_respects_quote_cap() {
        let (mut m, mut custody) = market(FeeSchedule::default());
        let maker = Trader::open(&mut m, &mut custody, 1);
        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Bid, 1_000, 5), 0)
            .unwrap();

        custody.fund(9, Asset::Base, 10);
        let mut order = take_order(Side::Ask, 1_000, 5);
        order.max_quote_qty = 2_500;
        let out = m.take(&mut custody, 9, order, 0).unwrap();
        assert_eq!(out.base_lots_filled, 2);
        // 2000 gross, 22 bps taker fee floors to 4
        assert_eq!(out.taker_fees, 4);
        assert_eq!(out.quote_received, 1_996);
        assert_eq!(custody.balance(9, Asset::Quote), 1_996);
        assert_eq!(custody.balance(9, Asset::Base), 8);
        assert_eq!(custody.balance(maker.id, Asset::Base), WALLET);
    }

    #[test]
    fn test_take_insufficient_wallet() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        let maker = Trader::open(&mut m, &mut custody, 1);
        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Ask, 20, 3), 0)
            .unwrap();
        let before = m.state_hash();

        let err = m
            .take(&mut custody, 9, take_order(Side::Bid, 20, 1), 0)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Custody(_)));
        assert_eq!(m.state_hash(), before);
    }

    #[test]
    fn test_take_unbounded_quote_cap() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        let maker = Trader::open(&mut m, &mut custody, 1);
        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Ask, 1, 5), 0)
            .unwrap();

        custody.fund(9, Asset::Quote, 10);
        let out = m
            .take(&mut custody, 9, take_order(Side::Bid, 1, 2), 0)
            .unwrap();
        assert_eq!(out.base_lots_filled, 2);
        assert_eq!(out.quote_paid, 2);
        assert_eq!(custody.balance(9, Asset::Base), 2);
    }

    #[test]
    fn test_take_quote_floor_not_met() {
        let (mut m, mut custody) = market(FeeSchedule::default());
        let maker = Trader::open(&mut m, &mut custody, 1);
        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Ask, 1_000, 2), 0)
            .unwrap();
        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Bid, 900, 2), 0)
            .unwrap();
        custody.fund(9, Asset::Quote, 10_000);
        custody.fund(9, Asset::Base, 10);
        let before = m.state_hash();
        let vault = *m.vault();

        // Two lots cost 2_000 plus a 4 fee
        let mut bid = take_order(Side::Bid, 1_000, 5);
        bid.min_quote_qty = 2_005;
        let err = m.take(&mut custody, 9, bid, 0).unwrap_err();
        assert_eq!(
            err,
            ExchangeError::SlippageNotMet {
                base_lots: 2,
                quote_native: 2_004,
                min_base_lots: 0,
                min_quote_native: 2_005,
            }
        );

        // Selling two lots nets 1_800 less a 3 fee
        let mut ask = take_order(Side::Ask, 900, 5);
        ask.min_quote_qty = 1_798;
        let err = m.take(&mut custody, 9, ask, 0).unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::SlippageNotMet { base_lots: 2, quote_native: 1_797, .. }
        ));

        assert_eq!(m.state_hash(), before);
        assert_eq!(*m.vault(), vault);
        assert_eq!(m.book().depth_at(Side::Ask, 1_000), (2, 1));
        assert_eq!(m.book().depth_at(Side::Bid, 900), (2, 1));
        assert_eq!(custody.balance(9, Asset::Quote), 10_000);
        assert_eq!(custody.balance(9, Asset::Base), 10);
        assert!(m.event_queue().is_empty());

        ask.min_quote_qty = 1_797;
        let out = m.take(&mut custody, 9, ask, 0).unwrap();
        assert_eq!(out.quote_received, 1_797);
    }

    #[test]
    fn test_take_partial_base_floor_leaves_book() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        let maker = Trader::open(&mut m, &mut custody, 1);
        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Ask, 20, 3), 0)
            .unwrap();
        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Ask, 30, 3), 0)
            .unwrap();
        custody.fund(9, Asset::Quote, 1_000);
        let before = m.state_hash();

        // Only the level at 20 is inside the limit
        let mut order = take_order(Side::Bid, 25, 5);
        order.min_base_qty = 4;
        let err = m.take(&mut custody, 9, order, 0).unwrap_err();
        assert!(matches!(err, ExchangeError::SlippageNotMet { base_lots: 3, .. }));
        assert_eq!(m.state_hash(), before);
        assert_eq!(m.book().depth_at(Side::Ask, 20), (3, 1));
        assert_eq!(custody.balance(9, Asset::Quote), 1_000);
        assert_eq!(custody.vault_balance(Asset::Base), 6);
    }

    #[test]
    fn test_take_stops_at_match_limit() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        let maker = Trader::open(&mut m, &mut custody, 1);
        for _ in 0..3 {
            m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Ask, 10, 1), 0)
                .unwrap();
        }
        custody.fund(9, Asset::Quote, 100);

        let mut order = take_order(Side::Bid, 10, 3);
        order.limit = 2;
        let out = m.take(&mut custody, 9, order, 0).unwrap();
        assert_eq!(out.base_lots_filled, 2);
        assert_eq!(out.events.len(), 2);
        assert_eq!(m.book().depth_at(Side::Ask, 10), (1, 1));
        assert_eq!(custody.balance(9, Asset::Quote), 80);
    }

    #[test]
    fn test_take_conserves_with_fees() {
        let (mut m, mut custody) = market(FeeSchedule::default());
        let maker = Trader::open(&mut m, &mut custody, 1);
        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Ask, 1_003, 7), 0)
            .unwrap();
        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Bid, 997, 7), 0)
            .unwrap();
        custody.fund(9, Asset::Quote, 100_000);
        custody.fund(9, Asset::Base, 100);

        m.take(&mut custody, 9, take_order(Side::Bid, 1_003, 3), 0)
            .unwrap();
        m.check_conservation().unwrap();
        m.take(&mut custody, 9, take_order(Side::Ask, 997, 4), 0)
            .unwrap();
        m.check_conservation().unwrap();

        m.consume_events(&[maker.handle], 16).unwrap();
        m.check_conservation().unwrap();
        assert_eq!(custody.vault_balance(Asset::Base), m.vault().base_deposits_total);
        assert_eq!(custody.vault_balance(Asset::Quote), m.vault().quote_deposits_total);
    }

    #[test]
    fn test_take_withdraw_failure_keeps_wallet() {
        let (mut m, mut custody) = market(FeeSchedule::ZERO);
        let maker = Trader::open(&mut m, &mut custody, 1);
        m.place_order(&mut custody, maker.id, NewOrder::limit(Side::Ask, 20, 3), 0)
            .unwrap();
        let signer = *m.vault_signer();
        custody.withdraw(&signer, 99, Asset::Base, 3).unwrap();
        custody.fund(9, Asset::Quote, 100);
        let before = m.state_hash();

        let err = m
            .take(&mut custody, 9, take_order(Side::Bid, 20, 2), 0)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Custody(_)));
        assert_eq!(custody.balance(9, Asset::Quote), 100);
        assert_eq!(custody.vault_balance(Asset::Quote), 0);
        assert_eq!(m.state_hash(), before);
    }
}
