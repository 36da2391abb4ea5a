//! Matching Engine - crossing incoming orders against the book.
//!
//! Implements the cross/rest algorithm in two passes:
//! 1. PLANNING: walk the opposite side read-only and decide every trade,
//!    expiry and self-trade action, stopping at the limit price, the size,
//!    the quote budget or the iteration cap
//! 2. APPLYING: once validation, capacity probes and custody transfers have
//!    all succeeded, execute the plan and rest or drop the remainder
//!
//! Trades execute at the resting order's price. Maker proceeds wait in the
//! event queue for the crank; taker proceeds are credited immediately.

use tracing::debug;

use crate::arena::{ArenaIndex, OrderNode};
use crate::command::{
    NewOrder, OpenOrdersHandle, OrderType, SelfTradeBehavior, Side, TraderId,
};
use crate::custody::{Asset, Custody};
use crate::error::{Capacity, CheckedState, ExchangeError, Result};
use crate::event_queue::{Event, FillEvent, OutEvent, QueuedEvent};
use crate::market::Market;
use crate::open_orders::OrderSlot;

/// What the planner is allowed to consume
#[derive(Clone, Copy, Debug)]
pub(crate) struct MatchRequest {
    /// Side of the incoming order
    pub side: Side,
    pub limit_price: u64,
    /// Cross regardless of price
    pub any_price: bool,
    pub max_base_lots: u64,
    /// Bids: native quote spend including taker fees. Asks: gross notional.
    pub quote_cap: u64,
    /// Resting orders that may be touched
    pub limit: u16,
    /// Incoming order's owner, for self-trade detection
    pub owner: Option<TraderId>,
    pub self_trade: SelfTradeBehavior,
    pub now: i64,
}

/// One action against one resting order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MatchStep {
    Fill {
        handle: ArenaIndex,
        maker: OrderNode,
        base_lots: u64,
        notional: u64,
        taker_fee: u64,
        maker_rebate: u64,
    },
    /// Resting order past its `max_ts`
    Expire { handle: ArenaIndex, maker: OrderNode },
    /// Own resting order removed in favor of the incoming one
    CancelProvide { handle: ArenaIndex, maker: OrderNode },
    /// Own resting order and incoming order both shrink without trading
    DecrementTake {
        handle: ArenaIndex,
        maker: OrderNode,
        base_lots: u64,
    },
}

/// Outcome of the planning pass; nothing has been mutated yet
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct MatchPlan {
    pub steps: Vec<MatchStep>,
    pub base_lots_filled: u64,
    /// Gross native quote traded
    pub quote_notional: u64,
    pub taker_fees: u64,
    pub maker_rebates: u64,
    /// Incoming lots cancelled against the owner's own orders
    pub base_lots_decremented: u64,
    /// Incoming lots neither traded nor decremented
    pub remaining: u64,
    /// Iteration cap stopped matching while crossing liquidity remained
    pub cap_hit: bool,
}

impl MatchPlan {
    fn unmatched(max_base_lots: u64) -> Self {
        Self {
            remaining: max_base_lots,
            ..Self::default()
        }
    }
}

/// Identity of the incoming order when it has an open orders record
#[derive(Clone, Copy, Debug)]
pub(crate) struct TakerRef {
    pub handle: OpenOrdersHandle,
    pub owner: TraderId,
    pub order_id: u64,
    pub client_order_id: u64,
}

/// Result of a successful `place_order`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceOutcome {
    pub order_id: u64,
    pub base_lots_filled: u64,
    /// Gross native quote traded
    pub quote_notional: u64,
    /// Lots now resting in the book
    pub base_lots_rested: u64,
    /// Lots discarded (IOC, market, dust, or iteration cap)
    pub base_lots_dropped: u64,
    /// Lots cancelled against the owner's own resting orders
    pub base_lots_decremented: u64,
    pub cap_hit: bool,
    /// Events this instruction queued, in order
    pub events: Vec<QueuedEvent>,
}

impl PlaceOutcome {
    /// Fill events of the incoming order
    pub fn taker_fills(&self) -> impl Iterator<Item = &FillEvent> + '_ {
        self.events.iter().filter_map(|e| match &e.event {
            Event::Fill(f) if !f.maker => Some(f),
            _ => None,
        })
    }

    /// Fill events of the resting orders it traded with
    pub fn maker_fills(&self) -> impl Iterator<Item = &FillEvent> + '_ {
        self.events.iter().filter_map(|e| match &e.event {
            Event::Fill(f) if f.maker => Some(f),
            _ => None,
        })
    }
}

/// Result of a successful cancel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CancelOutcome {
    pub order_id: u64,
    pub side: Side,
    pub released_base_lots: u64,
    /// Native amount the crank will move from locked to free
    pub native_released: u64,
    pub event: QueuedEvent,
}

impl Market {
    // ========================================================================
    // Planning
    // ========================================================================

    /// Walk the opposite side in priority order and decide what happens to
    /// each resting order the request reaches.
    pub(crate) fn plan_match(&self, req: &MatchRequest) -> Result<MatchPlan> {
        let fees = self.config.fees;
        let mut plan = MatchPlan::unmatched(req.max_base_lots);
        let mut quote_left = req.quote_cap;
        let mut touched: u16 = 0;

        for (handle, maker) in self.book.side(req.side.opposite()).iter() {
            if plan.remaining == 0 {
                break;
            }
            if !req.any_price && !req.side.crosses(req.limit_price, maker.price) {
                break;
            }
            if touched == req.limit {
                plan.cap_hit = true;
                break;
            }
            touched += 1;

            if maker.is_expired(req.now) {
                plan.steps.push(MatchStep::Expire { handle, maker: *maker });
                continue;
            }

            if req.owner == Some(maker.owner) {
                match req.self_trade {
                    SelfTradeBehavior::AbortTransaction => return Err(ExchangeError::SelfTrade),
                    SelfTradeBehavior::CancelProvide => {
                        plan.steps.push(MatchStep::CancelProvide { handle, maker: *maker });
                    }
                    SelfTradeBehavior::DecrementTake => {
                        let lots = plan.remaining.min(maker.qty);
                        plan.steps.push(MatchStep::DecrementTake {
                            handle,
                            maker: *maker,
                            base_lots: lots,
                        });
                        plan.remaining -= lots;
                        plan.base_lots_decremented += lots;
                    }
                }
                continue;
            }

            let lot_notional = self
                .quote_native(maker.price, 1)
                .ok_or(ExchangeError::InvariantViolation("resting price overflows quote"))?;
            let affordable = match req.side {
                Side::Bid => fees.max_lots_within(quote_left, lot_notional),
                Side::Ask => quote_left / lot_notional,
            };
            let lots = plan.remaining.min(maker.qty).min(affordable);
            if lots == 0 {
                // Budget exhausted
                break;
            }

            let notional = lot_notional
                .checked_mul(lots)
                .ok_or(ExchangeError::InvariantViolation("trade notional overflow"))?;
            let taker_fee = fees.taker_fee(notional);
            let maker_rebate = fees.maker_rebate(notional);
            let spent = match req.side {
                Side::Bid => notional + taker_fee,
                Side::Ask => notional,
            };
            quote_left = quote_left.sub_or_violate(spent, "quote budget overrun")?;

            plan.steps.push(MatchStep::Fill {
                handle,
                maker: *maker,
                base_lots: lots,
                notional,
                taker_fee,
                maker_rebate,
            });
            plan.remaining -= lots;
            plan.base_lots_filled += lots;
            plan.quote_notional = plan
                .quote_notional
                .add_or_violate(notional, "quote notional overflow")?;
            plan.taker_fees += taker_fee;
            plan.maker_rebates += maker_rebate;
        }

        Ok(plan)
    }

    // ========================================================================
    // Applying
    // ========================================================================

    /// Execute a plan against the book and the makers' records, queueing the
    /// resulting events. Taker fills are queued only when `taker` is given.
    pub(crate) fn apply_match(
        &mut self,
        plan: &MatchPlan,
        taker_side: Side,
        taker: Option<TakerRef>,
    ) -> Result<Vec<QueuedEvent>> {
        let maker_side = taker_side.opposite();
        let mut queued = Vec::with_capacity(plan.steps.len() * 2);

        for step in &plan.steps {
            match *step {
                MatchStep::Fill {
                    handle,
                    maker,
                    base_lots,
                    notional,
                    taker_fee,
                    maker_rebate,
                } => {
                    let base = self
                        .base_native(base_lots)
                        .ok_or(ExchangeError::InvariantViolation("base native overflow"))?;
                    let left = self.book.side_mut(maker_side).reduce(handle, base_lots)?;

                    let record = self.ledger.record_mut(maker.owner_slot)?;
                    match maker_side {
                        Side::Bid => record.debit_locked(Asset::Quote, notional)?,
                        Side::Ask => record.debit_locked(Asset::Base, base)?,
                    }
                    if left == 0 {
                        record.release_slot(maker.record_slot);
                    }

                    let maker_fill = FillEvent {
                        side: maker_side,
                        maker: true,
                        owner_slot: maker.owner_slot,
                        owner: maker.owner,
                        order_id: maker.seq,
                        client_order_id: maker.client_order_id,
                        price: maker.price,
                        base_lots,
                        native_qty_paid: match maker_side {
                            Side::Bid => notional,
                            Side::Ask => base,
                        },
                        native_qty_received: match maker_side {
                            Side::Bid => base,
                            Side::Ask => notional + maker_rebate,
                        },
                        native_fee_or_rebate: maker_rebate,
                    };
                    let seq = self.push_event(Event::Fill(maker_fill))?;
                    queued.push(QueuedEvent { seq, event: Event::Fill(maker_fill) });

                    if let Some(t) = taker {
                        let taker_fill = FillEvent {
                            side: taker_side,
                            maker: false,
                            owner_slot: t.handle,
                            owner: t.owner,
                            order_id: t.order_id,
                            client_order_id: t.client_order_id,
                            price: maker.price,
                            base_lots,
                            native_qty_paid: match taker_side {
                                Side::Bid => notional + taker_fee,
                                Side::Ask => base,
                            },
                            native_qty_received: match taker_side {
                                Side::Bid => base,
                                Side::Ask => notional - taker_fee,
                            },
                            native_fee_or_rebate: taker_fee,
                        };
                        let seq = self.push_event(Event::Fill(taker_fill))?;
                        queued.push(QueuedEvent { seq, event: Event::Fill(taker_fill) });
                    }
                }
                MatchStep::Expire { handle, .. } | MatchStep::CancelProvide { handle, .. } => {
                    queued.push(self.remove_resting(maker_side, handle)?);
                }
                MatchStep::DecrementTake {
                    handle,
                    maker,
                    base_lots,
                } => {
                    let released = self
                        .locked_native(maker_side, maker.price, base_lots)
                        .ok_or(ExchangeError::InvariantViolation("locked native overflow"))?;
                    let left = self.book.side_mut(maker_side).reduce(handle, base_lots)?;
                    if left == 0 {
                        self.ledger
                            .record_mut(maker.owner_slot)?
                            .release_slot(maker.record_slot);
                    }
                    let out = Event::Out(OutEvent {
                        side: maker_side,
                        owner_slot: maker.owner_slot,
                        owner: maker.owner,
                        order_id: maker.seq,
                        client_order_id: maker.client_order_id,
                        released_base_lots: base_lots,
                        native_qty_released: released,
                        release_funds: true,
                    });
                    let seq = self.push_event(out)?;
                    queued.push(QueuedEvent { seq, event: out });
                }
            }
        }

        let net_fees = plan
            .taker_fees
            .sub_or_violate(plan.maker_rebates, "rebates exceed fees")?;
        self.vault.quote_fees_accrued = self
            .vault
            .quote_fees_accrued
            .add_or_violate(net_fees, "fee accrual overflow")?;

        Ok(queued)
    }

    /// Pull a resting order out of the book and queue its release.
    pub(crate) fn remove_resting(&mut self, side: Side, handle: ArenaIndex) -> Result<QueuedEvent> {
        let node = self.book.side_mut(side).remove(handle)?;
        let released = self
            .locked_native(side, node.price, node.qty)
            .ok_or(ExchangeError::InvariantViolation("locked native overflow"))?;
        self.ledger
            .record_mut(node.owner_slot)?
            .release_slot(node.record_slot);

        let out = Event::Out(OutEvent {
            side,
            owner_slot: node.owner_slot,
            owner: node.owner,
            order_id: node.seq,
            client_order_id: node.client_order_id,
            released_base_lots: node.qty,
            native_qty_released: released,
            release_funds: true,
        });
        let seq = self.push_event(out)?;
        Ok(QueuedEvent { seq, event: out })
    }

    // ========================================================================
    // Instructions
    // ========================================================================

    /// Place a new order for `owner`, crossing what it can and resting or
    /// dropping the remainder according to its type.
    ///
    /// Bids fund `limit_price × qty × quote_lot_size` plus the taker fee, asks
    /// fund `qty × base_lot_size`. The owner's free balance is used first;
    /// only the shortfall is deposited through `custody`.
    pub fn place_order<C: Custody>(
        &mut self,
        custody: &mut C,
        owner: TraderId,
        order: NewOrder,
        now: i64,
    ) -> Result<PlaceOutcome> {
        // === Validation ===
        if !self.flags.accepting_orders {
            return Err(ExchangeError::InvalidOrderParameters("market is not accepting orders"));
        }
        if order.limit_price == 0 {
            return Err(ExchangeError::InvalidOrderParameters("price must be positive"));
        }
        if order.max_base_qty == 0 {
            return Err(ExchangeError::InvalidOrderParameters("quantity must be positive"));
        }
        if order.max_ts.is_some_and(|ts| now > ts) {
            return Err(ExchangeError::InvalidOrderParameters("order already expired"));
        }
        let handle = self.ledger.handle_of(owner)?;
        let side = order.side;
        let fees = self.config.fees;

        let (asset, required) = match side {
            Side::Bid => (
                Asset::Quote,
                self.quote_native(order.limit_price, order.max_base_qty)
                    .and_then(|n| fees.with_taker_fee(n)),
            ),
            Side::Ask => (Asset::Base, self.base_native(order.max_base_qty)),
        };
        let required =
            required.ok_or(ExchangeError::InvalidOrderParameters("order size overflows"))?;
        // Any remainder must be priceable in quote to pass the dust check
        if self
            .quote_native(order.limit_price, order.max_base_qty)
            .is_none()
        {
            return Err(ExchangeError::InvalidOrderParameters("order notional overflows"));
        }

        if order.order_type == OrderType::PostOnly {
            // Expired makers would be skipped by matching, so they do not count
            let best_live = self
                .book
                .side(side.opposite())
                .iter()
                .find(|(_, node)| !node.is_expired(now))
                .map(|(_, node)| node.price);
            if best_live.is_some_and(|best| side.crosses(order.limit_price, best)) {
                return Err(ExchangeError::InvalidOrderParameters(
                    "post-only order would cross",
                ));
            }
        }

        // === Planning ===
        let plan = if order.order_type == OrderType::PostOnly {
            MatchPlan::unmatched(order.max_base_qty)
        } else {
            self.plan_match(&MatchRequest {
                side,
                limit_price: order.limit_price,
                any_price: order.order_type == OrderType::Market,
                max_base_lots: order.max_base_qty,
                quote_cap: match side {
                    Side::Bid => required,
                    Side::Ask => u64::MAX,
                },
                limit: order.limit,
                owner: Some(owner),
                self_trade: order.self_trade_behavior,
                now,
            })?
        };

        let mut rest_lots = 0;
        if plan.remaining > 0 && !plan.cap_hit && order.order_type.may_rest() {
            let notional = self
                .quote_native(order.limit_price, plan.remaining)
                .ok_or(ExchangeError::InvariantViolation("remainder notional overflow"))?;
            if notional >= self.config.quote_dust_threshold {
                rest_lots = plan.remaining;
            }
        }
        let dropped = plan.remaining - rest_lots;

        let filled_base = self
            .base_native(plan.base_lots_filled)
            .ok_or(ExchangeError::InvariantViolation("filled base overflow"))?;
        let (spent, proceeds_asset, proceeds) = match side {
            Side::Bid => (
                plan.quote_notional
                    .add_or_violate(plan.taker_fees, "bid spend overflow")?,
                Asset::Base,
                filled_base,
            ),
            Side::Ask => (
                filled_base,
                Asset::Quote,
                plan.quote_notional
                    .sub_or_violate(plan.taker_fees, "fees exceed proceeds")?,
            ),
        };
        let rest_lock = self
            .locked_native(side, order.limit_price, rest_lots)
            .ok_or(ExchangeError::InvariantViolation("rest lock overflow"))?;
        let leftover = required
            .sub_or_violate(spent, "fills exceed deposit")?
            .sub_or_violate(rest_lock, "remainder exceeds deposit")?;

        // === Capacity probes ===
        let record = self
            .ledger
            .get(handle)
            .ok_or(ExchangeError::InvariantViolation("dangling open orders handle"))?;
        if rest_lots > 0 {
            self.book.side(side).can_insert(order.limit_price)?;
            if !record.has_free_slot() {
                return Err(ExchangeError::CapacityExceeded(Capacity::OpenOrdersSlots));
            }
        }

        // === Custody ===
        let from_wallet = required - record.free(asset).min(required);
        custody.deposit(owner, asset, from_wallet)?;

        // === Apply ===
        let order_id = self.seq_num;
        self.seq_num += 1;
        self.vault.deposit(asset, from_wallet)?;
        {
            let record = self.ledger.record_mut(handle)?;
            record.credit_free(asset, from_wallet)?;
            record.lock(asset, required)?;
        }

        let taker = TakerRef {
            handle,
            owner,
            order_id,
            client_order_id: order.client_order_id,
        };
        let mut events = self.apply_match(&plan, side, Some(taker))?;

        {
            let record = self.ledger.record_mut(handle)?;
            record.debit_locked(asset, spent)?;
            record.credit_free(proceeds_asset, proceeds)?;
            record.unlock(asset, leftover)?;
        }

        if rest_lots > 0 {
            let node = OrderNode {
                price: order.limit_price,
                qty: rest_lots,
                seq: order_id,
                client_order_id: order.client_order_id,
                owner,
                max_ts: order.max_ts.unwrap_or(i64::MAX),
                owner_slot: handle,
                ..OrderNode::empty()
            };
            let book_handle = self.book.side_mut(side).insert(node)?;
            let slot = self.ledger.record_mut(handle)?.acquire_slot(OrderSlot {
                order_id,
                handle: book_handle,
                side,
                client_order_id: order.client_order_id,
            })?;
            if let Some(node) = self.book.side_mut(side).node_mut(book_handle) {
                node.record_slot = slot;
            }
        }

        if dropped > 0 {
            let out = Event::Out(OutEvent {
                side,
                owner_slot: handle,
                owner,
                order_id,
                client_order_id: order.client_order_id,
                released_base_lots: dropped,
                native_qty_released: leftover,
                release_funds: false,
            });
            let seq = self.push_event(out)?;
            events.push(QueuedEvent { seq, event: out });
        }

        debug!(
            owner,
            order_id,
            side = ?side,
            price = order.limit_price,
            filled = plan.base_lots_filled,
            rested = rest_lots,
            dropped,
            cap_hit = plan.cap_hit,
            "order placed"
        );

        Ok(PlaceOutcome {
            order_id,
            base_lots_filled: plan.base_lots_filled,
            quote_notional: plan.quote_notional,
            base_lots_rested: rest_lots,
            base_lots_dropped: dropped,
            base_lots_decremented: plan.base_lots_decremented,
            cap_hit: plan.cap_hit,
            events,
        })
    }

    /// Cancel a resting order by its order id.
    ///
    /// The order leaves the book now; its funds stay locked until the crank
    /// consumes the queued `Out` event.
    pub fn cancel_order(&mut self, owner: TraderId, order_id: u64) -> Result<CancelOutcome> {
        let handle = self.ledger.handle_of(owner)?;
        let (_, slot) = self
            .ledger
            .get(handle)
            .and_then(|r| r.find_order(order_id))
            .ok_or(ExchangeError::OrderNotFound(order_id))?;
        self.cancel_slot(slot)
    }

    /// Cancel the first resting order carrying `client_order_id`.
    pub fn cancel_order_by_client_id(
        &mut self,
        owner: TraderId,
        client_order_id: u64,
    ) -> Result<CancelOutcome> {
        let handle = self.ledger.handle_of(owner)?;
        let (_, slot) = self
            .ledger
            .get(handle)
            .and_then(|r| r.find_by_client_id(client_order_id))
            .ok_or(ExchangeError::OrderNotFound(client_order_id))?;
        self.cancel_slot(slot)
    }

    fn cancel_slot(&mut self, slot: OrderSlot) -> Result<CancelOutcome> {
        if self.book.get(slot.side, slot.handle, slot.order_id).is_none() {
            return Err(ExchangeError::InvariantViolation(
                "open orders slot without a resting order",
            ));
        }
        let event = self.remove_resting(slot.side, slot.handle)?;
        let (released_base_lots, native_released) = match event.event {
            Event::Out(out) => (out.released_base_lots, out.native_qty_released),
            Event::Fill(_) => (0, 0),
        };
        debug!(order_id = slot.order_id, side = ?slot.side, released_base_lots, "order cancelled");

        Ok(CancelOutcome {
            order_id: slot.order_id,
            side: slot.side,
            released_base_lots,
            native_released,
            event,
        })
    }
}
