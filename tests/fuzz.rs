//! Fuzz Test - Compares the market against a reference implementation.
//!
//! Uses a naive but correct reference book to verify the optimized engine
//! produces identical prices, resting orders and traded volume, and that the
//! vaults balance against the ledger after every instruction.

use crank_lob::{
    Address, Asset, Command, Engine, ExchangeError, FeeSchedule, Market, MarketConfig,
    MarketParams, MemoryCustody, NewOrder, OpenOrdersHandle, Outcome, Side, TakeOrder,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};

const BIDDERS: std::ops::Range<u64> = 1..101;
const ASKERS: std::ops::Range<u64> = 101..201;

/// Simple reference implementation for verification
struct ReferenceBook {
    bids: BTreeMap<u64, Vec<(u64, u64)>>, // price -> [(order_id, qty)]
    asks: BTreeMap<u64, Vec<(u64, u64)>>,
    orders: HashMap<u64, (Side, u64)>, // order_id -> (side, price)
}

impl ReferenceBook {
    fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders: HashMap::new(),
        }
    }

    fn best_bid(&self) -> Option<u64> {
        self.bids.keys().next_back().copied()
    }

    fn best_ask(&self) -> Option<u64> {
        self.asks.keys().next().copied()
    }

    /// Cross then rest; returns traded lots
    fn place(&mut self, order_id: u64, side: Side, price: u64, mut qty: u64) -> u64 {
        let mut traded = 0;
        let prices: Vec<u64> = match side {
            Side::Bid => self.asks.range(..=price).map(|(p, _)| *p).collect(),
            Side::Ask => self.bids.range(price..).rev().map(|(p, _)| *p).collect(),
        };
        let opposite = match side {
            Side::Bid => &mut self.asks,
            Side::Ask => &mut self.bids,
        };

        for p in prices {
            if qty == 0 {
                break;
            }
            let level = opposite.get_mut(&p).unwrap();
            while !level.is_empty() && qty > 0 {
                let lots = level[0].1.min(qty);
                level[0].1 -= lots;
                qty -= lots;
                traded += lots;
                if level[0].1 == 0 {
                    let (maker_id, _) = level.remove(0);
                    self.orders.remove(&maker_id);
                }
            }
            if level.is_empty() {
                opposite.remove(&p);
            }
        }

        if qty > 0 {
            let own = match side {
                Side::Bid => &mut self.bids,
                Side::Ask => &mut self.asks,
            };
            own.entry(price).or_default().push((order_id, qty));
            self.orders.insert(order_id, (side, price));
        }
        traded
    }

    fn cancel(&mut self, order_id: u64) -> bool {
        let Some((side, price)) = self.orders.remove(&order_id) else {
            return false;
        };
        let book = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        if let Some(orders) = book.get_mut(&price) {
            orders.retain(|(id, _)| *id != order_id);
            if orders.is_empty() {
                book.remove(&price);
            }
        }
        true
    }

    fn order_count(&self) -> usize {
        self.orders.len()
    }
}

struct Harness {
    engine: Engine<MemoryCustody>,
    handles: HashMap<u64, OpenOrdersHandle>,
}

fn harness(fees: FeeSchedule) -> Harness {
    let params = MarketParams::find_signer(
        Address::new([0x11; 32]),
        Address::new([0x22; 32]),
        MarketConfig::new(1, 1).with_fees(fees),
    )
    .unwrap();
    let market = Market::initialize(params).unwrap();
    let custody = MemoryCustody::new(market.vault_signer());
    let mut engine = Engine::new(market, custody).with_clock(|| 0);

    let mut handles = HashMap::new();
    for owner in BIDDERS.chain(ASKERS) {
        engine.custody_mut().fund(owner, Asset::Base, u64::MAX / 4);
        engine.custody_mut().fund(owner, Asset::Quote, u64::MAX / 4);
        match engine.process_command(Command::InitOpenOrders { owner }) {
            Ok(Outcome::Initialized(h)) => handles.insert(owner, h),
            other => panic!("init failed: {other:?}"),
        };
    }
    Harness { engine, handles }
}

fn random_order(rng: &mut ChaCha8Rng) -> (u64, NewOrder) {
    let side = if rng.gen_bool(0.5) { Side::Bid } else { Side::Ask };
    let owner = match side {
        Side::Bid => rng.gen_range(BIDDERS),
        Side::Ask => rng.gen_range(ASKERS),
    };
    let price = rng.gen_range(980..1020);
    let qty = rng.gen_range(1..200);
    (owner, NewOrder::limit(side, price, qty))
}

/// Take with a random base floor, so some fail their slippage check
fn random_take(rng: &mut ChaCha8Rng) -> (u64, TakeOrder) {
    let (owner, order) = random_order(rng);
    let take = TakeOrder {
        side: order.side,
        limit_price: order.limit_price,
        max_base_qty: order.max_base_qty,
        max_quote_qty: u64::MAX,
        min_base_qty: rng.gen_range(0..=order.max_base_qty),
        min_quote_qty: 0,
        limit: rng.gen_range(1..16),
    };
    (owner, take)
}

fn drain_events(h: &mut Harness) {
    let owners: Vec<OpenOrdersHandle> = h.handles.values().copied().collect();
    while !h.engine.market.event_queue().is_empty() {
        h.engine
            .process_command(Command::ConsumeEvents {
                owners: owners.clone(),
                limit: 64,
            })
            .unwrap();
    }
}

#[test]
fn test_fuzz_best_prices() {
    const SEED: u64 = 0xFEEDFACE;
    const OPS: usize = 10_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut h = harness(FeeSchedule::ZERO);
    let mut reference = ReferenceBook::new();
    let mut active: Vec<(u64, u64)> = Vec::new(); // (owner, order_id)

    for i in 0..OPS {
        // 70% place, 30% cancel
        if active.is_empty() || rng.gen_bool(0.7) {
            let (owner, order) = random_order(&mut rng);
            let placed = match h.engine.process_command(Command::Place { owner, order }) {
                Ok(Outcome::Placed(p)) => p,
                other => panic!("place failed at op {i}: {other:?}"),
            };
            reference.place(placed.order_id, order.side, order.limit_price, order.max_base_qty);
            if placed.base_lots_rested > 0 {
                active.push((owner, placed.order_id));
            }
        } else {
            let idx = rng.gen_range(0..active.len());
            let (owner, order_id) = active.swap_remove(idx);
            let engine_ok = h
                .engine
                .process_command(Command::Cancel { owner, order_id })
                .is_ok();
            assert_eq!(engine_ok, reference.cancel(order_id), "cancel mismatch at op {i}");
        }

        assert_eq!(
            h.engine.best_bid(),
            reference.best_bid(),
            "Best bid mismatch at op {}",
            i
        );
        assert_eq!(
            h.engine.best_ask(),
            reference.best_ask(),
            "Best ask mismatch at op {}",
            i
        );

        if i % 64 == 0 {
            drain_events(&mut h);
        }
    }

    assert_eq!(h.engine.order_count(), reference.order_count());
    h.engine.market.check_conservation().unwrap();
}

#[test]
fn test_fuzz_trade_volume() {
    const SEED: u64 = 0x12345678;
    const OPS: usize = 5_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut h = harness(FeeSchedule::ZERO);
    let mut reference = ReferenceBook::new();

    let mut engine_traded = 0u64;
    let mut reference_traded = 0u64;

    for _ in 0..OPS {
        let (owner, order) = random_order(&mut rng);
        let placed = match h.engine.process_command(Command::Place { owner, order }) {
            Ok(Outcome::Placed(p)) => p,
            other => panic!("place failed: {other:?}"),
        };
        let taker_lots: u64 = placed.taker_fills().map(|f| f.base_lots).sum();
        assert_eq!(taker_lots, placed.base_lots_filled);

        engine_traded += placed.base_lots_filled;
        reference_traded +=
            reference.place(placed.order_id, order.side, order.limit_price, order.max_base_qty);

        if h.engine.market.event_queue().len() > 1_500 {
            drain_events(&mut h);
        }
    }

    assert_eq!(
        engine_traded, reference_traded,
        "Total traded volume mismatch: engine={}, reference={}",
        engine_traded, reference_traded
    );
}

#[test]
fn test_fuzz_conservation_with_fees() {
    const SEED: u64 = 0xBADC0DE;
    const OPS: usize = 5_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut h = harness(FeeSchedule::default());
    let owners: Vec<u64> = BIDDERS.chain(ASKERS).collect();

    for i in 0..OPS {
        let roll: f64 = rng.gen();
        let result = if roll < 0.65 {
            let (owner, order) = random_order(&mut rng);
            h.engine.process_command(Command::Place { owner, order })
        } else if roll < 0.75 {
            let (taker, order) = random_take(&mut rng);
            h.engine.process_command(Command::Take { taker, order })
        } else if roll < 0.9 {
            let handles: Vec<OpenOrdersHandle> = h.handles.values().copied().collect();
            h.engine.process_command(Command::ConsumeEvents {
                owners: handles,
                limit: rng.gen_range(1..32),
            })
        } else {
            let owner = *owners.choose(&mut rng).unwrap();
            h.engine.process_command(Command::Settle { owner })
        };
        match result {
            Ok(_)
            | Err(ExchangeError::NothingToSettle)
            | Err(ExchangeError::SlippageNotMet { .. }) => {}
            Err(e) => panic!("unexpected error at op {i}: {e}"),
        }
        h.engine
            .market
            .check_conservation()
            .unwrap_or_else(|e| panic!("conservation broken at op {i}: {e}"));
    }

    // Crank and settle everyone; only fees and orphaned credits remain
    drain_events(&mut h);
    let resting = h.engine.order_count();
    for owner in owners {
        let _ = h.engine.process_command(Command::Settle { owner });
    }
    let vault = *h.engine.market.vault();
    if resting == 0 {
        assert_eq!(
            vault.quote_deposits_total,
            vault.quote_fees_accrued + vault.orphaned_quote
        );
        assert_eq!(vault.base_deposits_total, vault.orphaned_base);
    }
    assert_eq!(
        h.engine.custody().vault_balance(Asset::Quote),
        vault.quote_deposits_total
    );
    assert_eq!(
        h.engine.custody().vault_balance(Asset::Base),
        vault.base_deposits_total
    );
}
