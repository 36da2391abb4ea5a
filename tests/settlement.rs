//! Settlement Tests - end-to-end flows through matching, the crank and
//! settlement, checked against the vaults.

use crank_lob::{
    Address, Asset, Event, ExchangeError, FeeSchedule, Market, MarketConfig, MarketParams,
    MemoryCustody, NewOrder, OpenOrdersHandle, Side, TakeOrder,
};

const WALLET: u64 = 1_000_000;

fn setup(fees: FeeSchedule, event_queue: u32) -> (Market, MemoryCustody) {
    let mut config = MarketConfig::new(1, 1).with_fees(fees);
    config.capacities.event_queue = event_queue;
    let params =
        MarketParams::find_signer(Address::new([0x77; 32]), Address::new([0x88; 32]), config)
            .unwrap();
    let market = Market::initialize(params).unwrap();
    let custody = MemoryCustody::new(market.vault_signer());
    (market, custody)
}

fn open(m: &mut Market, custody: &mut MemoryCustody, owner: u64) -> OpenOrdersHandle {
    custody.fund(owner, Asset::Base, WALLET);
    custody.fund(owner, Asset::Quote, WALLET);
    m.init_open_orders(owner).unwrap()
}

#[test]
fn test_maker_bid_meets_larger_ask() {
    let (mut m, mut custody) = setup(FeeSchedule::default(), 1_024);
    let maker = open(&mut m, &mut custody, 1);
    let taker = open(&mut m, &mut custody, 2);

    m.place_order(&mut custody, 1, NewOrder::limit(Side::Bid, 55, 2), 0)
        .unwrap();
    assert_eq!(m.ledger().by_owner(1).unwrap().quote_locked, 110);

    let out = m
        .place_order(&mut custody, 2, NewOrder::limit(Side::Ask, 55, 20), 0)
        .unwrap();
    assert_eq!(m.vault().base_deposits_total, 20);
    assert_eq!(m.vault().quote_deposits_total, 110);
    assert_eq!(custody.vault_balance(Asset::Base), 20);
    assert_eq!(custody.vault_balance(Asset::Quote), 110);

    let fills: Vec<_> = out
        .events
        .iter()
        .filter_map(|e| match e.event {
            Event::Fill(f) => Some(f),
            Event::Out(_) => None,
        })
        .collect();
    assert_eq!(fills.len(), 2);
    assert!(fills[0].maker && fills[0].base_lots == 2 && fills[0].price == 55);
    assert!(!fills[1].maker && fills[1].base_lots == 2 && fills[1].price == 55);
    assert_eq!(out.base_lots_rested, 18);

    m.consume_events(&[maker, taker], 16).unwrap();
    assert_eq!(m.ledger().by_owner(1).unwrap().base_free, 2);

    let taker_quote = m.ledger().by_owner(2).unwrap().quote_free;
    assert!(taker_quote > 0 && taker_quote <= 110);
    m.check_conservation().unwrap();
}

#[test]
fn test_take_below_floor_on_empty_book() {
    let (mut m, mut custody) = setup(FeeSchedule::default(), 1_024);
    custody.fund(5, Asset::Quote, WALLET);

    let err = m
        .take(
            &mut custody,
            5,
            TakeOrder {
                side: Side::Bid,
                limit_price: 55,
                max_base_qty: 4,
                max_quote_qty: 10_000,
                min_base_qty: 1,
                min_quote_qty: 0,
                limit: 16,
            },
            0,
        )
        .unwrap_err();
    assert!(matches!(err, ExchangeError::SlippageNotMet { base_lots: 0, min_base_lots: 1, .. }));
    assert_eq!(custody.balance(5, Asset::Quote), WALLET);
    assert_eq!(m.vault().quote_deposits_total, 0);
}

#[test]
fn test_settle_is_idempotent() {
    let (mut m, mut custody) = setup(FeeSchedule::ZERO, 1_024);
    let maker = open(&mut m, &mut custody, 1);
    let taker = open(&mut m, &mut custody, 2);

    m.place_order(&mut custody, 1, NewOrder::limit(Side::Ask, 40, 5), 0)
        .unwrap();
    m.place_order(&mut custody, 2, NewOrder::limit(Side::Bid, 40, 5), 0)
        .unwrap();
    m.consume_events(&[maker, taker], 16).unwrap();

    let first = m.settle_funds(&mut custody, 1).unwrap();
    assert_eq!((first.base, first.quote), (0, 200));
    assert_eq!(
        m.settle_funds(&mut custody, 1),
        Err(ExchangeError::NothingToSettle)
    );

    m.settle_funds(&mut custody, 2).unwrap();
    assert_eq!(custody.balance(1, Asset::Quote), WALLET + 200);
    assert_eq!(custody.balance(2, Asset::Base), WALLET + 5);
    assert_eq!(custody.vault_balance(Asset::Base), 0);
    assert_eq!(custody.vault_balance(Asset::Quote), 0);
}

#[test]
fn test_price_time_priority_and_maker_price() {
    let (mut m, mut custody) = setup(FeeSchedule::ZERO, 1_024);
    for owner in 1..=4 {
        open(&mut m, &mut custody, owner);
    }

    let first = m
        .place_order(&mut custody, 1, NewOrder::limit(Side::Ask, 50, 3), 0)
        .unwrap();
    let second = m
        .place_order(&mut custody, 2, NewOrder::limit(Side::Ask, 50, 3), 0)
        .unwrap();
    m.place_order(&mut custody, 3, NewOrder::limit(Side::Ask, 49, 1), 0)
        .unwrap();

    let out = m
        .place_order(&mut custody, 4, NewOrder::limit(Side::Bid, 60, 5), 0)
        .unwrap();
    let makers: Vec<(u64, u64, u64)> = out
        .maker_fills()
        .map(|f| (f.order_id, f.price, f.base_lots))
        .collect();
    assert_eq!(
        makers,
        vec![(3, 49, 1), (first.order_id, 50, 3), (second.order_id, 50, 1)]
    );
    assert!(out.taker_fills().all(|f| f.price != 60));
}

#[test]
fn test_full_fill_leaves_nothing_resting() {
    let (mut m, mut custody) = setup(FeeSchedule::default(), 1_024);
    open(&mut m, &mut custody, 1);
    open(&mut m, &mut custody, 2);

    for price in [100, 101, 102] {
        m.place_order(&mut custody, 1, NewOrder::limit(Side::Bid, price, 7), 0)
            .unwrap();
    }
    let out = m
        .place_order(&mut custody, 2, NewOrder::limit(Side::Ask, 100, 21), 0)
        .unwrap();
    let total: u64 = out.taker_fills().map(|f| f.base_lots).sum();
    assert_eq!(total, 21);
    assert_eq!(out.base_lots_rested, 0);
    assert_eq!(m.best_ask(), None);
    assert_eq!(m.best_bid(), None);
}

#[test]
fn test_event_gap_after_overwrite() {
    let (mut m, mut custody) = setup(FeeSchedule::ZERO, 4);
    let maker = open(&mut m, &mut custody, 1);
    let taker = open(&mut m, &mut custody, 2);

    for _ in 0..3 {
        m.place_order(&mut custody, 1, NewOrder::limit(Side::Ask, 10, 1), 0)
            .unwrap();
    }
    // Six fills into a four-slot ring
    m.place_order(&mut custody, 2, NewOrder::limit(Side::Bid, 10, 3), 0)
        .unwrap();
    let queue = m.event_queue();
    assert_eq!(queue.first_retained(), 2);
    assert!(queue.events_since(0).is_err());
    assert_eq!(queue.events_since(2).unwrap().count(), 4);

    let report = m.consume_events(&[maker, taker], 16).unwrap();
    let gap = report.gap.unwrap();
    assert_eq!((gap.requested, gap.first_retained, gap.lost), (0, 2, 2));
    assert_eq!(report.consumed, 4);

    // The lost maker fill's proceeds are parked, not double-counted
    assert_eq!(m.vault().orphaned_quote, 10);
    assert_eq!(m.ledger().by_owner(1).unwrap().quote_free, 20);
    m.check_conservation().unwrap();

    // A second pass sees no gap
    assert_eq!(m.consume_events(&[maker, taker], 16).unwrap().gap, None);
}

#[test]
fn test_market_closed_to_new_orders() {
    let (mut m, mut custody) = setup(FeeSchedule::ZERO, 64);
    open(&mut m, &mut custody, 1);
    let placed = m
        .place_order(&mut custody, 1, NewOrder::limit(Side::Bid, 10, 1), 0)
        .unwrap();

    m.set_accepting_orders(false);
    assert!(matches!(
        m.place_order(&mut custody, 1, NewOrder::limit(Side::Bid, 10, 1), 0),
        Err(ExchangeError::InvalidOrderParameters(_))
    ));
    // Existing orders can still leave
    m.cancel_order(1, placed.order_id).unwrap();
    assert!(!m.snapshot().flags.accepting_orders);
}
