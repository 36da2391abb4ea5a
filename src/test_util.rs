//! Shared fixtures for unit tests.

use crate::command::{OpenOrdersHandle, TraderId};
use crate::config::MarketConfig;
use crate::custody::{Address, Asset, MemoryCustody};
use crate::fees::FeeSchedule;
use crate::market::{Market, MarketParams};

pub(crate) const WALLET: u64 = 1_000_000;

/// Market with unit lot sizes and custody bound to its signer
pub(crate) fn market(fees: FeeSchedule) -> (Market, MemoryCustody) {
    let params = MarketParams::find_signer(
        Address::new([5u8; 32]),
        Address::new([6u8; 32]),
        MarketConfig::new(1, 1).with_fees(fees),
    )
    .unwrap();
    let market = Market::initialize(params).unwrap();
    let custody = MemoryCustody::new(market.vault_signer());
    (market, custody)
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Trader {
    pub id: TraderId,
    pub handle: OpenOrdersHandle,
}

impl Trader {
    /// Open a record and fund both wallets generously
    pub fn open(market: &mut Market, custody: &mut MemoryCustody, id: TraderId) -> Self {
        Self::open_with(market, custody, id, WALLET, WALLET)
    }

    pub fn open_with(
        market: &mut Market,
        custody: &mut MemoryCustody,
        id: TraderId,
        base: u64,
        quote: u64,
    ) -> Self {
        custody.fund(id, Asset::Base, base);
        custody.fund(id, Asset::Quote, quote);
        let handle = market.init_open_orders(id).unwrap();
        Self { id, handle }
    }
}
