//! Command types for the market engine.
//!
//! Commands are the instructions a submission environment delivers to one
//! market. Each command is processed to completion before the next.

use serde::{Deserialize, Serialize};

use crate::arena::ArenaIndex;

/// Identity of a trader (wallet owner)
pub type TraderId = u64;

/// Handle of an open orders record inside the market ledger
pub type OpenOrdersHandle = ArenaIndex;

/// Order side (bid = buy, ask = sell)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Side {
    /// Buy side (bids)
    #[default]
    Bid = 0,
    /// Sell side (asks)
    Ask = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// True if an order on this side at `limit` trades against `resting`.
    #[inline]
    pub const fn crosses(self, limit: u64, resting: u64) -> bool {
        match self {
            // Buyer willing to pay >= lowest ask
            Side::Bid => limit >= resting,
            // Seller willing to accept <= highest bid
            Side::Ask => limit <= resting,
        }
    }
}

/// How an incoming order treats liquidity and its own remainder
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Cross what it can, rest the remainder
    #[default]
    Limit,
    /// Cross what it can, drop the remainder
    ImmediateOrCancel,
    /// Rest only; rejected if it would cross
    PostOnly,
    /// Cross at any price; `limit_price` only sizes the bid budget. Never rests.
    Market,
}

impl OrderType {
    /// Whether a remainder may be placed in the book
    #[inline]
    pub const fn may_rest(self) -> bool {
        matches!(self, OrderType::Limit | OrderType::PostOnly)
    }
}

/// What to do when an order meets a resting order of the same owner
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfTradeBehavior {
    /// Shrink both orders by the overlap without trading
    #[default]
    DecrementTake,
    /// Cancel the resting order and keep matching
    CancelProvide,
    /// Fail the whole instruction
    AbortTransaction,
}

/// Place a new order through an open orders account
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewOrder {
    /// Order side (bid/ask)
    pub side: Side,
    /// Quote lots per base lot
    pub limit_price: u64,
    /// Order quantity in base lots
    pub max_base_qty: u64,
    pub order_type: OrderType,
    /// Opaque tag echoed in events
    pub client_order_id: u64,
    pub self_trade_behavior: SelfTradeBehavior,
    /// Maximum resting orders touched while matching
    pub limit: u16,
    /// Expiry timestamp in seconds, if any
    pub max_ts: Option<i64>,
}

impl NewOrder {
    /// A plain limit order with default matching limits
    pub fn limit(side: Side, limit_price: u64, max_base_qty: u64) -> Self {
        Self {
            side,
            limit_price,
            max_base_qty,
            order_type: OrderType::Limit,
            client_order_id: 0,
            self_trade_behavior: SelfTradeBehavior::default(),
            limit: u16::MAX,
            max_ts: None,
        }
    }

    pub fn with_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    pub fn with_client_id(mut self, client_order_id: u64) -> Self {
        self.client_order_id = client_order_id;
        self
    }

    pub fn with_limit(mut self, limit: u16) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_self_trade(mut self, behavior: SelfTradeBehavior) -> Self {
        self.self_trade_behavior = behavior;
        self
    }

    pub fn with_max_ts(mut self, max_ts: i64) -> Self {
        self.max_ts = Some(max_ts);
        self
    }
}

/// Immediate match settled straight to the taker's external accounts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TakeOrder {
    pub side: Side,
    /// Quote lots per base lot
    pub limit_price: u64,
    /// Base lots to buy or sell at most
    pub max_base_qty: u64,
    /// Native quote: spend cap (incl. fees) for bids, gross proceeds cap for asks
    pub max_quote_qty: u64,
    /// Slippage floor in base lots
    pub min_base_qty: u64,
    /// Slippage floor in native quote (paid for bids, received for asks)
    pub min_quote_qty: u64,
    /// Maximum resting orders touched while matching
    pub limit: u16,
}

/// Input commands for one market
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Open the trader's open orders record
    InitOpenOrders { owner: TraderId },
    /// Place a new order
    Place { owner: TraderId, order: NewOrder },
    /// Cancel a resting order by order id
    Cancel { owner: TraderId, order_id: u64 },
    /// Cancel a resting order by client order id
    CancelByClientId { owner: TraderId, client_order_id: u64 },
    /// Crank: apply queued events for the listed records
    ConsumeEvents { owners: Vec<OpenOrdersHandle>, limit: u16 },
    /// Withdraw free balances to the owner's external accounts
    Settle { owner: TraderId },
    /// Immediate match without an open orders record
    Take { taker: TraderId, order: TakeOrder },
    /// Withdraw accrued fees
    SweepFees { recipient: TraderId },
}
