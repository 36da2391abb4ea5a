//! Order Book - both sides of a market's central limit order book.
//!
//! Each side is a fixed-capacity `BookSide`; best prices come straight from
//! the price index, so there is no cached best to keep in sync.

use crate::arena::{ArenaIndex, OrderNode};
use crate::book_side::BookSide;
use crate::command::Side;
use crate::error::Result;

/// Bid and ask sides of one market
pub struct OrderBook {
    /// Bid side (buy orders)
    pub bids: BookSide,
    /// Ask side (sell orders)
    pub asks: BookSide,
}

impl OrderBook {
    /// Create an empty book holding up to `capacity` orders per side
    pub fn new(capacity: u32) -> Self {
        Self {
            bids: BookSide::new(Side::Bid, capacity),
            asks: BookSide::new(Side::Ask, capacity),
        }
    }

    // ========================================================================
    // Side Access
    // ========================================================================

    #[inline]
    pub fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    #[inline]
    pub fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// Look up a resting order, validating that the handle still holds `order_id`
    #[inline]
    pub fn get(&self, side: Side, handle: ArenaIndex, order_id: u64) -> Option<&OrderNode> {
        self.side(side).get(handle, order_id)
    }

    // ========================================================================
    // Best Price Access
    // ========================================================================

    /// Get the best bid price (highest buy price)
    #[inline]
    pub fn best_bid(&self) -> Option<u64> {
        self.bids.best_price()
    }

    /// Get the best ask price (lowest sell price)
    #[inline]
    pub fn best_ask(&self) -> Option<u64> {
        self.asks.best_price()
    }

    /// Get the best price on a given side
    #[inline]
    pub fn best_price(&self, side: Side) -> Option<u64> {
        self.side(side).best_price()
    }

    /// Best price an incoming order on `side` would trade against
    #[inline]
    pub fn best_opposite_price(&self, side: Side) -> Option<u64> {
        self.side(side.opposite()).best_price()
    }

    /// Calculate spread (best_ask - best_bid)
    pub fn spread(&self) -> Option<u64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if ask > bid => Some(ask - bid),
            _ => None,
        }
    }

    // ========================================================================
    // Utility Methods
    // ========================================================================

    /// Total resting orders on both sides
    pub fn order_count(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.level_count()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.level_count()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Get depth at a price level
    pub fn depth_at(&self, side: Side, price: u64) -> (u64, u32) {
        self.side(side).depth_at(price)
    }

    pub fn check_invariants(&self) -> Result<()> {
        self.bids.check_invariants()?;
        self.asks.check_invariants()
    }

    pub fn warm_up(&mut self) {
        self.bids.warm_up();
        self.asks.warm_up();
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("best_bid", &self.best_bid())
            .field("best_ask", &self.best_ask())
            .field("bid_levels", &self.bid_levels())
            .field("ask_levels", &self.ask_levels())
            .field("order_count", &self.order_count())
            .finish()
    }
}
