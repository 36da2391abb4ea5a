//! Book Side - one price-ordered half of the order book.
//!
//! Orders live in a fixed `Arena<OrderNode>`; each distinct price owns a FIFO
//! `PriceLevel` held in the crit-bit `PriceIndex`. Bids iterate price
//! descending, asks ascending, and time ascending within a price.

use crate::arena::{Arena, ArenaIndex, OrderNode, NULL_INDEX};
use crate::command::Side;
use crate::error::{Capacity, ExchangeError, Result};
use crate::price_index::{PriceIndex, PriceIter};
use crate::price_level::PriceLevel;

/// One side (bids or asks) of a market's book.
pub struct BookSide {
    side: Side,
    orders: Arena<OrderNode>,
    levels: PriceIndex,
}

impl BookSide {
    /// Create a side able to hold `capacity` resting orders.
    pub fn new(side: Side, capacity: u32) -> Self {
        Self {
            side,
            orders: Arena::new(capacity),
            levels: PriceIndex::new(capacity),
        }
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Number of resting orders
    #[inline]
    pub fn len(&self) -> usize {
        self.orders.allocated() as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Number of live price levels
    #[inline]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.orders.capacity()
    }

    /// Probe whether an order at `price` could be inserted right now.
    pub fn can_insert(&self, price: u64) -> Result<()> {
        if self.orders.is_full() {
            return Err(ExchangeError::CapacityExceeded(Capacity::BookSide));
        }
        if !self.levels.can_insert(price) {
            return Err(ExchangeError::CapacityExceeded(Capacity::PriceLevels));
        }
        Ok(())
    }

    /// Insert a fully populated order at the back of its price level.
    ///
    /// # Complexity
    /// O(key bits) for the level lookup, O(1) for the queue append.
    pub fn insert(&mut self, order: OrderNode) -> Result<ArenaIndex> {
        self.can_insert(order.price)?;

        let handle = self
            .orders
            .alloc(order)
            .ok_or(ExchangeError::CapacityExceeded(Capacity::BookSide))?;
        match self.levels.insert(order.price) {
            Some(level) => {
                level.append(&mut self.orders, handle);
                Ok(handle)
            }
            None => {
                self.orders.free(handle);
                Err(ExchangeError::CapacityExceeded(Capacity::PriceLevels))
            }
        }
    }

    /// Best order by price-time priority.
    pub fn peek_best(&self) -> Option<(ArenaIndex, &OrderNode)> {
        let (_, level) = self.best_level()?;
        let handle = level.first()?;
        Some((handle, self.orders.get(handle)))
    }

    /// Best price on this side
    #[inline]
    pub fn best_price(&self) -> Option<u64> {
        self.best_level().map(|(price, _)| price)
    }

    fn best_level(&self) -> Option<(u64, &PriceLevel)> {
        match self.side {
            Side::Bid => self.levels.max(),
            Side::Ask => self.levels.min(),
        }
    }

    /// Look up a live order by handle.
    #[inline]
    pub fn node(&self, handle: ArenaIndex) -> Option<&OrderNode> {
        self.orders.try_get(handle)
    }

    /// Mutable access for fields outside the price-time key.
    #[inline]
    pub(crate) fn node_mut(&mut self, handle: ArenaIndex) -> Option<&mut OrderNode> {
        self.orders.try_get_mut(handle)
    }

    /// Look up a live order by handle, checking it is still `order_id`.
    ///
    /// Handles are recycled; pairing with the order id rejects stale ones.
    #[inline]
    pub fn get(&self, handle: ArenaIndex, order_id: u64) -> Option<&OrderNode> {
        self.node(handle).filter(|node| node.seq == order_id)
    }

    /// Remove an order from the book and free its slot.
    pub fn remove(&mut self, handle: ArenaIndex) -> Result<OrderNode> {
        let price = self
            .orders
            .try_get(handle)
            .map(|node| node.price)
            .ok_or(ExchangeError::InvariantViolation("removing an order that is not resting"))?;

        let level = self
            .levels
            .level_mut(price)
            .ok_or(ExchangeError::InvariantViolation("resting order without a price level"))?;
        let now_empty = level.unlink(&mut self.orders, handle);
        if now_empty {
            self.levels.remove(price);
        }
        Ok(self.orders.free(handle))
    }

    /// Decrement an order's quantity in place.
    ///
    /// If the quantity reaches zero the order is removed; no event is emitted
    /// here, the caller decides what to record. Returns the remaining quantity.
    pub fn reduce(&mut self, handle: ArenaIndex, qty: u64) -> Result<u64> {
        let node = self
            .orders
            .try_get_mut(handle)
            .ok_or(ExchangeError::InvariantViolation("reducing an order that is not resting"))?;
        if qty > node.qty {
            return Err(ExchangeError::InvariantViolation("reduce exceeds resting quantity"));
        }
        if qty == node.qty {
            self.remove(handle)?;
            return Ok(0);
        }

        node.qty -= qty;
        let (price, remaining) = (node.price, node.qty);
        self.levels
            .level_mut(price)
            .ok_or(ExchangeError::InvariantViolation("resting order without a price level"))?
            .shrink(qty);
        Ok(remaining)
    }

    /// Resting orders in matching priority.
    pub fn iter(&self) -> BookIter<'_> {
        BookIter {
            levels: self.levels.iter(self.side == Side::Bid),
            orders: &self.orders,
            cursor: NULL_INDEX,
        }
    }

    /// Aggregate (quantity, order count) resting at `price`
    pub fn depth_at(&self, price: u64) -> (u64, u32) {
        self.levels
            .level(price)
            .map(|l| (l.base_lots, l.orders))
            .unwrap_or((0, 0))
    }

    /// Top `n` levels in priority order as (price, quantity)
    pub fn depth(&self, n: usize) -> Vec<(u64, u64)> {
        self.levels
            .iter(self.side == Side::Bid)
            .take(n)
            .map(|(price, level)| (price, level.base_lots))
            .collect()
    }

    /// Verify level aggregates against the queues they summarize.
    pub fn check_invariants(&self) -> Result<()> {
        let mut orders = 0u64;
        for (_, level) in self.levels.iter(false) {
            let (lots, count) = level.recount(&self.orders);
            if lots != level.base_lots || count != level.orders || count == 0 {
                return Err(ExchangeError::InvariantViolation("price level totals out of sync"));
            }
            orders += count as u64;
        }
        if orders != self.orders.allocated() as u64 {
            return Err(ExchangeError::InvariantViolation("orphaned order nodes"));
        }
        Ok(())
    }

    pub fn warm_up(&mut self) {
        self.orders.warm_up();
        self.levels.warm_up();
    }
}

impl std::fmt::Debug for BookSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookSide")
            .field("side", &self.side)
            .field("best", &self.best_price())
            .field("orders", &self.len())
            .field("levels", &self.level_count())
            .finish()
    }
}

/// Iterator over resting orders in matching priority
pub struct BookIter<'a> {
    levels: PriceIter<'a>,
    orders: &'a Arena<OrderNode>,
    cursor: ArenaIndex,
}

impl<'a> Iterator for BookIter<'a> {
    type Item = (ArenaIndex, &'a OrderNode);

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor == NULL_INDEX {
            let (_, level) = self.levels.next()?;
            self.cursor = level.front;
        }
        let handle = self.cursor;
        let node = self.orders.get(handle);
        self.cursor = node.next;
        Some((handle, node))
    }
}
