//! Price Level - the time-priority queue behind one price.
//!
//! The queue is intrusive: each `OrderNode` carries its own `prev`/`next`
//! handles, so appending and unlinking never allocate. Order ids increase
//! monotonically, so front-to-back order is also id order.

use crate::arena::{Arena, ArenaIndex, OrderNode, NULL_INDEX};

/// Orders resting at one price, oldest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceLevel {
    /// Oldest order; matched first
    pub front: ArenaIndex,
    /// Newest order
    pub back: ArenaIndex,
    /// Base lots resting across the queue
    pub base_lots: u64,
    pub orders: u32,
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceLevel {
    #[inline]
    pub const fn new() -> Self {
        Self {
            front: NULL_INDEX,
            back: NULL_INDEX,
            base_lots: 0,
            orders: 0,
        }
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.orders == 0
    }

    /// Queue an already allocated order behind everything at this price.
    #[inline]
    pub fn append(&mut self, arena: &mut Arena<OrderNode>, handle: ArenaIndex) {
        let previous_back = self.back;
        let node = arena.get_mut(handle);
        node.prev = previous_back;
        node.next = NULL_INDEX;
        let lots = node.qty;

        match previous_back {
            NULL_INDEX => self.front = handle,
            back => arena.get_mut(back).next = handle,
        }
        self.back = handle;
        self.orders += 1;
        self.base_lots += lots;
    }

    /// Take an order out of the queue, wherever it sits.
    ///
    /// The slot stays allocated; freeing it is the caller's job. Returns
    /// whether the level is now empty.
    #[inline]
    pub fn unlink(&mut self, arena: &mut Arena<OrderNode>, handle: ArenaIndex) -> bool {
        let node = arena.get_mut(handle);
        let (prev, next, lots) = (node.prev, node.next, node.qty);
        node.prev = NULL_INDEX;
        node.next = NULL_INDEX;

        match prev {
            NULL_INDEX => self.front = next,
            p => arena.get_mut(p).next = next,
        }
        match next {
            NULL_INDEX => self.back = prev,
            n => arena.get_mut(n).prev = prev,
        }
        debug_assert!(self.orders > 0 && self.base_lots >= lots);
        self.orders -= 1;
        self.base_lots -= lots;
        self.is_empty()
    }

    /// Oldest order, if any
    #[inline]
    pub fn first(&self) -> Option<ArenaIndex> {
        (self.front != NULL_INDEX).then_some(self.front)
    }

    /// Record a partial fill applied directly to a queued node.
    #[inline]
    pub fn shrink(&mut self, lots: u64) {
        debug_assert!(self.base_lots >= lots);
        self.base_lots -= lots;
    }

    /// Recount the queue from its links as (base lots, orders).
    pub fn recount(&self, arena: &Arena<OrderNode>) -> (u64, u32) {
        let mut cursor = self.front;
        let (mut lots, mut orders) = (0u64, 0u32);
        while cursor != NULL_INDEX {
            let node = arena.get(cursor);
            lots += node.qty;
            orders += 1;
            cursor = node.next;
        }
        (lots, orders)
    }
}
