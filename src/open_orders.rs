//! Open Orders Ledger - per-trader balances and resting order slots.
//!
//! A record tracks native base/quote amounts that are either locked behind
//! resting orders or free to settle, plus a fixed table of 128 slots naming
//! the trader's resting orders. Records live in an `Arena` so each market's
//! ledger has a fixed footprint.

use rustc_hash::FxHashMap;

use crate::arena::{Arena, ArenaIndex, NULL_INDEX};
use crate::command::{OpenOrdersHandle, Side, TraderId};
use crate::custody::Asset;
use crate::error::{Capacity, CheckedState, ExchangeError, Result};

/// Resting orders a single record can track
pub const MAX_OPEN_ORDERS: usize = 128;

/// One occupied entry of a record's order table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderSlot {
    pub order_id: u64,
    /// Book handle on `side`
    pub handle: ArenaIndex,
    pub side: Side,
    pub client_order_id: u64,
}

impl OrderSlot {
    pub const EMPTY: OrderSlot = OrderSlot {
        order_id: 0,
        handle: NULL_INDEX,
        side: Side::Bid,
        client_order_id: 0,
    };
}

/// Balances and order slots of one trader on one market.
///
/// Amounts are native units. `locked` mirrors what the trader's resting
/// orders commit; `free` is settleable.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OpenOrders {
    pub owner: TraderId,
    pub base_free: u64,
    pub base_locked: u64,
    pub quote_free: u64,
    pub quote_locked: u64,
    /// Bit i set means slot i is free
    free_slot_bits: u128,
    slots: [OrderSlot; MAX_OPEN_ORDERS],
}

impl OpenOrders {
    pub fn new(owner: TraderId) -> Self {
        Self {
            owner,
            base_free: 0,
            base_locked: 0,
            quote_free: 0,
            quote_locked: 0,
            free_slot_bits: u128::MAX,
            slots: [OrderSlot::EMPTY; MAX_OPEN_ORDERS],
        }
    }

    // ========================================================================
    // Order slots
    // ========================================================================

    #[inline]
    pub fn has_free_slot(&self) -> bool {
        self.free_slot_bits != 0
    }

    /// Number of occupied slots
    #[inline]
    pub fn order_count(&self) -> u32 {
        MAX_OPEN_ORDERS as u32 - self.free_slot_bits.count_ones()
    }

    /// Claim the lowest free slot for a newly resting order.
    pub fn acquire_slot(&mut self, entry: OrderSlot) -> Result<u8> {
        if !self.has_free_slot() {
            return Err(ExchangeError::CapacityExceeded(Capacity::OpenOrdersSlots));
        }
        let slot = self.free_slot_bits.trailing_zeros() as u8;
        self.free_slot_bits &= !(1u128 << slot);
        self.slots[slot as usize] = entry;
        Ok(slot)
    }

    /// Release a slot, returning what it held. `None` if it was already free.
    pub fn release_slot(&mut self, slot: u8) -> Option<OrderSlot> {
        let bit = 1u128 << (slot as usize % MAX_OPEN_ORDERS);
        if self.free_slot_bits & bit != 0 {
            return None;
        }
        self.free_slot_bits |= bit;
        Some(std::mem::replace(
            &mut self.slots[slot as usize],
            OrderSlot::EMPTY,
        ))
    }

    #[inline]
    pub fn slot(&self, slot: u8) -> Option<&OrderSlot> {
        let bit = 1u128 << (slot as usize % MAX_OPEN_ORDERS);
        (self.free_slot_bits & bit == 0).then(|| &self.slots[slot as usize])
    }

    /// Occupied slots in slot order
    pub fn orders(&self) -> impl Iterator<Item = (u8, &OrderSlot)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(i, _)| self.free_slot_bits & (1u128 << i) == 0)
            .map(|(i, s)| (i as u8, s))
    }

    pub fn find_order(&self, order_id: u64) -> Option<(u8, OrderSlot)> {
        self.orders()
            .find(|(_, s)| s.order_id == order_id)
            .map(|(i, s)| (i, *s))
    }

    /// First resting order carrying `client_order_id`. Client ids of zero never match.
    pub fn find_by_client_id(&self, client_order_id: u64) -> Option<(u8, OrderSlot)> {
        if client_order_id == 0 {
            return None;
        }
        self.orders()
            .find(|(_, s)| s.client_order_id == client_order_id)
            .map(|(i, s)| (i, *s))
    }

    // ========================================================================
    // Balances
    // ========================================================================

    #[inline]
    pub fn free(&self, asset: Asset) -> u64 {
        match asset {
            Asset::Base => self.base_free,
            Asset::Quote => self.quote_free,
        }
    }

    #[inline]
    pub fn locked(&self, asset: Asset) -> u64 {
        match asset {
            Asset::Base => self.base_locked,
            Asset::Quote => self.quote_locked,
        }
    }

    /// Free plus locked
    #[inline]
    pub fn total(&self, asset: Asset) -> u64 {
        self.free(asset).saturating_add(self.locked(asset))
    }

    fn balances_mut(&mut self, asset: Asset) -> (&mut u64, &mut u64) {
        match asset {
            Asset::Base => (&mut self.base_free, &mut self.base_locked),
            Asset::Quote => (&mut self.quote_free, &mut self.quote_locked),
        }
    }

    pub fn credit_free(&mut self, asset: Asset, amount: u64) -> Result<()> {
        let (free, _) = self.balances_mut(asset);
        *free = free.add_or_violate(amount, "free balance overflow")?;
        Ok(())
    }

    /// Move `amount` from free to locked.
    pub fn lock(&mut self, asset: Asset, amount: u64) -> Result<()> {
        let (free, locked) = self.balances_mut(asset);
        let new_free = free.sub_or_violate(amount, "locking more than is free")?;
        let new_locked = locked.add_or_violate(amount, "locked balance overflow")?;
        *free = new_free;
        *locked = new_locked;
        Ok(())
    }

    /// Move `amount` from locked back to free.
    pub fn unlock(&mut self, asset: Asset, amount: u64) -> Result<()> {
        let (free, locked) = self.balances_mut(asset);
        let new_locked = locked.sub_or_violate(amount, "releasing more than is locked")?;
        let new_free = free.add_or_violate(amount, "free balance overflow")?;
        *free = new_free;
        *locked = new_locked;
        Ok(())
    }

    /// Remove locked funds that left the record through a fill.
    pub fn debit_locked(&mut self, asset: Asset, amount: u64) -> Result<()> {
        let (_, locked) = self.balances_mut(asset);
        *locked = locked.sub_or_violate(amount, "filling more than is locked")?;
        Ok(())
    }

    /// Zero both free balances, returning (base, quote).
    pub fn take_free(&mut self) -> (u64, u64) {
        let out = (self.base_free, self.quote_free);
        self.base_free = 0;
        self.quote_free = 0;
        out
    }
}

impl Default for OpenOrders {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for OpenOrders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenOrders")
            .field("owner", &self.owner)
            .field("base_free", &self.base_free)
            .field("base_locked", &self.base_locked)
            .field("quote_free", &self.quote_free)
            .field("quote_locked", &self.quote_locked)
            .field("orders", &self.order_count())
            .finish()
    }
}

/// All open orders records of a market, indexed by owner.
pub struct OpenOrdersLedger {
    records: Arena<OpenOrders>,
    by_owner: FxHashMap<TraderId, OpenOrdersHandle>,
}

impl OpenOrdersLedger {
    pub fn new(capacity: u32) -> Self {
        Self {
            records: Arena::new(capacity),
            by_owner: FxHashMap::with_capacity_and_hasher(capacity as usize, Default::default()),
        }
    }

    /// Open a record for `owner`.
    pub fn init(&mut self, owner: TraderId) -> Result<OpenOrdersHandle> {
        if self.by_owner.contains_key(&owner) {
            return Err(ExchangeError::AccountExists(owner));
        }
        let handle = self
            .records
            .alloc(OpenOrders::new(owner))
            .ok_or(ExchangeError::CapacityExceeded(Capacity::OpenOrdersAccounts))?;
        self.by_owner.insert(owner, handle);
        Ok(handle)
    }

    /// Handle of the record owned by `owner`
    pub fn handle_of(&self, owner: TraderId) -> Result<OpenOrdersHandle> {
        self.by_owner
            .get(&owner)
            .copied()
            .ok_or(ExchangeError::UnknownAccount(owner))
    }

    #[inline]
    pub fn get(&self, handle: OpenOrdersHandle) -> Option<&OpenOrders> {
        self.records.try_get(handle)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: OpenOrdersHandle) -> Option<&mut OpenOrders> {
        self.records.try_get_mut(handle)
    }

    /// Record of `owner`, if opened
    pub fn by_owner(&self, owner: TraderId) -> Option<&OpenOrders> {
        self.by_owner.get(&owner).and_then(|h| self.get(*h))
    }

    /// Mutable access for apply steps, where the handle was already validated.
    pub(crate) fn record_mut(&mut self, handle: OpenOrdersHandle) -> Result<&mut OpenOrders> {
        self.records
            .try_get_mut(handle)
            .ok_or(ExchangeError::InvariantViolation("dangling open orders handle"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (OpenOrdersHandle, &OpenOrders)> + '_ {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.by_owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_owner.is_empty()
    }

    pub fn capacity(&self) -> u32 {
        self.records.capacity()
    }

    /// Sum of free + locked across all records, per asset
    pub fn totals(&self) -> (u128, u128) {
        self.iter().fold((0u128, 0u128), |(b, q), (_, r)| {
            (
                b + r.total(Asset::Base) as u128,
                q + r.total(Asset::Quote) as u128,
            )
        })
    }
}

impl std::fmt::Debug for OpenOrdersLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenOrdersLedger")
            .field("records", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
