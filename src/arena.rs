//! Arena Allocator - O(1) slab allocator over a fixed, pre-allocated block.
//!
//! Every fixed-capacity region of a market (order nodes, price index nodes,
//! open orders records) lives in an `Arena`. Capacity is decided once at
//! market creation; nothing grows afterwards. Freed slots are recycled
//! through a free list, and handles are plain `u32` indices.

use std::fmt;

use crate::command::TraderId;

/// Sentinel value representing a null/invalid index (like nullptr)
pub const NULL_INDEX: u32 = u32::MAX;

/// Link value marking a slot as allocated.
const LIVE: u32 = u32::MAX - 1;

/// Type alias for arena indices - our "compressed pointers"
pub type ArenaIndex = u32;

/// A resting order - exactly 64 bytes (one cache line).
///
/// # Memory Layout
///
/// | Field           | Type    | Offset | Size |
/// |-----------------|---------|--------|------|
/// | price           | u64     | 0      | 8    |
/// | qty             | u64     | 8      | 8    |
/// | seq             | u64     | 16     | 8    |
/// | client_order_id | u64     | 24     | 8    |
/// | owner           | u64     | 32     | 8    |
/// | max_ts          | i64     | 40     | 8    |
/// | owner_slot      | u32     | 48     | 4    |
/// | next            | u32     | 52     | 4    |
/// | prev            | u32     | 56     | 4    |
/// | record_slot     | u8      | 60     | 1    |
/// | _reserved       | [u8;3]  | 61     | 3    |
/// | **Total**       |         |        | 64   |
#[repr(C)]
#[repr(align(64))]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OrderNode {
    // === Hot Data (frequently accessed during matching) ===
    /// Limit price in quote lots per base lot
    pub price: u64,

    /// Remaining quantity in base lots
    pub qty: u64,

    /// Market-wide sequence number; doubles as the order id
    pub seq: u64,

    /// Opaque tag chosen by the owner
    pub client_order_id: u64,

    /// Trader that placed the order
    pub owner: TraderId,

    /// Expiry timestamp (seconds); `i64::MAX` never expires
    pub max_ts: i64,

    /// Handle of the owner's open orders record
    pub owner_slot: ArenaIndex,

    // === Linkage (FIFO queue pointers within a PriceLevel) ===
    /// Index of next order at same price level
    pub next: ArenaIndex,

    /// Index of previous order (enables O(1) cancel)
    pub prev: ArenaIndex,

    /// Position of this order inside the owner's record
    pub record_slot: u8,

    pub _reserved: [u8; 3],
}

// Compile-time assertion: OrderNode must be exactly 64 bytes
const _: () = assert!(
    std::mem::size_of::<OrderNode>() == 64,
    "OrderNode must be exactly 64 bytes (one cache line)"
);

// Compile-time assertion: OrderNode must be 64-byte aligned
const _: () = assert!(
    std::mem::align_of::<OrderNode>() == 64,
    "OrderNode must be 64-byte aligned"
);

impl OrderNode {
    /// Create a new unlinked order node
    #[inline]
    pub fn new(seq: u64, owner: TraderId, price: u64, qty: u64) -> Self {
        Self {
            price,
            qty,
            seq,
            owner,
            ..Self::empty()
        }
    }

    /// Create an empty/uninitialized node
    #[inline]
    pub const fn empty() -> Self {
        Self {
            price: 0,
            qty: 0,
            seq: 0,
            client_order_id: 0,
            owner: 0,
            max_ts: i64::MAX,
            owner_slot: NULL_INDEX,
            next: NULL_INDEX,
            prev: NULL_INDEX,
            record_slot: 0,
            _reserved: [0u8; 3],
        }
    }

    /// Returns true once `now` is past the order's expiry
    #[inline]
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.max_ts
    }
}

impl Default for OrderNode {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for OrderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderNode")
            .field("seq", &self.seq)
            .field("owner", &self.owner)
            .field("price", &self.price)
            .field("qty", &self.qty)
            .field("client_order_id", &self.client_order_id)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish()
    }
}

/// Pre-allocated memory pool with O(1) allocation and deallocation.
///
/// The free list is threaded through a side table of links so that `T` needs
/// no intrusive field. A slot whose link equals the `LIVE` marker is allocated.
pub struct Arena<T> {
    /// Contiguous block of pre-allocated nodes
    nodes: Vec<T>,

    /// Free-list links, or `LIVE` for allocated slots
    links: Vec<ArenaIndex>,

    /// Head of the free list (index of first available node)
    free_head: ArenaIndex,

    /// Number of currently allocated nodes
    allocated_count: u32,

    /// Total capacity
    capacity: u32,
}

impl<T: Copy + Default> Arena<T> {
    /// Create a new arena with the specified capacity.
    ///
    /// # Panics
    /// Panics if capacity collides with the reserved sentinel values.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity < LIVE, "Capacity must be less than the reserved sentinels");

        let nodes = vec![T::default(); capacity as usize];

        // Each free slot points to the following one
        let mut links: Vec<ArenaIndex> = (1..=capacity).collect();
        if let Some(last) = links.last_mut() {
            *last = NULL_INDEX;
        }

        Self {
            nodes,
            links,
            free_head: if capacity > 0 { 0 } else { NULL_INDEX },
            allocated_count: 0,
            capacity,
        }
    }

    /// Allocate a slot and move `value` into it.
    ///
    /// Returns `None` if the arena is full.
    #[inline]
    pub fn alloc(&mut self, value: T) -> Option<ArenaIndex> {
        if self.free_head == NULL_INDEX {
            return None;
        }

        let index = self.free_head;
        self.free_head = self.links[index as usize];
        self.links[index as usize] = LIVE;
        self.nodes[index as usize] = value;
        self.allocated_count += 1;

        Some(index)
    }

    /// Return a slot to the free list, handing back its last value.
    #[inline]
    pub fn free(&mut self, index: ArenaIndex) -> T {
        debug_assert!(self.is_live(index), "Double free or bad index");

        let value = std::mem::take(&mut self.nodes[index as usize]);
        self.links[index as usize] = self.free_head;
        self.free_head = index;
        self.allocated_count -= 1;
        value
    }

    /// Get an immutable reference to a live node.
    ///
    /// Internal links always point at live slots; handles that arrive from
    /// outside go through [`Arena::try_get`].
    #[inline]
    pub fn get(&self, index: ArenaIndex) -> &T {
        debug_assert!(self.is_live(index), "Dangling index {index}");
        &self.nodes[index as usize]
    }

    /// Get a mutable reference to a live node.
    #[inline]
    pub fn get_mut(&mut self, index: ArenaIndex) -> &mut T {
        debug_assert!(self.is_live(index), "Dangling index {index}");
        &mut self.nodes[index as usize]
    }

    /// Checked lookup for handles of unknown provenance.
    #[inline]
    pub fn try_get(&self, index: ArenaIndex) -> Option<&T> {
        self.is_live(index).then(|| &self.nodes[index as usize])
    }

    /// Checked mutable lookup for handles of unknown provenance.
    #[inline]
    pub fn try_get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        if self.is_live(index) {
            Some(&mut self.nodes[index as usize])
        } else {
            None
        }
    }

    /// Returns true if `index` refers to an allocated slot.
    #[inline]
    pub fn is_live(&self, index: ArenaIndex) -> bool {
        index < self.capacity && self.links[index as usize] == LIVE
    }

    /// Returns the number of currently allocated nodes.
    #[inline]
    pub fn allocated(&self) -> u32 {
        self.allocated_count
    }

    /// Returns the number of free slots.
    #[inline]
    pub fn available(&self) -> u32 {
        self.capacity - self.allocated_count
    }

    /// Returns the total capacity of the arena.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns true if the arena is empty (no allocated nodes).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocated_count == 0
    }

    /// Returns true if the arena is full (no free nodes).
    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_head == NULL_INDEX
    }

    /// Iterate over all live slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> + '_ {
        self.nodes
            .iter()
            .zip(self.links.iter())
            .enumerate()
            .filter(|(_, (_, link))| **link == LIVE)
            .map(|(i, (node, _))| (i as ArenaIndex, node))
    }

    /// Pre-fault all memory pages (warm-up routine).
    ///
    /// Touches every node so the OS maps the pages before the hot path runs.
    pub fn warm_up(&mut self) {
        for node in &mut self.nodes {
            *node = std::hint::black_box(*node);
        }
    }
}

impl<T> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated_count)
            .field("free_head", &self.free_head)
            .finish()
    }
}
