//! Event Queue - bounded ring of fills and removals awaiting the crank.
//!
//! Every pushed event gets the next market-wide event sequence number. When
//! the ring is full the oldest entry is overwritten and handed back to the
//! caller. The consumer keeps a cursor (the next sequence it expects), so a
//! wrap that outran it shows up as a discontinuity instead of silent loss.

use serde::Serialize;
use thiserror::Error;

use crate::command::{OpenOrdersHandle, Side, TraderId};

/// A trade against a resting order.
///
/// Native amounts are after fees: `native_qty_paid` includes a taker fee,
/// `native_qty_received` includes a maker rebate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FillEvent {
    /// Side of the order this event belongs to
    pub side: Side,
    pub maker: bool,
    pub owner_slot: OpenOrdersHandle,
    pub owner: TraderId,
    pub order_id: u64,
    pub client_order_id: u64,
    /// Execution price (always the maker's)
    pub price: u64,
    pub base_lots: u64,
    pub native_qty_paid: u64,
    pub native_qty_received: u64,
    /// Fee charged (taker) or rebate paid (maker), native quote
    pub native_fee_or_rebate: u64,
}

/// An order left the book, or a remainder never made it there.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OutEvent {
    pub side: Side,
    pub owner_slot: OpenOrdersHandle,
    pub owner: TraderId,
    pub order_id: u64,
    pub client_order_id: u64,
    pub released_base_lots: u64,
    /// Native amount that moves from locked to free.
    ///
    /// For a dropped remainder (`release_funds == false`) this is the whole
    /// unused deposit of the instruction: the dropped lots at the limit
    /// price plus any unused fee buffer and price improvement.
    pub native_qty_released: u64,
    /// When false the funds were already released in the instruction
    pub release_funds: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    Fill(FillEvent),
    Out(OutEvent),
}

impl Event {
    /// Open orders handle the event is addressed to
    #[inline]
    pub fn owner_slot(&self) -> OpenOrdersHandle {
        match self {
            Event::Fill(f) => f.owner_slot,
            Event::Out(o) => o.owner_slot,
        }
    }

    #[inline]
    pub fn owner(&self) -> TraderId {
        match self {
            Event::Fill(f) => f.owner,
            Event::Out(o) => o.owner,
        }
    }

    #[inline]
    pub fn order_id(&self) -> u64 {
        match self {
            Event::Fill(f) => f.order_id,
            Event::Out(o) => o.order_id,
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Event::Out(OutEvent::default())
    }
}

/// An event with its position in the market's event stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueuedEvent {
    pub seq: u64,
    pub event: Event,
}

/// Requested history is no longer retained.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("event {requested} was overwritten; oldest retained is {first_retained}")]
pub struct EventGap {
    pub requested: u64,
    pub first_retained: u64,
    /// Number of events that can never be read
    pub lost: u64,
}

/// Fixed-capacity overwriting ring buffer
pub struct EventQueue {
    slots: Vec<QueuedEvent>,
    /// Ring position of the oldest retained event
    head: usize,
    len: usize,
    /// Sequence number of the next pushed event
    next_seq: u64,
    /// Next sequence number the consumer expects
    cursor: u64,
}

impl EventQueue {
    /// Create a ring holding `capacity` events.
    ///
    /// # Panics
    /// Panics on zero capacity.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity > 0, "event queue needs at least one slot");
        Self {
            slots: vec![QueuedEvent::default(); capacity as usize],
            head: 0,
            len: 0,
            next_seq: 0,
            cursor: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Sequence number the next push will receive
    #[inline]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Next sequence number the consumer expects
    #[inline]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Sequence number of the oldest retained event (or `next_seq` when empty)
    #[inline]
    pub fn first_retained(&self) -> u64 {
        self.next_seq - self.len as u64
    }

    /// Append an event. If the ring is full the oldest event is overwritten
    /// and returned.
    pub fn push(&mut self, event: Event) -> (u64, Option<QueuedEvent>) {
        let seq = self.next_seq;
        let capacity = self.slots.len();
        let queued = QueuedEvent { seq, event };

        let lost = if self.len == capacity {
            let old = std::mem::replace(&mut self.slots[self.head], queued);
            self.head = (self.head + 1) % capacity;
            Some(old)
        } else {
            let tail = (self.head + self.len) % capacity;
            self.slots[tail] = queued;
            self.len += 1;
            None
        };

        self.next_seq += 1;
        (seq, lost)
    }

    #[inline]
    pub fn front(&self) -> Option<&QueuedEvent> {
        (self.len > 0).then(|| &self.slots[self.head])
    }

    /// Dequeue the oldest event and advance the consumer cursor past it.
    pub fn pop_front(&mut self) -> Option<QueuedEvent> {
        if self.len == 0 {
            return None;
        }
        let event = self.slots[self.head];
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        self.cursor = event.seq + 1;
        Some(event)
    }

    /// Discontinuity between the consumer cursor and the oldest retained
    /// event, if any. Does not move the cursor.
    pub fn gap(&self) -> Option<EventGap> {
        let first = self.first_retained();
        (self.cursor < first).then(|| EventGap {
            requested: self.cursor,
            first_retained: first,
            lost: first - self.cursor,
        })
    }

    /// Report and skip the current gap.
    pub fn take_gap(&mut self) -> Option<EventGap> {
        let gap = self.gap()?;
        self.cursor = gap.first_retained;
        Some(gap)
    }

    /// Retained events, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &QueuedEvent> + '_ {
        let capacity = self.slots.len();
        (0..self.len).map(move |i| &self.slots[(self.head + i) % capacity])
    }

    /// Non-consuming read of every retained event with `seq >= from`.
    pub fn events_since(
        &self,
        from: u64,
    ) -> Result<impl Iterator<Item = &QueuedEvent> + '_, EventGap> {
        let first = self.first_retained();
        if from < first {
            return Err(EventGap {
                requested: from,
                first_retained: first,
                lost: first - from,
            });
        }
        Ok(self.iter().filter(move |e| e.seq >= from))
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.len)
            .field("capacity", &self.slots.len())
            .field("next_seq", &self.next_seq)
            .field("cursor", &self.cursor)
            .finish()
    }
}
