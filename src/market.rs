//! Market - the explicit context object holding one market's state.
//!
//! A `Market` owns both book sides, the open orders ledger, the event queue
//! and the vault totals. Instructions borrow it mutably one at a time; the
//! matching, take, crank and settlement modules add their operations as
//! `impl Market` blocks.

use serde::Serialize;
use tracing::{info, warn};

use crate::command::{OpenOrdersHandle, Side, TraderId};
use crate::config::MarketConfig;
use crate::custody::{Asset, MarketId, ProgramId, VaultSigner};
use crate::error::{CheckedState, ExchangeError, Result};
use crate::event_queue::{Event, EventQueue, FillEvent, QueuedEvent};
use crate::open_orders::OpenOrdersLedger;
use crate::order_book::OrderBook;

/// Arguments of `Market::initialize`
#[derive(Clone, Copy, Debug)]
pub struct MarketParams {
    pub market_id: MarketId,
    pub program_id: ProgramId,
    /// Nonce of the vault signer; must derive a valid signer
    pub vault_signer_nonce: u64,
    pub config: MarketConfig,
}

impl MarketParams {
    /// Parameters with the signer nonce found by search
    pub fn find_signer(
        market_id: MarketId,
        program_id: ProgramId,
        config: MarketConfig,
    ) -> Result<Self> {
        let signer = VaultSigner::find(market_id, program_id)?;
        Ok(Self {
            market_id,
            program_id,
            vault_signer_nonce: signer.nonce,
            config,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MarketFlags {
    pub initialized: bool,
    /// Cleared to stop new orders; cancels, cranks and settles still run
    pub accepting_orders: bool,
}

/// Native token amounts the market accounts for.
///
/// `*_deposits_total` mirror what the vaults physically hold. The other
/// fields are the parts of it no open orders record claims.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VaultTotals {
    pub base_deposits_total: u64,
    pub quote_deposits_total: u64,
    pub quote_fees_accrued: u64,
    /// Maker credits whose fill events were overwritten before consumption
    pub orphaned_base: u64,
    pub orphaned_quote: u64,
}

impl VaultTotals {
    pub(crate) fn deposit(&mut self, asset: Asset, amount: u64) -> Result<()> {
        let total = self.total_mut(asset);
        *total = total.add_or_violate(amount, "vault total overflow")?;
        Ok(())
    }

    pub(crate) fn withdraw(&mut self, asset: Asset, amount: u64) -> Result<()> {
        let total = self.total_mut(asset);
        *total = total.sub_or_violate(amount, "vault total underflow")?;
        Ok(())
    }

    fn total_mut(&mut self, asset: Asset) -> &mut u64 {
        match asset {
            Asset::Base => &mut self.base_deposits_total,
            Asset::Quote => &mut self.quote_deposits_total,
        }
    }
}

/// Read-only view of a market
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarketSnapshot {
    pub market_id: String,
    pub vault_signer_nonce: u64,
    pub flags: MarketFlags,
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
    pub taker_fee_bps: u16,
    pub maker_rebate_bps: u16,
    pub quote_dust_threshold: u64,
    pub best_bid: Option<u64>,
    pub best_ask: Option<u64>,
    pub bid_orders: usize,
    pub ask_orders: usize,
    pub open_orders_accounts: usize,
    pub vault: VaultTotals,
    pub pending_events: usize,
    pub next_order_id: u64,
    pub next_event_seq: u64,
}

/// One market's complete state.
pub struct Market {
    pub(crate) id: MarketId,
    pub(crate) flags: MarketFlags,
    pub(crate) config: MarketConfig,
    pub(crate) signer: VaultSigner,
    pub(crate) book: OrderBook,
    pub(crate) ledger: OpenOrdersLedger,
    pub(crate) events: EventQueue,
    pub(crate) vault: VaultTotals,
    /// Next order id
    pub(crate) seq_num: u64,
}

impl Market {
    /// Create a market with all capacities allocated up front.
    pub fn initialize(params: MarketParams) -> Result<Self> {
        params.config.validate()?;
        let signer = VaultSigner::derive(
            params.market_id,
            params.program_id,
            params.vault_signer_nonce,
        )?;

        let caps = params.config.capacities;
        info!(
            market = %params.market_id,
            base_lot_size = params.config.base_lot_size,
            quote_lot_size = params.config.quote_lot_size,
            taker_fee_bps = params.config.fees.taker_fee_bps,
            orders_per_side = caps.orders_per_side,
            event_queue = caps.event_queue,
            "market initialized"
        );

        Ok(Self {
            id: params.market_id,
            flags: MarketFlags {
                initialized: true,
                accepting_orders: true,
            },
            config: params.config,
            signer,
            book: OrderBook::new(caps.orders_per_side),
            ledger: OpenOrdersLedger::new(caps.open_orders_accounts),
            events: EventQueue::new(caps.event_queue),
            vault: VaultTotals::default(),
            seq_num: 1,
        })
    }

    /// Explicit account-open step for a trader.
    pub fn init_open_orders(&mut self, owner: TraderId) -> Result<OpenOrdersHandle> {
        let handle = self.ledger.init(owner)?;
        info!(owner, handle, "open orders initialized");
        Ok(handle)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn id(&self) -> MarketId {
        self.id
    }

    #[inline]
    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    #[inline]
    pub fn flags(&self) -> MarketFlags {
        self.flags
    }

    pub fn set_accepting_orders(&mut self, accepting: bool) {
        self.flags.accepting_orders = accepting;
    }

    #[inline]
    pub fn vault_signer(&self) -> &VaultSigner {
        &self.signer
    }

    #[inline]
    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    #[inline]
    pub fn ledger(&self) -> &OpenOrdersLedger {
        &self.ledger
    }

    #[inline]
    pub fn event_queue(&self) -> &EventQueue {
        &self.events
    }

    #[inline]
    pub fn vault(&self) -> &VaultTotals {
        &self.vault
    }

    #[inline]
    pub fn best_bid(&self) -> Option<u64> {
        self.book.best_bid()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<u64> {
        self.book.best_ask()
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            market_id: self.id.to_string(),
            vault_signer_nonce: self.signer.nonce,
            flags: self.flags,
            base_lot_size: self.config.base_lot_size,
            quote_lot_size: self.config.quote_lot_size,
            taker_fee_bps: self.config.fees.taker_fee_bps,
            maker_rebate_bps: self.config.fees.maker_rebate_bps,
            quote_dust_threshold: self.config.quote_dust_threshold,
            best_bid: self.book.best_bid(),
            best_ask: self.book.best_ask(),
            bid_orders: self.book.bids.len(),
            ask_orders: self.book.asks.len(),
            open_orders_accounts: self.ledger.len(),
            vault: self.vault,
            pending_events: self.events.len(),
            next_order_id: self.seq_num,
            next_event_seq: self.events.next_seq(),
        }
    }

    // ========================================================================
    // Native amount helpers
    // ========================================================================

    /// Native base for `lots`
    #[inline]
    pub(crate) fn base_native(&self, lots: u64) -> Option<u64> {
        lots.checked_mul(self.config.base_lot_size)
    }

    /// Native quote for `lots` at `price`
    #[inline]
    pub(crate) fn quote_native(&self, price: u64, lots: u64) -> Option<u64> {
        let n = price as u128 * lots as u128 * self.config.quote_lot_size as u128;
        u64::try_from(n).ok()
    }

    /// What a resting order of `lots` at `price` keeps locked
    pub(crate) fn locked_native(&self, side: Side, price: u64, lots: u64) -> Option<u64> {
        match side {
            Side::Bid => self.quote_native(price, lots),
            Side::Ask => self.base_native(lots),
        }
    }

    /// Asset a side locks while resting
    #[inline]
    pub(crate) fn locked_asset(side: Side) -> Asset {
        match side {
            Side::Bid => Asset::Quote,
            Side::Ask => Asset::Base,
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Queue an event, accounting for whatever the ring overwrites.
    pub(crate) fn push_event(&mut self, event: Event) -> Result<u64> {
        let (seq, lost) = self.events.push(event);
        if let Some(lost) = lost {
            self.orphan(lost)?;
        }
        Ok(seq)
    }

    /// An unconsumed event fell off the ring; park what it would have credited.
    fn orphan(&mut self, lost: QueuedEvent) -> Result<()> {
        warn!(
            seq = lost.seq,
            owner = lost.event.owner(),
            order_id = lost.event.order_id(),
            "event queue overwrote an unconsumed event"
        );
        match lost.event {
            Event::Fill(fill) if fill.maker => {
                let (base, quote) = maker_credit(&fill);
                self.vault.orphaned_base = self
                    .vault
                    .orphaned_base
                    .add_or_violate(base, "orphaned base overflow")?;
                self.vault.orphaned_quote = self
                    .vault
                    .orphaned_quote
                    .add_or_violate(quote, "orphaned quote overflow")?;
            }
            Event::Out(out) if out.release_funds => {
                let asset = Self::locked_asset(out.side);
                self.ledger
                    .record_mut(out.owner_slot)?
                    .debit_locked(asset, out.native_qty_released)?;
                let orphaned = match asset {
                    Asset::Base => &mut self.vault.orphaned_base,
                    Asset::Quote => &mut self.vault.orphaned_quote,
                };
                *orphaned = orphaned.add_or_violate(out.native_qty_released, "orphaned overflow")?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Native (base, quote) owed to makers by queued, unconsumed fills
    pub fn pending_maker_credits(&self) -> (u128, u128) {
        self.events
            .iter()
            .fold((0u128, 0u128), |(b, q), e| match &e.event {
                Event::Fill(fill) if fill.maker => {
                    let (base, quote) = maker_credit(fill);
                    (b + base as u128, q + quote as u128)
                }
                _ => (b, q),
            })
    }

    /// Compute a hash of the current state (for determinism testing)
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();

        for side in [&self.book.bids, &self.book.asks] {
            for (handle, order) in side.iter() {
                handle.hash(&mut hasher);
                order.seq.hash(&mut hasher);
                order.price.hash(&mut hasher);
                order.qty.hash(&mut hasher);
                order.owner.hash(&mut hasher);
            }
        }
        for (handle, record) in self.ledger.iter() {
            handle.hash(&mut hasher);
            record.owner.hash(&mut hasher);
            record.base_free.hash(&mut hasher);
            record.base_locked.hash(&mut hasher);
            record.quote_free.hash(&mut hasher);
            record.quote_locked.hash(&mut hasher);
        }
        for event in self.events.iter() {
            event.seq.hash(&mut hasher);
            event.event.owner_slot().hash(&mut hasher);
            event.event.order_id().hash(&mut hasher);
        }
        self.seq_num.hash(&mut hasher);
        self.vault.base_deposits_total.hash(&mut hasher);
        self.vault.quote_deposits_total.hash(&mut hasher);
        self.vault.quote_fees_accrued.hash(&mut hasher);

        hasher.finish()
    }

    pub fn warm_up(&mut self) {
        self.book.warm_up();
    }
}

/// Native (base, quote) a maker fill credits on consumption
pub(crate) fn maker_credit(fill: &FillEvent) -> (u64, u64) {
    match fill.side {
        // Bid maker receives base, rebate comes in quote
        Side::Bid => (fill.native_qty_received, fill.native_fee_or_rebate),
        // Ask maker's proceeds already include the rebate
        Side::Ask => (0, fill.native_qty_received),
    }
}

impl std::fmt::Debug for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Market")
            .field("id", &self.id)
            .field("book", &self.book)
            .field("ledger", &self.ledger)
            .field("events", &self.events)
            .field("vault", &self.vault)
            .finish()
    }
}
