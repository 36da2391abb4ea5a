//! # Crank-LOB
//!
//! A deterministic central limit order book with crank-driven settlement and
//! pooled vault custody.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: One thread owns a market exclusively (no locks)
//! - **Fixed Capacity**: Every region is sized at market creation and never grows
//! - **Plan, then Apply**: An instruction either completes or leaves no trace
//! - **Deferred Maker Settlement**: Makers are credited when the crank consumes their fills
//!
//! ## Architecture
//!
//! ```text
//! [Submitter] --> [SPSC Ring Buffer] --> [Engine Thread (Pinned)] --> [Results]
//!                                               |
//!                          +--------------------+--------------------+
//!                          |                    |                    |
//!                    [Order Book]      [Open Orders Ledger]    [Event Queue]
//!                                               |                    |
//!                                         [settle_funds] <--- [consume_events]
//!                                               |
//!                                          [Custody]
//! ```

pub mod arena;
pub mod book_side;
pub mod command;
pub mod config;
pub mod crank;
pub mod custody;
pub mod engine;
pub mod error;
pub mod event_queue;
pub mod fees;
pub mod logging;
pub mod market;
pub mod matching;
pub mod open_orders;
pub mod order_book;
pub mod price_index;
pub mod price_level;
pub mod replay;
pub mod settlement;
pub mod take;

#[cfg(test)]
mod test_util;

// Re-exports for convenience
pub use arena::{Arena, ArenaIndex, OrderNode, NULL_INDEX};
pub use book_side::BookSide;
pub use command::{
    Command, NewOrder, OpenOrdersHandle, OrderType, SelfTradeBehavior, Side, TakeOrder, TraderId,
};
pub use config::{Capacities, ConfigError, EngineConfig, MarketConfig};
pub use crank::ConsumeReport;
pub use custody::{Address, Asset, Custody, CustodyError, MemoryCustody, Transfer, VaultSigner};
pub use engine::{Engine, Outcome};
pub use error::{Capacity, ExchangeError, Result};
pub use event_queue::{Event, EventGap, EventQueue, FillEvent, OutEvent, QueuedEvent};
pub use fees::FeeSchedule;
pub use logging::{init_logging, LogFormat};
pub use market::{Market, MarketFlags, MarketParams, MarketSnapshot, VaultTotals};
pub use matching::{CancelOutcome, PlaceOutcome};
pub use open_orders::{OpenOrders, OpenOrdersLedger, OrderSlot, MAX_OPEN_ORDERS};
pub use order_book::OrderBook;
pub use price_index::PriceIndex;
pub use price_level::PriceLevel;
pub use replay::{ReplayError, ReplayRow, ReplayStep, Scaling};
pub use settlement::SettleOutcome;
pub use take::TakeOutcome;
