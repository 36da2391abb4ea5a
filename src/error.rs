//! Error taxonomy for market instructions.
//!
//! Every error aborts the whole instruction. Nothing is retried inside the
//! engine; callers resubmit.

use thiserror::Error;

use crate::custody::CustodyError;
use crate::command::TraderId;

/// Which fixed-capacity region ran out of room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capacity {
    /// Order slots on one side of the book
    BookSide,
    /// Price index nodes on one side of the book
    PriceLevels,
    /// The 128 order slots of a single open orders record
    OpenOrdersSlots,
    /// Open orders records in the ledger
    OpenOrdersAccounts,
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Capacity::BookSide => "order book side",
            Capacity::PriceLevels => "price level index",
            Capacity::OpenOrdersSlots => "open orders slots",
            Capacity::OpenOrdersAccounts => "open orders ledger",
        };
        f.write_str(name)
    }
}

/// Errors returned by market instructions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("invalid order parameters: {0}")]
    InvalidOrderParameters(&'static str),

    #[error("invalid market configuration: {0}")]
    InvalidConfig(String),

    #[error("capacity exceeded: {0} is full")]
    CapacityExceeded(Capacity),

    #[error("slippage floor not met: got {base_lots} base lots / {quote_native} quote, wanted at least {min_base_lots} / {min_quote_native}")]
    SlippageNotMet {
        base_lots: u64,
        quote_native: u64,
        min_base_lots: u64,
        min_quote_native: u64,
    },

    #[error("nothing to settle")]
    NothingToSettle,

    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),

    #[error("no open orders account for trader {0}")]
    UnknownAccount(TraderId),

    #[error("open orders account already exists for trader {0}")]
    AccountExists(TraderId),

    #[error("order {0} not found")]
    OrderNotFound(u64),

    #[error("order would trade against the owner's own resting order")]
    SelfTrade,

    #[error("vault signer nonce does not derive a valid signer")]
    InvalidVaultSigner,

    #[error("custody transfer failed: {0}")]
    Custody(#[from] CustodyError),
}

pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Checked-arithmetic helpers for ledger state. Overflow or underflow on
/// state the engine already accepted means the books are inconsistent.
pub(crate) trait CheckedState: Sized {
    fn add_or_violate(self, rhs: Self, what: &'static str) -> Result<Self>;
    fn sub_or_violate(self, rhs: Self, what: &'static str) -> Result<Self>;
}

impl CheckedState for u64 {
    #[inline]
    fn add_or_violate(self, rhs: u64, what: &'static str) -> Result<u64> {
        self.checked_add(rhs).ok_or(ExchangeError::InvariantViolation(what))
    }

    #[inline]
    fn sub_or_violate(self, rhs: u64, what: &'static str) -> Result<u64> {
        self.checked_sub(rhs).ok_or(ExchangeError::InvariantViolation(what))
    }
}
