//! Replay rows - CSV instruction logs converted to engine commands.
//!
//! Prices and sizes are human decimals; a `Scaling` turns them into
//! integer price lots and base lots.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::command::{Command, NewOrder, OrderType, SelfTradeBehavior, Side, TakeOrder, TraderId};
use crate::custody::Asset;

/// Matching iterations allowed per replayed order
const DEFAULT_LIMIT: u16 = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("{action:?} row is missing `{field}`")]
    MissingField { action: Action, field: &'static str },

    #[error("{0} is not a whole number of lots after scaling")]
    Fractional(Decimal),

    #[error("{0} is out of range after scaling")]
    OutOfRange(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Open an open orders record
    Init,
    /// Mint into a trader's external account
    Fund,
    Place,
    Cancel,
    CancelClient,
    /// Consume events for every known record
    Crank,
    Settle,
    Take,
    Sweep,
}

/// One line of a replay file
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRow {
    pub action: Action,
    #[serde(default)]
    pub owner: TraderId,
    pub side: Option<Side>,
    pub asset: Option<Asset>,
    pub price: Option<Decimal>,
    pub size: Option<Decimal>,
    /// Slippage floor for takes, in base units
    pub min_size: Option<Decimal>,
    pub order_type: Option<OrderType>,
    pub self_trade: Option<SelfTradeBehavior>,
    pub client_id: Option<u64>,
    pub order_id: Option<u64>,
    pub limit: Option<u16>,
    pub expires: Option<DateTime<Utc>>,
    /// Instruction time; rows without one keep the previous time
    pub timestamp: Option<DateTime<Utc>>,
}

/// Decimal to integer conversion factors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scaling {
    /// Price lots per quoted price unit
    pub price_mult: u64,
    /// Base lots per quoted size unit
    pub size_mult: u64,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            price_mult: 1,
            size_mult: 1,
        }
    }
}

impl Scaling {
    pub fn price(&self, value: Decimal) -> Result<u64, ReplayError> {
        scale(value, self.price_mult)
    }

    pub fn size(&self, value: Decimal) -> Result<u64, ReplayError> {
        scale(value, self.size_mult)
    }
}

fn scale(value: Decimal, mult: u64) -> Result<u64, ReplayError> {
    let scaled = value
        .checked_mul(Decimal::from(mult))
        .ok_or(ReplayError::OutOfRange(value))?;
    if scaled.fract() != Decimal::ZERO {
        return Err(ReplayError::Fractional(value));
    }
    scaled.to_u64().ok_or(ReplayError::OutOfRange(value))
}

/// What a row asks the replay driver to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayStep {
    Fund {
        owner: TraderId,
        asset: Asset,
        amount: u64,
    },
    Execute(Command),
    CrankAll { limit: u16 },
}

impl ReplayRow {
    /// Convert to a typed step. Funding amounts are native units and are
    /// not scaled.
    pub fn to_step(&self, scaling: &Scaling) -> Result<ReplayStep, ReplayError> {
        let owner = self.owner;
        let step = match self.action {
            Action::Init => ReplayStep::Execute(Command::InitOpenOrders { owner }),
            Action::Fund => ReplayStep::Fund {
                owner,
                asset: self.require(self.asset, "asset")?,
                amount: scale(self.require(self.size, "size")?, 1)?,
            },
            Action::Place => {
                let mut order = NewOrder::limit(
                    self.require(self.side, "side")?,
                    scaling.price(self.require(self.price, "price")?)?,
                    scaling.size(self.require(self.size, "size")?)?,
                )
                .with_type(self.order_type.unwrap_or_default())
                .with_self_trade(self.self_trade.unwrap_or_default())
                .with_limit(self.limit.unwrap_or(DEFAULT_LIMIT));
                if let Some(cid) = self.client_id {
                    order = order.with_client_id(cid);
                }
                if let Some(expires) = self.expires {
                    order = order.with_max_ts(expires.timestamp());
                }
                ReplayStep::Execute(Command::Place { owner, order })
            }
            Action::Cancel => ReplayStep::Execute(Command::Cancel {
                owner,
                order_id: self.require(self.order_id, "order_id")?,
            }),
            Action::CancelClient => ReplayStep::Execute(Command::CancelByClientId {
                owner,
                client_order_id: self.require(self.client_id, "client_id")?,
            }),
            Action::Crank => ReplayStep::CrankAll {
                limit: self.limit.unwrap_or(u16::MAX),
            },
            Action::Settle => ReplayStep::Execute(Command::Settle { owner }),
            Action::Take => {
                let min_base_qty = match self.min_size {
                    Some(m) => scaling.size(m)?,
                    None => 0,
                };
                ReplayStep::Execute(Command::Take {
                    taker: owner,
                    order: TakeOrder {
                        side: self.require(self.side, "side")?,
                        limit_price: scaling.price(self.require(self.price, "price")?)?,
                        max_base_qty: scaling.size(self.require(self.size, "size")?)?,
                        max_quote_qty: u64::MAX,
                        min_base_qty,
                        min_quote_qty: 0,
                        limit: self.limit.unwrap_or(DEFAULT_LIMIT),
                    },
                })
            }
            Action::Sweep => ReplayStep::Execute(Command::SweepFees { recipient: owner }),
        };
        Ok(step)
    }

    fn require<T>(&self, value: Option<T>, field: &'static str) -> Result<T, ReplayError> {
        value.ok_or(ReplayError::MissingField {
            action: self.action,
            field,
        })
    }
}
