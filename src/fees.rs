//! Fee schedule: taker fee and maker rebate in basis points of trade notional.
//!
//! All amounts are native quote and every computation floors, so the sum of
//! per-trade fees never exceeds the fee on the summed notional.

use serde::{Deserialize, Serialize};

use crate::error::{ExchangeError, Result};

const BPS: u128 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub taker_fee_bps: u16,
    pub maker_rebate_bps: u16,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            taker_fee_bps: 22,
            maker_rebate_bps: 3,
        }
    }
}

impl FeeSchedule {
    /// A schedule that charges nothing
    pub const ZERO: FeeSchedule = FeeSchedule {
        taker_fee_bps: 0,
        maker_rebate_bps: 0,
    };

    /// Rebates are paid out of taker fees, so they can never exceed them.
    pub fn validate(&self) -> Result<()> {
        if self.taker_fee_bps as u128 >= BPS {
            return Err(ExchangeError::InvalidConfig(format!(
                "taker fee of {} bps is not below 100%",
                self.taker_fee_bps
            )));
        }
        if self.maker_rebate_bps > self.taker_fee_bps {
            return Err(ExchangeError::InvalidConfig(format!(
                "maker rebate {} bps exceeds taker fee {} bps",
                self.maker_rebate_bps, self.taker_fee_bps
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn taker_fee(&self, notional: u64) -> u64 {
        scale(notional, self.taker_fee_bps)
    }

    #[inline]
    pub fn maker_rebate(&self, notional: u64) -> u64 {
        scale(notional, self.maker_rebate_bps)
    }

    /// Notional plus taker fee, `None` on overflow
    #[inline]
    pub fn with_taker_fee(&self, notional: u64) -> Option<u64> {
        notional.checked_add(self.taker_fee(notional))
    }

    /// Most lots of `lot_notional` each whose cost including the taker fee
    /// fits inside `budget`.
    pub fn max_lots_within(&self, budget: u64, lot_notional: u64) -> u64 {
        if lot_notional == 0 {
            return 0;
        }
        let cost = |lots: u64| -> Option<u64> {
            lots.checked_mul(lot_notional)
                .and_then(|n| self.with_taker_fee(n))
        };

        // Lower bound ignoring the floor, then walk up over rounding slack
        let denom = lot_notional as u128 * (BPS + self.taker_fee_bps as u128);
        let mut lots = ((budget as u128 * BPS) / denom) as u64;
        while let Some(next) = lots.checked_add(1) {
            if !cost(next).is_some_and(|c| c <= budget) {
                break;
            }
            lots = next;
        }
        lots
    }
}

#[inline]
fn scale(notional: u64, bps: u16) -> u64 {
    // bps < 10_000, so the result always fits back in u64
    ((notional as u128 * bps as u128) / BPS) as u64
}
