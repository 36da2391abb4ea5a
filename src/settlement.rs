//! Settlement - paying free balances and fees out of the vaults, and the
//! conservation check tying vault totals to the ledger.

use tracing::info;

use crate::command::TraderId;
use crate::custody::{Asset, Custody, Transfer};
use crate::error::{CheckedState, ExchangeError, Result};
use crate::market::Market;

/// Native amounts paid out by `settle_funds`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SettleOutcome {
    pub base: u64,
    pub quote: u64,
}

impl Market {
    /// Withdraw the owner's free balances to its external accounts.
    ///
    /// Locked funds stay behind. Both payouts go out as one custody batch,
    /// and balances are zeroed only once it succeeds.
    pub fn settle_funds<C: Custody>(
        &mut self,
        custody: &mut C,
        owner: TraderId,
    ) -> Result<SettleOutcome> {
        let handle = self.ledger.handle_of(owner)?;
        let record = self.ledger.record_mut(handle)?;
        let (base, quote) = (record.base_free, record.quote_free);
        if base == 0 && quote == 0 {
            return Err(ExchangeError::NothingToSettle);
        }

        custody.transfer_all(
            &self.signer,
            &[
                Transfer::Withdraw { to: owner, asset: Asset::Base, amount: base },
                Transfer::Withdraw { to: owner, asset: Asset::Quote, amount: quote },
            ],
        )?;

        self.ledger.record_mut(handle)?.take_free();
        self.vault.withdraw(Asset::Base, base)?;
        self.vault.withdraw(Asset::Quote, quote)?;

        info!(owner, base, quote, "funds settled");
        Ok(SettleOutcome { base, quote })
    }

    /// Pay all accrued net fees to `recipient`, returning the amount.
    pub fn sweep_fees<C: Custody>(&mut self, custody: &mut C, recipient: TraderId) -> Result<u64> {
        let amount = self.vault.quote_fees_accrued;
        if amount == 0 {
            return Err(ExchangeError::NothingToSettle);
        }
        custody.withdraw(&self.signer, recipient, Asset::Quote, amount)?;
        self.vault.quote_fees_accrued = 0;
        self.vault.withdraw(Asset::Quote, amount)?;

        info!(recipient, amount, "fees swept");
        Ok(amount)
    }

    /// Verify that every native unit in the vaults is claimed by exactly one
    /// of: an open orders record, an unconsumed maker fill, accrued fees, or
    /// the orphaned pool.
    pub fn check_conservation(&self) -> Result<()> {
        let (record_base, record_quote) = self.ledger.totals();
        let (pending_base, pending_quote) = self.pending_maker_credits();
        let vault = &self.vault;

        let base_claims = record_base + pending_base + vault.orphaned_base as u128;
        if base_claims != vault.base_deposits_total as u128 {
            return Err(ExchangeError::InvariantViolation(
                "base vault does not match claims",
            ));
        }

        let quote_claims = record_quote
            + vault.quote_fees_accrued as u128
            + pending_quote
            + vault.orphaned_quote as u128;
        if quote_claims != vault.quote_deposits_total as u128 {
            return Err(ExchangeError::InvariantViolation(
                "quote vault does not match claims",
            ));
        }

        self.book.check_invariants()?;
        self.check_locked_covers_book()
    }

    /// Each record's locked balance covers at least its resting orders.
    fn check_locked_covers_book(&self) -> Result<()> {
        for (_, record) in self.ledger.iter() {
            let mut base = 0u64;
            let mut quote = 0u64;
            for (_, slot) in record.orders() {
                let node = self
                    .book
                    .get(slot.side, slot.handle, slot.order_id)
                    .ok_or(ExchangeError::InvariantViolation(
                        "open orders slot without a resting order",
                    ))?;
                let locked = self
                    .locked_native(slot.side, node.price, node.qty)
                    .ok_or(ExchangeError::InvariantViolation("locked native overflow"))?;
                match Self::locked_asset(slot.side) {
                    Asset::Base => base = base.add_or_violate(locked, "locked base overflow")?,
                    Asset::Quote => quote = quote.add_or_violate(locked, "locked quote overflow")?,
                }
            }
            if record.base_locked < base || record.quote_locked < quote {
                return Err(ExchangeError::InvariantViolation(
                    "locked balance below resting orders",
                ));
            }
        }
        Ok(())
    }
}
