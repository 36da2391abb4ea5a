//! Custody seam: the pooled vaults and the authority that signs for them.
//!
//! The engine never moves tokens itself. It asks a `Custody` implementation
//! to pull a trader's funds into the market vault (trader-signed) or to pay
//! out of the vault (signed by the market's `VaultSigner`).

use std::fmt;

use ed25519_dalek::VerifyingKey;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::command::TraderId;
use crate::error::{ExchangeError, Result};

/// Domain separator appended to every derivation
const DERIVATION_SEED: &[u8] = b"ProgramDerivedAddress";

/// Nonces tried before giving up on a signer
const MAX_SIGNER_NONCE: u64 = 255;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Asset {
    Base,
    Quote,
}

/// 32-byte account address
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from 64 hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", &hex::encode(self.0)[..16])
    }
}

/// Identity of a market
pub type MarketId = Address;

/// Identity of the exchange program operating the market
pub type ProgramId = Address;

/// Authority over a market's vaults, derived from the market identity.
///
/// The address is `sha256(market ‖ nonce_le ‖ program ‖ "ProgramDerivedAddress")`
/// and is only valid when it is not an ed25519 public key, so nobody can hold
/// a private key for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct VaultSigner {
    pub market: MarketId,
    pub nonce: u64,
    pub address: Address,
}

impl VaultSigner {
    /// Derive the signer for an explicit nonce.
    pub fn derive(market: MarketId, program: ProgramId, nonce: u64) -> Result<Self> {
        let mut hasher = Sha256::new();
        hasher.update(market.as_bytes());
        hasher.update(nonce.to_le_bytes());
        hasher.update(program.as_bytes());
        hasher.update(DERIVATION_SEED);
        let digest: [u8; 32] = hasher.finalize().into();

        if VerifyingKey::from_bytes(&digest).is_ok() {
            return Err(ExchangeError::InvalidVaultSigner);
        }
        Ok(Self {
            market,
            nonce,
            address: Address(digest),
        })
    }

    /// Search nonces upward from zero for the first valid signer.
    pub fn find(market: MarketId, program: ProgramId) -> Result<Self> {
        (0..=MAX_SIGNER_NONCE)
            .find_map(|nonce| Self::derive(market, program, nonce).ok())
            .ok_or(ExchangeError::InvalidVaultSigner)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyError {
    #[error("trader {owner} holds {available} {asset:?}, needs {needed}")]
    InsufficientFunds {
        owner: TraderId,
        asset: Asset,
        needed: u64,
        available: u64,
    },

    #[error("{asset:?} vault holds {available}, needs {needed}")]
    VaultShortfall {
        asset: Asset,
        needed: u64,
        available: u64,
    },

    #[error("signer {0} does not control this vault")]
    UnauthorizedSigner(Address),

    #[error("balance overflow")]
    Overflow,
}

/// One leg of a batched custody operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// Trader-signed pull into the vault
    Deposit {
        from: TraderId,
        asset: Asset,
        amount: u64,
    },
    /// Vault-signed payout
    Withdraw {
        to: TraderId,
        asset: Asset,
        amount: u64,
    },
}

impl Transfer {
    /// External account the transfer touches
    pub fn account(&self) -> (TraderId, Asset) {
        match *self {
            Transfer::Deposit { from, asset, .. } => (from, asset),
            Transfer::Withdraw { to, asset, .. } => (to, asset),
        }
    }
}

/// Token movement between traders' external accounts and a market's vaults.
///
/// Within one instruction the engine calls these only after every internal
/// check has passed. Each call either happens in full or not at all; an
/// instruction that moves more than one amount uses `transfer_all`.
pub trait Custody {
    /// Pull `amount` from `from`'s external account into the vault.
    fn deposit(
        &mut self,
        from: TraderId,
        asset: Asset,
        amount: u64,
    ) -> std::result::Result<(), CustodyError>;

    /// Pay `amount` out of the vault to `to`, authorized by `signer`.
    fn withdraw(
        &mut self,
        signer: &VaultSigner,
        to: TraderId,
        asset: Asset,
        amount: u64,
    ) -> std::result::Result<(), CustodyError>;

    /// Apply `transfers` in order as one unit. If any leg fails, none of
    /// them take effect.
    fn transfer_all(
        &mut self,
        signer: &VaultSigner,
        transfers: &[Transfer],
    ) -> std::result::Result<(), CustodyError>;
}

/// In-process custody holding wallets and one market's vaults.
#[derive(Debug)]
pub struct MemoryCustody {
    authority: Address,
    wallets: FxHashMap<(TraderId, Asset), u64>,
    base_vault: u64,
    quote_vault: u64,
}

impl MemoryCustody {
    /// Custody whose vaults only `signer` may debit
    pub fn new(signer: &VaultSigner) -> Self {
        Self {
            authority: signer.address,
            wallets: FxHashMap::default(),
            base_vault: 0,
            quote_vault: 0,
        }
    }

    /// Credit a trader's external account (mint)
    pub fn fund(&mut self, owner: TraderId, asset: Asset, amount: u64) {
        let wallet = self.wallets.entry((owner, asset)).or_insert(0);
        *wallet = wallet.saturating_add(amount);
    }

    pub fn balance(&self, owner: TraderId, asset: Asset) -> u64 {
        self.wallets.get(&(owner, asset)).copied().unwrap_or(0)
    }

    pub fn vault_balance(&self, asset: Asset) -> u64 {
        match asset {
            Asset::Base => self.base_vault,
            Asset::Quote => self.quote_vault,
        }
    }

    fn vault_mut(&mut self, asset: Asset) -> &mut u64 {
        match asset {
            Asset::Base => &mut self.base_vault,
            Asset::Quote => &mut self.quote_vault,
        }
    }
}

impl Custody for MemoryCustody {
    fn deposit(
        &mut self,
        from: TraderId,
        asset: Asset,
        amount: u64,
    ) -> std::result::Result<(), CustodyError> {
        if amount == 0 {
            return Ok(());
        }
        let available = self.balance(from, asset);
        if available < amount {
            return Err(CustodyError::InsufficientFunds {
                owner: from,
                asset,
                needed: amount,
                available,
            });
        }
        let vault = self.vault_mut(asset);
        *vault = vault.checked_add(amount).ok_or(CustodyError::Overflow)?;
        self.wallets.insert((from, asset), available - amount);
        Ok(())
    }

    fn withdraw(
        &mut self,
        signer: &VaultSigner,
        to: TraderId,
        asset: Asset,
        amount: u64,
    ) -> std::result::Result<(), CustodyError> {
        if signer.address != self.authority {
            return Err(CustodyError::UnauthorizedSigner(signer.address));
        }
        if amount == 0 {
            return Ok(());
        }
        let available = self.vault_balance(asset);
        if available < amount {
            return Err(CustodyError::VaultShortfall {
                asset,
                needed: amount,
                available,
            });
        }
        let wallet = self.balance(to, asset);
        let credited = wallet.checked_add(amount).ok_or(CustodyError::Overflow)?;
        *self.vault_mut(asset) = available - amount;
        self.wallets.insert((to, asset), credited);
        Ok(())
    }

    fn transfer_all(
        &mut self,
        signer: &VaultSigner,
        transfers: &[Transfer],
    ) -> std::result::Result<(), CustodyError> {
        let vaults = (self.base_vault, self.quote_vault);
        let mut touched = Vec::with_capacity(transfers.len());
        for transfer in transfers {
            let account = transfer.account();
            touched.push((account, self.wallets.get(&account).copied()));
            let applied = match *transfer {
                Transfer::Deposit { from, asset, amount } => self.deposit(from, asset, amount),
                Transfer::Withdraw { to, asset, amount } => {
                    self.withdraw(signer, to, asset, amount)
                }
            };
            if let Err(e) = applied {
                // Undo in reverse so the earliest snapshot of an account wins
                for (account, before) in touched.into_iter().rev() {
                    match before {
                        Some(v) => self.wallets.insert(account, v),
                        None => self.wallets.remove(&account),
                    };
                }
                (self.base_vault, self.quote_vault) = vaults;
                return Err(e);
            }
        }
        Ok(())
    }
}
