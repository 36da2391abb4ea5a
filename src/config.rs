//! Market and engine configuration, loaded from YAML.
//!
//! Everything sized here is fixed for the lifetime of a market.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::custody::Address;
use crate::error::ExchangeError;
use crate::fees::FeeSchedule;
use crate::logging::LogFormat;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Invalid(#[from] ExchangeError),
}

/// Fixed capacities decided at market creation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capacities {
    /// Resting orders per book side
    pub orders_per_side: u32,
    /// Event queue slots
    pub event_queue: u32,
    /// Open orders records
    pub open_orders_accounts: u32,
}

impl Default for Capacities {
    fn default() -> Self {
        Self {
            orders_per_side: 65_536,
            event_queue: 2_048,
            open_orders_accounts: 1_024,
        }
    }
}

/// Per-market trading parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Native base units per base lot
    pub base_lot_size: u64,
    /// Native quote units per quote lot
    pub quote_lot_size: u64,
    #[serde(default)]
    pub fees: FeeSchedule,
    /// Remainders locking less native quote than this are not rested
    #[serde(default)]
    pub quote_dust_threshold: u64,
    #[serde(default)]
    pub capacities: Capacities,
}

impl MarketConfig {
    pub fn new(base_lot_size: u64, quote_lot_size: u64) -> Self {
        Self {
            base_lot_size,
            quote_lot_size,
            fees: FeeSchedule::default(),
            quote_dust_threshold: 0,
            capacities: Capacities::default(),
        }
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_dust_threshold(mut self, threshold: u64) -> Self {
        self.quote_dust_threshold = threshold;
        self
    }

    pub fn with_capacities(mut self, capacities: Capacities) -> Self {
        self.capacities = capacities;
        self
    }

    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.base_lot_size == 0 || self.quote_lot_size == 0 {
            return Err(ExchangeError::InvalidConfig(
                "lot sizes must be positive".to_string(),
            ));
        }
        let caps = &self.capacities;
        if caps.orders_per_side == 0 || caps.event_queue == 0 || caps.open_orders_accounts == 0 {
            return Err(ExchangeError::InvalidConfig(
                "capacities must be positive".to_string(),
            ));
        }
        // The price index needs 2n-1 nodes below the arena sentinels
        if caps.orders_per_side > u32::MAX / 4 {
            return Err(ExchangeError::InvalidConfig(format!(
                "orders_per_side {} is too large",
                caps.orders_per_side
            )));
        }
        self.fees.validate()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Pin the market thread to the last core
    pub pin_to_core: bool,
    pub command_ring_size: usize,
    pub output_ring_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pin_to_core: true,
            command_ring_size: 65_536,
            output_ring_size: 65_536,
        }
    }
}

/// Everything needed to stand up one market engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Market identity, hex encoded
    pub market_id: String,
    /// Exchange program identity, hex encoded
    pub program_id: String,
    /// Signer nonce; searched for when absent
    #[serde(default)]
    pub vault_signer_nonce: Option<u64>,
    pub market: MarketConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl EngineConfig {
    /// Read, parse and validate a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(bytes = content.len(), "config file read");
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ExchangeError> {
        self.market_address()?;
        self.program_address()?;
        if self.runtime.command_ring_size == 0 || self.runtime.output_ring_size == 0 {
            return Err(ExchangeError::InvalidConfig(
                "ring sizes must be positive".to_string(),
            ));
        }
        self.market.validate()
    }

    pub fn market_address(&self) -> Result<Address, ExchangeError> {
        parse_address("market_id", &self.market_id)
    }

    pub fn program_address(&self) -> Result<Address, ExchangeError> {
        parse_address("program_id", &self.program_id)
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, ExchangeError> {
    Address::from_hex(value).ok_or_else(|| {
        ExchangeError::InvalidConfig(format!("{field} must be 64 hex characters"))
    })
}
