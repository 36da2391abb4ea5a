//! Replay a CSV instruction log against one market and print the final state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crank_lob::{
    init_logging, Command, Engine, EngineConfig, ExchangeError, LogFormat, Market, MarketParams,
    MemoryCustody, OpenOrdersHandle, Outcome, ReplayRow, ReplayStep, Scaling, VaultSigner,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Replay instruction logs against a crank-lob market")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an instruction log and print the resulting market snapshot
    Run {
        /// Path to the market configuration file
        #[arg(short, long, default_value = "market.yaml")]
        config: PathBuf,

        /// CSV instruction log
        #[arg(short, long)]
        input: PathBuf,

        /// Price lots per unit of the CSV price column
        #[arg(long, default_value_t = 1)]
        price_mult: u64,

        /// Base lots per unit of the CSV size column
        #[arg(long, default_value_t = 1)]
        size_mult: u64,

        /// Start time in seconds for rows without a timestamp
        #[arg(long, default_value_t = 0)]
        start: i64,

        /// Override the configured log format
        #[arg(long)]
        log_format: Option<LogFormat>,
    },

    /// Validate a configuration file and print the vault signer
    Validate {
        #[arg(short, long, default_value = "market.yaml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Commands::Run {
            config,
            input,
            price_mult,
            size_mult,
            start,
            log_format,
        } => {
            let config = EngineConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            init_logging(&config.log.level, log_format.unwrap_or(config.log.format))?;
            let scaling = Scaling {
                price_mult,
                size_mult,
            };
            run(&config, &input, scaling, start)
        }
        Commands::Validate { config } => {
            let config = EngineConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let params = market_params(&config)?;
            let signer = VaultSigner::derive(
                params.market_id,
                params.program_id,
                params.vault_signer_nonce,
            )?;
            println!("config ok");
            println!("vault signer: {} (nonce {})", signer.address, signer.nonce);
            Ok(())
        }
    }
}

fn market_params(config: &EngineConfig) -> Result<MarketParams> {
    let market_id = config.market_address()?;
    let program_id = config.program_address()?;
    let params = match config.vault_signer_nonce {
        Some(nonce) => MarketParams {
            market_id,
            program_id,
            vault_signer_nonce: nonce,
            config: config.market,
        },
        None => MarketParams::find_signer(market_id, program_id, config.market)?,
    };
    Ok(params)
}

#[derive(Debug, Default)]
struct Tally {
    rows: usize,
    rejected: usize,
    by_kind: BTreeMap<&'static str, usize>,
}

fn run(config: &EngineConfig, input: &Path, scaling: Scaling, start: i64) -> Result<()> {
    let market = Market::initialize(market_params(config)?)?;
    let custody = MemoryCustody::new(market.vault_signer());
    let mut engine = Engine::new(market, custody);

    let mut reader = csv::Reader::from_path(input)
        .with_context(|| format!("opening {}", input.display()))?;
    let mut handles: Vec<OpenOrdersHandle> = Vec::new();
    let mut tally = Tally::default();
    let mut now = start;

    for (i, row) in reader.deserialize::<ReplayRow>().enumerate() {
        // Header is line 1
        let line = i + 2;
        let row = row.with_context(|| format!("parsing line {line}"))?;
        if let Some(ts) = row.timestamp {
            now = ts.timestamp();
        }
        tally.rows += 1;

        let step = row
            .to_step(&scaling)
            .with_context(|| format!("line {line}"))?;
        let cmd = match step {
            ReplayStep::Fund {
                owner,
                asset,
                amount,
            } => {
                engine.custody_mut().fund(owner, asset, amount);
                *tally.by_kind.entry("funded").or_default() += 1;
                continue;
            }
            ReplayStep::Execute(cmd) => cmd,
            ReplayStep::CrankAll { limit } => Command::ConsumeEvents {
                owners: handles.clone(),
                limit,
            },
        };

        match engine.process_command_at(cmd, now) {
            Ok(outcome) => {
                if let Outcome::Initialized(handle) = outcome {
                    handles.push(handle);
                }
                *tally.by_kind.entry(outcome.kind()).or_default() += 1;
            }
            Err(ExchangeError::NothingToSettle) => {}
            Err(e) => {
                warn!(line, error = %e, "instruction rejected");
                tally.rejected += 1;
            }
        }
    }

    engine
        .market
        .check_conservation()
        .context("vault totals diverged from the ledger")?;
    info!(rows = tally.rows, rejected = tally.rejected, "replay finished");

    println!("rows:     {}", tally.rows);
    println!("rejected: {}", tally.rejected);
    for (kind, count) in &tally.by_kind {
        println!("{kind:>12}: {count}");
    }
    println!("---");
    print!("{}", serde_yaml::to_string(&engine.market.snapshot())?);
    Ok(())
}
