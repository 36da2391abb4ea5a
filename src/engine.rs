//! Engine - per-market command dispatcher and actor loop.
//!
//! Owns one `Market` and the custody it settles through. Commands run one at
//! a time to completion; with the `runtime` feature the engine can be driven
//! from rtrb ring buffers on a pinned core.

use tracing::debug;

use crate::command::{Command, OpenOrdersHandle};
use crate::crank::ConsumeReport;
use crate::custody::Custody;
use crate::error::Result;
use crate::market::Market;
use crate::matching::{CancelOutcome, PlaceOutcome};
use crate::settlement::SettleOutcome;
use crate::take::TakeOutcome;

/// Source of the current time in seconds
pub type Clock = fn() -> i64;

fn wall_clock() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Successful result of one command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Initialized(OpenOrdersHandle),
    Placed(PlaceOutcome),
    Cancelled(CancelOutcome),
    Consumed(ConsumeReport),
    Settled(SettleOutcome),
    Took(TakeOutcome),
    FeesSwept(u64),
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Initialized(_) => "initialized",
            Outcome::Placed(_) => "placed",
            Outcome::Cancelled(_) => "cancelled",
            Outcome::Consumed(_) => "consumed",
            Outcome::Settled(_) => "settled",
            Outcome::Took(_) => "took",
            Outcome::FeesSwept(_) => "fees_swept",
        }
    }
}

/// The main engine that processes commands for one market.
pub struct Engine<C: Custody> {
    pub market: Market,
    custody: C,
    clock: Clock,
}

impl<C: Custody> Engine<C> {
    /// Create an engine using the wall clock for order expiry.
    pub fn new(market: Market, custody: C) -> Self {
        Self {
            market,
            custody,
            clock: wall_clock,
        }
    }

    /// Replace the time source (tests and replays).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[inline]
    pub fn custody(&self) -> &C {
        &self.custody
    }

    #[inline]
    pub fn custody_mut(&mut self) -> &mut C {
        &mut self.custody
    }

    /// Run the engine event loop.
    ///
    /// # Arguments
    /// * `input` - Consumer end of the command ring buffer
    /// * `output` - Producer end of the result ring buffer
    /// * `pin_to_core` - Whether to pin to the last available CPU core
    ///
    /// # Note
    /// This function runs forever (until the program terminates).
    #[cfg(feature = "runtime")]
    pub fn run(
        &mut self,
        input: &mut rtrb::Consumer<Command>,
        output: &mut rtrb::Producer<Result<Outcome>>,
        pin_to_core: bool,
    ) {
        if pin_to_core {
            self.pin_to_core();
        }
        self.warm_up();

        loop {
            while let Ok(cmd) = input.pop() {
                let result = self.process_command(cmd);
                // Best effort - drop if full
                let _ = output.push(result);
            }
            std::hint::spin_loop();
        }
    }

    /// Process a single command to completion.
    ///
    /// On error the market is unchanged.
    pub fn process_command(&mut self, cmd: Command) -> Result<Outcome> {
        let now = (self.clock)();
        self.process_command_at(cmd, now)
    }

    /// Process a command at an explicit time, bypassing the clock.
    pub fn process_command_at(&mut self, cmd: Command, now: i64) -> Result<Outcome> {
        let market = &mut self.market;
        let custody = &mut self.custody;

        let outcome = match cmd {
            Command::InitOpenOrders { owner } => {
                Outcome::Initialized(market.init_open_orders(owner)?)
            }
            Command::Place { owner, order } => {
                Outcome::Placed(market.place_order(custody, owner, order, now)?)
            }
            Command::Cancel { owner, order_id } => {
                Outcome::Cancelled(market.cancel_order(owner, order_id)?)
            }
            Command::CancelByClientId {
                owner,
                client_order_id,
            } => Outcome::Cancelled(market.cancel_order_by_client_id(owner, client_order_id)?),
            Command::ConsumeEvents { owners, limit } => {
                Outcome::Consumed(market.consume_events(&owners, limit)?)
            }
            Command::Settle { owner } => Outcome::Settled(market.settle_funds(custody, owner)?),
            Command::Take { taker, order } => {
                Outcome::Took(market.take(custody, taker, order, now)?)
            }
            Command::SweepFees { recipient } => {
                Outcome::FeesSwept(market.sweep_fees(custody, recipient)?)
            }
        };
        debug!(outcome = outcome.kind(), "command processed");
        Ok(outcome)
    }

    /// Pin the current thread to the last available CPU core.
    ///
    /// The last core is typically isolated from OS interrupts.
    pub fn pin_to_core(&self) {
        if let Some(core_ids) = core_affinity::get_core_ids() {
            if let Some(last_core) = core_ids.last() {
                core_affinity::set_for_current(*last_core);
            }
        }
    }

    /// Warm up the engine by pre-faulting memory pages.
    pub fn warm_up(&mut self) {
        self.market.warm_up();
    }

    #[inline]
    pub fn best_bid(&self) -> Option<u64> {
        self.market.best_bid()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<u64> {
        self.market.best_ask()
    }

    #[inline]
    pub fn order_count(&self) -> usize {
        self.market.book().order_count()
    }

    /// Compute state hash for determinism testing.
    #[inline]
    pub fn state_hash(&self) -> u64 {
        self.market.state_hash()
    }
}
