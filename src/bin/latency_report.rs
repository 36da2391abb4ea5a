use crank_lob::{
    Address, Asset, Command, Engine, FeeSchedule, Market, MarketConfig, MarketParams,
    MemoryCustody, NewOrder, OpenOrdersHandle, Outcome, Side,
};
use hdrhistogram::Histogram;
use std::time::{Duration, Instant};

const ITERATIONS: u64 = 1_000_000;
/// Traders per side; each record holds at most 128 resting orders
const TRADERS: u64 = 256;
/// Crank every N placements so the event queue never wraps
const CRANK_EVERY: u64 = 16;

fn setup() -> anyhow::Result<(Engine<MemoryCustody>, Vec<OpenOrdersHandle>)> {
    let params = MarketParams::find_signer(
        Address::new([0xAB; 32]),
        Address::new([0xCD; 32]),
        MarketConfig::new(1, 1).with_fees(FeeSchedule::default()),
    )?;
    let market = Market::initialize(params)?;
    let custody = MemoryCustody::new(market.vault_signer());
    let mut engine = Engine::new(market, custody).with_clock(|| 0);

    let mut handles = Vec::new();
    for owner in 1..=2 * TRADERS {
        engine.custody_mut().fund(owner, Asset::Base, u64::MAX / 2);
        engine.custody_mut().fund(owner, Asset::Quote, u64::MAX / 2);
        if let Outcome::Initialized(h) =
            engine.process_command(Command::InitOpenOrders { owner })?
        {
            handles.push(h);
        }
    }
    engine.warm_up();
    Ok((engine, handles))
}

fn main() -> anyhow::Result<()> {
    println!("Preparing Latency Benchmark...");

    let (mut engine, handles) = setup()?;
    let mut place = Histogram::<u64>::new_with_bounds(1, 100_000, 3)?;
    let mut crank = Histogram::<u64>::new_with_bounds(1, 10_000_000, 3)?;

    println!("Running {} iterations...", ITERATIONS);

    let mut total_duration = Duration::ZERO;

    for i in 1..=ITERATIONS {
        // Bids on even ticks, asks on odd ticks of a 100-tick band
        let trader = 1 + (i / 2) % TRADERS;
        let (owner, side) = if i % 2 == 0 {
            (trader, Side::Bid)
        } else {
            (TRADERS + trader, Side::Ask)
        };
        let cmd = Command::Place {
            owner,
            order: NewOrder::limit(side, 10_000 + (i % 100), 10).with_limit(32),
        };

        let start = Instant::now();
        let _ = std::hint::black_box(engine.process_command(cmd));
        let elapsed = start.elapsed();

        // Outliers beyond the histogram bound are dropped
        place.record(elapsed.as_nanos() as u64).unwrap_or(());
        total_duration += elapsed;

        if i % CRANK_EVERY == 0 {
            let start = Instant::now();
            let _ = std::hint::black_box(engine.process_command(Command::ConsumeEvents {
                owners: handles.clone(),
                limit: u16::MAX,
            }));
            crank.record(start.elapsed().as_nanos() as u64).unwrap_or(());
        }
    }

    println!("\n=== Place Latency (ns) ===");
    println!("Total Ops:  {}", ITERATIONS);
    println!(
        "Throughput: {:.2} ops/sec",
        ITERATIONS as f64 / total_duration.as_secs_f64()
    );
    print_quantiles(&place);

    println!("\n=== Crank Latency (ns, {} owners) ===", handles.len());
    println!("Cranks:     {}", crank.len());
    print_quantiles(&crank);

    println!("\nPlace distribution:");
    for v in place.iter_log(100, 2.0) {
        let count = v.count_since_last_iteration();
        if count > 0 {
            println!("<= {:8} ns: {:10}", v.value_iterated_to(), count);
        }
    }

    engine.market.check_conservation()?;
    Ok(())
}

fn print_quantiles(h: &Histogram<u64>) {
    println!("---------------------------");
    println!("Min:    {:8} ns", h.min());
    println!("P50:    {:8} ns", h.value_at_quantile(0.50));
    println!("P90:    {:8} ns", h.value_at_quantile(0.90));
    println!("P99:    {:8} ns", h.value_at_quantile(0.99));
    println!("P99.9:  {:8} ns", h.value_at_quantile(0.999));
    println!("P99.99: {:8} ns", h.value_at_quantile(0.9999));
    println!("Max:    {:8} ns", h.max());
    println!("---------------------------");
}
