use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;

use chicken_road::engine::{EngineConfig, TrafficEngine};

#[derive(Parser)]
#[command(name = "chicken_road")]
#[command(about = "Chicken Road traffic engine with a headless demo driver")]
struct Cli {
    /// Number of traffic lanes
    #[arg(long, default_value = "5")]
    lanes: usize,

    /// Number of engine ticks to run
    #[arg(long, default_value = "600")]
    ticks: u32,

    /// Clock advance per tick in milliseconds
    #[arg(long, default_value = "100")]
    delta_ms: u64,

    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// JSON engine config file (defaults are used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cap every lane at a single concurrent vehicle
    #[arg(long)]
    strict: bool,

    /// Sleep between ticks so the run paces at real time
    #[arg(long)]
    real_time: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("failed to load engine config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if cli.strict {
        config.flow.no_overlap_strict = true;
    }
    config.validate().context("invalid engine config")?;

    let mut engine = match cli.seed {
        Some(seed) => TrafficEngine::new_with_seed(seed),
        None => TrafficEngine::new(),
    };

    let sprites = vec![
        "sedan".to_string(),
        "taxi".to_string(),
        "bus".to_string(),
        "pickup".to_string(),
    ];
    engine.init(cli.lanes, config, sprites);

    // Count publications the way a view layer would consume them.
    let publications = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&publications);
    engine.subscribe(move |_| counter.set(counter.get() + 1));

    engine.start();

    println!("Running Chicken Road traffic engine in headless mode...");
    println!(
        "Lanes: {}, ticks: {}, delta: {} ms",
        cli.lanes, cli.ticks, cli.delta_ms
    );
    println!();

    run_demo(&mut engine, &cli);

    let stats = engine.stats();
    info!("=== SIMULATION COMPLETE ===");
    info!("Simulated time: {:.1}s", engine.now_ms() as f64 / 1000.0);
    info!("Total cars spawned: {}", stats.total_spawned);
    info!("Total cars injected: {}", stats.total_injected);
    info!("Total cars retired: {}", stats.total_retired);
    info!("Snapshots published: {}", publications.get());
    Ok(())
}

/// Pump the engine and run a scripted choreography exercising the command
/// API the way the game-logic layer would around a crossing attempt.
fn run_demo(engine: &mut TrafficEngine, cli: &Cli) {
    let ticks_per_second = (1000 / cli.delta_ms.max(1)).max(1) as u32;

    for tick in 1..=cli.ticks {
        engine.tick(cli.delta_ms);
        let elapsed_ms = u64::from(tick) * cli.delta_ms;

        // The avatar steps up to lane 2: stop ordinary traffic there and
        // maybe showcase why the lane is closed.
        if crosses(elapsed_ms, cli.delta_ms, 10_000) {
            engine.set_lane_blocked(2, true);
            if let Some(id) = engine.maybe_spawn_blocked_showcase(2) {
                info!("showcase vehicle {id} injected into blocked lane 2");
            }
        }

        // Backend verdict arrives: crash on lane 3.
        if crosses(elapsed_ms, cli.delta_ms, 15_000) {
            if let Some(id) = engine.inject_crash_car(3, 1200) {
                info!("crash vehicle {id} staged in lane 3");
            }
        }

        // The avatar is about to enter lane 1: hurry the newest car out,
        // and report the oldest finished the way a view would.
        if crosses(elapsed_ms, cli.delta_ms, 20_000) {
            let snapshot = engine.snapshot();
            if let Some(vehicle) = snapshot.lane(1).iter().rev().find(|v| !v.done) {
                engine.boost_car_speed(1, &vehicle.id);
            }
            if let Some(vehicle) = snapshot.lane(1).first() {
                engine.mark_done(1, &vehicle.id);
            }
        }

        // Avatar moved on: reopen lane 2.
        if crosses(elapsed_ms, cli.delta_ms, 25_000) {
            engine.set_lane_blocked(2, false);
        }

        if tick % ticks_per_second == 0 {
            println!(
                "--- After tick {} ({:.1}s simulated time) ---",
                tick,
                elapsed_ms as f64 / 1000.0
            );
            engine.print_summary();
            engine.draw_map();
        }

        if cli.real_time {
            std::thread::sleep(std::time::Duration::from_millis(cli.delta_ms));
        }
    }
}

/// True on the tick where the simulated clock first reaches `at_ms`.
fn crosses(elapsed_ms: u64, delta_ms: u64, at_ms: u64) -> bool {
    elapsed_ms >= at_ms && elapsed_ms.saturating_sub(delta_ms) < at_ms
}
