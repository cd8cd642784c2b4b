//! Spawn scheduling and traffic-flow behavior
//!
//! These tests drive the engine's virtual clock deterministically with a
//! seeded RNG, acting as the view layer themselves: they pump `tick` and
//! report finished crossings back through `mark_done`.

use chicken_road::engine::{EngineConfig, TrafficEngine};
use std::cell::Cell;
use std::rc::Rc;

const TICK_MS: u64 = 50;

/// A config tightened for fast, deterministic test runs.
fn quick_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.flow.mean_interval_ms_by_lane = Vec::new();
    config.flow.base_mean_interval_ms = 400;
    config.flow.arrival_jitter_ms = 100;
    config.flow.min_delay_ms = 50;
    config.flow.initial_offset_range_ms = (50, 200);
    config.flow.cleanup_interval_ms = 500;
    config.speed.lane_speed_pattern_ms = vec![2000];
    config.speed.speed_jitter = 0.1;
    config.speed.min_speed_ms = 800;
    config
}

fn sprites() -> Vec<String> {
    vec!["a".to_string(), "b".to_string()]
}

/// Report every completed crossing back to the engine, as the view would.
fn mark_finished(engine: &mut TrafficEngine) {
    let now = engine.now_ms();
    let snapshot = engine.snapshot();
    for (lane, vehicles) in &snapshot.lanes {
        for vehicle in vehicles {
            if !vehicle.done && vehicle.progress(now) >= 1.0 {
                engine.mark_done(*lane, &vehicle.id);
            }
        }
    }
}

fn run(engine: &mut TrafficEngine, ticks: u32) {
    for _ in 0..ticks {
        engine.tick(TICK_MS);
        mark_finished(engine);
    }
}

#[test]
fn every_lane_fills_after_start() {
    let mut engine = TrafficEngine::new_with_seed(42);
    engine.init(5, quick_config(), sprites());
    engine.start();

    // Well past the largest initial offset plus a few mean intervals.
    run(&mut engine, 200);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.lanes.len(), 5);
    for lane in 1..=5 {
        let vehicles = snapshot.lane(lane);
        assert!(!vehicles.is_empty(), "lane {lane} never spawned");
        for vehicle in vehicles {
            assert_eq!(vehicle.lane_index, lane);
            assert!(vehicle.animation_duration_ms >= 800);
            assert!(vehicle.sprite == "a" || vehicle.sprite == "b");
        }
    }
    assert!(engine.stats().total_spawned >= 5);
}

#[test]
fn lane_capacity_is_never_exceeded() {
    let mut config = quick_config();
    config.flow.max_cars_per_lane_visible = 2;
    let mut engine = TrafficEngine::new_with_seed(7);
    engine.init(4, config, sprites());
    engine.start();

    for _ in 0..1200 {
        engine.tick(TICK_MS);
        mark_finished(&mut engine);
        let snapshot = engine.snapshot();
        for (lane, vehicles) in &snapshot.lanes {
            let active = vehicles.iter().filter(|v| v.counts_for_occupancy()).count();
            assert!(active <= 2, "lane {lane} had {active} active vehicles");
        }
    }
}

#[test]
fn strict_no_overlap_caps_lanes_at_one() {
    let mut config = quick_config();
    config.flow.no_overlap_strict = true;
    config.flow.max_cars_per_lane_visible = 5;
    let mut engine = TrafficEngine::new_with_seed(11);
    engine.init(3, config, sprites());
    engine.start();

    for _ in 0..1200 {
        engine.tick(TICK_MS);
        mark_finished(&mut engine);
        let snapshot = engine.snapshot();
        for (lane, vehicles) in &snapshot.lanes {
            let active = vehicles.iter().filter(|v| v.counts_for_occupancy()).count();
            assert!(active <= 1, "lane {lane} had {active} active vehicles");
        }
    }
}

#[test]
fn consecutive_spawns_respect_headway() {
    let mut config = quick_config();
    config.flow.max_cars_per_lane_visible = 4;
    config.flow.headway_min_progress = 0.3;
    config.flow.headway_min_time_fraction = 0.25;
    let mut engine = TrafficEngine::new_with_seed(23);
    engine.init(3, config, sprites());
    engine.start();

    // Record every vehicle ever seen, in arrival order per lane.
    let mut seen: Vec<Vec<(u64, u64)>> = vec![Vec::new(); 4];
    let mut known: std::collections::HashSet<String> = std::collections::HashSet::new();
    for _ in 0..2400 {
        engine.tick(TICK_MS);
        let snapshot = engine.snapshot();
        for (lane, vehicles) in &snapshot.lanes {
            for vehicle in vehicles {
                if known.insert(vehicle.id.as_str().to_string()) {
                    seen[*lane].push((vehicle.start_time_ms, vehicle.animation_duration_ms));
                }
            }
        }
        mark_finished(&mut engine);
    }

    let mut pairs = 0;
    for lane in seen.iter().skip(1) {
        for window in lane.windows(2) {
            let (start1, duration1) = window[0];
            let (start2, _) = window[1];
            let gap = (start2 - start1) as f64;
            assert!(
                gap >= duration1 as f64 * 0.25 - 1e-6,
                "time-fraction headway violated: gap {gap} vs duration {duration1}"
            );
            assert!(
                gap / duration1 as f64 >= 0.3 - 1e-6,
                "progress headway violated: gap {gap} vs duration {duration1}"
            );
            pairs += 1;
        }
    }
    assert!(pairs > 10, "not enough consecutive spawns to check headway");
}

#[test]
fn blocked_lane_stops_spawning_until_unblocked() {
    let mut engine = TrafficEngine::new_with_seed(5);
    engine.init(3, quick_config(), sprites());
    engine.set_lane_blocked(2, true);
    engine.start();

    run(&mut engine, 600);
    let snapshot = engine.snapshot();
    assert!(snapshot.lane(2).is_empty(), "blocked lane 2 spawned");
    assert!(!snapshot.lane(1).is_empty());
    assert!(!snapshot.lane(3).is_empty());

    engine.set_lane_blocked(2, false);
    run(&mut engine, 600);
    assert!(
        !engine.snapshot().lane(2).is_empty(),
        "lane 2 never recovered after unblocking"
    );
}

#[test]
fn disabled_lane_never_spawns() {
    let mut config = quick_config();
    config.flow.per_lane_spawn_enabled = vec![true, false, true];
    let mut engine = TrafficEngine::new_with_seed(13);
    engine.init(3, config, sprites());
    engine.start();

    run(&mut engine, 1200);
    let snapshot = engine.snapshot();
    assert!(snapshot.lane(2).is_empty(), "disabled lane 2 spawned");
    assert!(!snapshot.lane(1).is_empty());
    assert!(!snapshot.lane(3).is_empty());
}

#[test]
fn no_spawns_before_the_initial_offset() {
    let mut config = quick_config();
    config.flow.initial_offset_range_ms = (500, 800);
    let mut engine = TrafficEngine::new_with_seed(3);
    engine.init(3, config, sprites());
    engine.start();

    // 400 ms elapsed: below the offset range's minimum.
    for _ in 0..8 {
        engine.tick(TICK_MS);
    }
    assert_eq!(engine.snapshot().total_vehicles(), 0);

    // 1000 ms elapsed: every lane's first attempt has fired on an empty,
    // unblocked lane and must have spawned.
    for _ in 0..12 {
        engine.tick(TICK_MS);
    }
    for lane in 1..=3 {
        assert!(!engine.snapshot().lane(lane).is_empty(), "lane {lane} empty");
    }
}

#[test]
fn crossing_durations_are_floored_at_min_speed() {
    let mut config = quick_config();
    config.speed.lane_speed_pattern_ms = vec![100];
    config.speed.speed_jitter = 0.2;
    config.speed.min_speed_ms = 900;
    let mut engine = TrafficEngine::new_with_seed(17);
    engine.init(2, config, sprites());
    engine.start();

    run(&mut engine, 400);
    let snapshot = engine.snapshot();
    assert!(snapshot.total_vehicles() > 0);
    for vehicles in snapshot.lanes.values() {
        for vehicle in vehicles {
            assert_eq!(vehicle.animation_duration_ms, 900);
        }
    }
}

#[test]
fn done_vehicles_linger_until_the_cleanup_sweep() {
    let mut engine = TrafficEngine::new_with_seed(29);
    engine.init(1, quick_config(), sprites());
    engine.start();

    // Wait for the first spawn.
    let mut first_id = None;
    for _ in 0..100 {
        engine.tick(TICK_MS);
        if let Some(vehicle) = engine.snapshot().lane(1).first() {
            first_id = Some(vehicle.id.clone());
            break;
        }
    }
    let id = first_id.expect("no vehicle spawned in 5s");

    engine.mark_done(1, &id);
    let lingering = engine.snapshot();
    let flagged = lingering
        .lane(1)
        .iter()
        .find(|v| v.id == id)
        .expect("done vehicle vanished before the sweep");
    assert!(flagged.done);

    // One full cleanup interval later the vehicle is gone for good.
    for _ in 0..12 {
        engine.tick(TICK_MS);
    }
    assert!(engine.snapshot().lane(1).iter().all(|v| v.id != id));
    assert!(engine.stats().total_retired >= 1);
}

#[test]
fn stop_cancels_timers_and_start_reseeds_them() {
    let mut engine = TrafficEngine::new_with_seed(31);
    engine.init(3, quick_config(), sprites());
    engine.start();
    run(&mut engine, 100);

    let spawned_before = engine.stats().total_spawned;
    assert!(spawned_before > 0);

    engine.stop();
    assert!(!engine.is_started());

    let publications = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&publications);
    engine.subscribe(move |_| counter.set(counter.get() + 1));
    let after_replay = publications.get();

    // The clock keeps advancing while stopped, but nothing fires.
    for _ in 0..400 {
        engine.tick(TICK_MS);
    }
    assert_eq!(engine.stats().total_spawned, spawned_before);
    assert_eq!(publications.get(), after_replay);

    // Restarting seeds fresh offsets rather than resuming the schedule.
    engine.start();
    run(&mut engine, 200);
    assert!(engine.stats().total_spawned > spawned_before);
    assert!(publications.get() > after_replay);
}

#[test]
fn nothing_spawns_before_start() {
    let mut engine = TrafficEngine::new_with_seed(37);
    engine.init(3, quick_config(), sprites());
    for _ in 0..200 {
        engine.tick(TICK_MS);
    }
    assert_eq!(engine.snapshot().total_vehicles(), 0);
    assert_eq!(engine.stats().total_spawned, 0);
}

#[test]
fn start_is_idempotent() {
    let mut engine = TrafficEngine::new_with_seed(41);
    engine.init(2, quick_config(), sprites());
    engine.start();
    run(&mut engine, 50);
    let spawned = engine.stats().total_spawned;

    // A second start must not reset or double the schedule.
    engine.start();
    assert!(engine.is_started());
    assert_eq!(engine.stats().total_spawned, spawned);
}
