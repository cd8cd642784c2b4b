//! The traffic engine
//!
//! A long-lived service object that simulates bounded vehicle traffic per
//! lane, independent of any view's render lifecycle. Each lane runs its
//! own randomized spawn timer; the game-logic layer choreographs crashes,
//! blocked lanes, and speed boosts through the command API; views observe
//! through published snapshots and report finished animations back with
//! `mark_done`.
//!
//! All timers are deadline fields evaluated against the engine's virtual
//! millisecond clock inside [`TrafficEngine::tick`]; a driver pumps the
//! clock from wall time, tests pump it deterministically.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashSet};

use super::config::EngineConfig;
use super::lane::LaneState;
use super::subscribers::{SubscriberId, SubscriberRegistry};
use super::types::{
    TrafficSnapshot, Vehicle, VehicleId, BOOST_MIN_REMAINING_MS, BOOST_REMAINING_FACTOR,
    CRASH_CAR_MIN_DURATION_MS, SHOWCASE_CAR_MIN_DURATION_MS,
};

/// Running counters for a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    /// Vehicles created by the ordinary spawn algorithm.
    pub total_spawned: u64,
    /// Crash and showcase vehicles injected on demand.
    pub total_injected: u64,
    /// Finished vehicles removed by the cleanup sweep.
    pub total_retired: u64,
}

/// The traffic simulation engine.
///
/// Construct once per application session, then `init` per game or
/// difficulty change and `start` when the round begins. All state is
/// exclusively owned here; consumers interact only through commands and
/// defensively copied snapshots.
pub struct TrafficEngine {
    lane_count: usize,
    config: EngineConfig,
    sprites: Vec<String>,
    /// Lane index -> lane state; ordered so seeded runs are reproducible.
    lanes: BTreeMap<usize, LaneState>,
    /// Lanes currently suppressing ordinary spawns.
    blocked_lanes: HashSet<usize>,
    subscribers: SubscriberRegistry,
    started: bool,
    /// Virtual clock, advanced only by `tick`.
    time_ms: u64,
    next_cleanup_at: Option<u64>,
    /// Optional seeded RNG for reproducible simulations.
    rng: Option<StdRng>,
    stats: EngineStats,
}

impl Default for TrafficEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficEngine {
    fn new_internal(rng: Option<StdRng>) -> Self {
        Self {
            lane_count: 0,
            config: EngineConfig::default(),
            sprites: Vec::new(),
            lanes: BTreeMap::new(),
            blocked_lanes: HashSet::new(),
            subscribers: SubscriberRegistry::default(),
            started: false,
            time_ms: 0,
            next_cleanup_at: None,
            rng,
            stats: EngineStats::default(),
        }
    }

    pub fn new() -> Self {
        Self::new_internal(None)
    }

    /// Create an engine with a seeded RNG for reproducible simulations.
    pub fn new_with_seed(seed: u64) -> Self {
        Self::new_internal(Some(StdRng::seed_from_u64(seed)))
    }

    /// Get a random value in the given range, using the seeded RNG if
    /// available.
    fn random_range(&mut self, range: std::ops::Range<f64>) -> f64 {
        match &mut self.rng {
            Some(rng) => rng.random_range(range),
            None => rand::rng().random_range(range),
        }
    }

    fn random_suffix(&mut self) -> u32 {
        match &mut self.rng {
            Some(rng) => rng.random(),
            None => rand::rng().random(),
        }
    }

    fn pick_sprite(&mut self) -> String {
        if self.sprites.is_empty() {
            return String::new();
        }
        let idx = match &mut self.rng {
            Some(rng) => rng.random_range(0..self.sprites.len()),
            None => rand::rng().random_range(0..self.sprites.len()),
        };
        self.sprites[idx].clone()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// (Re)configure the engine for a game session.
    ///
    /// Lanes 1..=`lane_count` are tracked; lane 0 is the sidewalk and
    /// never holds traffic. Clears every vehicle list and the blocked
    /// set. If the engine is already started the spawn timers are
    /// reseeded with fresh initial offsets.
    pub fn init(&mut self, lane_count: usize, config: EngineConfig, car_sprites: Vec<String>) {
        self.lane_count = lane_count;
        self.config = config;
        self.sprites = car_sprites;
        self.lanes = (1..=lane_count)
            .map(|lane| (lane, LaneState::default()))
            .collect();
        self.blocked_lanes.clear();
        info!("traffic engine initialized with {lane_count} lanes");
        if self.started {
            self.seed_timers();
        }
        self.publish();
    }

    /// Begin the per-lane spawn timers. No-op if already started.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.seed_timers();
        info!("traffic engine started");
    }

    /// Cancel every outstanding timer. Existing vehicles stay where they
    /// are; a later `start` seeds fresh initial offsets rather than
    /// resuming the previous schedule.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        for state in self.lanes.values_mut() {
            state.next_attempt_at = None;
        }
        self.next_cleanup_at = None;
        info!("traffic engine stopped");
    }

    /// Clear all vehicles and blocked lanes without touching the timers.
    pub fn reset(&mut self) {
        for state in self.lanes.values_mut() {
            state.clear();
        }
        self.blocked_lanes.clear();
        self.publish();
    }

    /// Schedule each enabled lane's first spawn attempt with a fresh
    /// random offset, and the next cleanup sweep.
    fn seed_timers(&mut self) {
        let (offset_min, offset_max) = self.config.flow.initial_offset_range_ms;
        let lanes: Vec<usize> = self.lanes.keys().copied().collect();
        for lane in lanes {
            let due = if self.config.flow.lane_enabled(lane) {
                Some(self.time_ms + self.random_offset(offset_min, offset_max))
            } else {
                None
            };
            if let Some(state) = self.lanes.get_mut(&lane) {
                state.next_attempt_at = due;
            }
        }
        self.next_cleanup_at = Some(self.time_ms + self.config.flow.cleanup_interval_ms.max(1));
    }

    fn random_offset(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        self.random_range(min as f64..max as f64).round() as u64
    }

    // ------------------------------------------------------------------
    // Clock pump
    // ------------------------------------------------------------------

    /// Advance the engine clock by `delta_ms` and run every timer that
    /// comes due. Scheduled work only fires while started, so a tick
    /// arriving after `stop` cannot resurrect the timers.
    pub fn tick(&mut self, delta_ms: u64) {
        self.time_ms += delta_ms;
        if !self.started {
            return;
        }
        let lanes: Vec<usize> = self.lanes.keys().copied().collect();
        for lane in lanes {
            self.run_due_attempt(lane);
        }
        self.run_cleanup_if_due();
    }

    /// Current value of the engine clock.
    pub fn now_ms(&self) -> u64 {
        self.time_ms
    }

    fn run_due_attempt(&mut self, lane: usize) {
        match self.lanes.get(&lane).and_then(|s| s.next_attempt_at) {
            Some(due) if due <= self.time_ms => {}
            _ => return,
        }
        self.attempt_spawn(lane);
        // Regardless of the attempt's outcome, reschedule from the actual
        // fire time, matching one-shot timer semantics.
        let delay = self.next_spawn_delay(lane);
        if let Some(state) = self.lanes.get_mut(&lane) {
            state.next_attempt_at = Some(self.time_ms + delay);
        }
    }

    /// One spawn attempt for a lane: headway, capacity, and block checks,
    /// then vehicle creation.
    fn attempt_spawn(&mut self, lane: usize) {
        let now = self.time_ms;
        let headway_min_progress = self.config.flow.headway_min_progress;
        let headway_min_time_fraction = self.config.flow.headway_min_time_fraction;
        let cap = if self.config.flow.no_overlap_strict {
            1
        } else {
            self.config.flow.max_cars_per_lane_visible
        };

        let Some(state) = self.lanes.get(&lane) else {
            return;
        };

        // Headway: the newest ordinary vehicle must have cleared enough of
        // the lane before another may enter behind it.
        if let Some(last) = state.last_regular() {
            let min_elapsed = last.animation_duration_ms as f64 * headway_min_time_fraction;
            if last.progress(now) < headway_min_progress
                || (last.elapsed_ms(now) as f64) < min_elapsed
            {
                debug!("lane {lane}: spawn skipped (headway)");
                return;
            }
        }

        let active = state.active_regular_count();
        if active >= cap {
            debug!("lane {lane}: spawn skipped (capacity {active}/{cap})");
            return;
        }

        if self.blocked_lanes.contains(&lane) {
            debug!("lane {lane}: spawn skipped (blocked)");
            return;
        }

        let duration = self.roll_duration(lane);
        let suffix = self.random_suffix();
        let sprite = self.pick_sprite();
        let id = VehicleId::generate(lane, now, suffix);
        let vehicle = Vehicle::new(id.clone(), lane, now, duration, sprite);
        if let Some(state) = self.lanes.get_mut(&lane) {
            state.vehicles.push(vehicle);
        }
        self.stats.total_spawned += 1;
        debug!("lane {lane}: spawned {id} ({duration} ms crossing)");
        self.publish();
    }

    /// Poisson inter-arrival draw with uniform jitter, floored at the
    /// configured minimum delay.
    fn next_spawn_delay(&mut self, lane: usize) -> u64 {
        let mean = self.config.flow.mean_interval_for(lane) as f64
            * self.config.flow.spawn_rate_multiplier;
        let jitter_ms = self.config.flow.arrival_jitter_ms as f64;
        let min_delay = self.config.flow.min_delay_ms as f64;

        // u in (0, 1]; random_range yields [0, 1)
        let u = 1.0 - self.random_range(0.0..1.0);
        let exponential = -u.ln() * mean.max(1.0);
        let jitter = if jitter_ms > 0.0 {
            self.random_range(-jitter_ms..jitter_ms)
        } else {
            0.0
        };
        (exponential + jitter).max(min_delay).max(1.0).round() as u64
    }

    /// Crossing duration: lane base pattern x global multiplier x random
    /// jitter, floored at the minimum speed.
    fn roll_duration(&mut self, lane: usize) -> u64 {
        let base = self.config.speed.base_duration_for(lane) as f64;
        let multiplier = self.config.speed.speed_multiplier;
        let jitter = self.config.speed.speed_jitter;
        let factor = if jitter > 0.0 {
            self.random_range((1.0 - jitter)..(1.0 + jitter))
        } else {
            1.0
        };
        let duration = (base * multiplier * factor).round() as u64;
        duration.max(self.config.speed.min_speed_ms)
    }

    /// Remove finished vehicles from every lane; publishes once if
    /// anything changed. Vehicles are never removed for staleness alone.
    fn run_cleanup_if_due(&mut self) {
        let Some(due) = self.next_cleanup_at else {
            return;
        };
        if due > self.time_ms {
            return;
        }
        let mut removed = 0;
        for state in self.lanes.values_mut() {
            removed += state.sweep_done();
        }
        self.next_cleanup_at = Some(self.time_ms + self.config.flow.cleanup_interval_ms.max(1));
        if removed > 0 {
            self.stats.total_retired += removed as u64;
            debug!("cleanup retired {removed} finished vehicles");
            self.publish();
        }
    }

    // ------------------------------------------------------------------
    // Command API
    // ------------------------------------------------------------------

    /// Flag a vehicle's crossing animation as finished. The vehicle stays
    /// visible to snapshot consumers until the next cleanup sweep.
    /// Idempotent; unknown lanes or ids are ignored.
    pub fn mark_done(&mut self, lane: usize, id: &VehicleId) {
        let Some(state) = self.lanes.get_mut(&lane) else {
            return;
        };
        let Some(vehicle) = state.vehicles.iter_mut().find(|v| &v.id == id) else {
            return;
        };
        if vehicle.done {
            return;
        }
        vehicle.done = true;
        self.publish();
    }

    /// Stage a crash visual: append a crash-flagged vehicle regardless of
    /// headway, capacity, or blocks. Duration is floored at
    /// [`CRASH_CAR_MIN_DURATION_MS`].
    pub fn inject_crash_car(&mut self, lane: usize, duration_ms: u64) -> Option<VehicleId> {
        self.inject(lane, duration_ms.max(CRASH_CAR_MIN_DURATION_MS), true, false)
    }

    /// Stage a blocked-lane showcase vehicle, bypassing the same checks.
    /// Duration is floored at [`SHOWCASE_CAR_MIN_DURATION_MS`].
    pub fn inject_blocked_car(&mut self, lane: usize, duration_ms: u64) -> Option<VehicleId> {
        self.inject(
            lane,
            duration_ms.max(SHOWCASE_CAR_MIN_DURATION_MS),
            false,
            true,
        )
    }

    fn inject(
        &mut self,
        lane: usize,
        duration_ms: u64,
        is_crash: bool,
        is_blocked_showcase: bool,
    ) -> Option<VehicleId> {
        if !self.lanes.contains_key(&lane) {
            return None;
        }
        let now = self.time_ms;
        let suffix = self.random_suffix();
        let sprite = self.pick_sprite();
        let id = VehicleId::generate(lane, now, suffix);
        let mut vehicle = Vehicle::new(id.clone(), lane, now, duration_ms, sprite);
        vehicle.is_crash = is_crash;
        vehicle.is_blocked_showcase = is_blocked_showcase;
        self.lanes.get_mut(&lane)?.vehicles.push(vehicle);
        self.stats.total_injected += 1;
        debug!(
            "lane {lane}: injected {} vehicle {id} ({duration_ms} ms crossing)",
            if is_crash { "crash" } else { "showcase" }
        );
        self.publish();
        Some(id)
    }

    /// Bernoulli draw against the configured showcase probability; on a
    /// hit, injects a showcase vehicle crossing at the lane's ordinary
    /// pace. Not guaranteed to inject.
    pub fn maybe_spawn_blocked_showcase(&mut self, lane: usize) -> Option<VehicleId> {
        if !self.lanes.contains_key(&lane) {
            return None;
        }
        let probability = self.config.flow.blocked_showcase_probability;
        if self.random_range(0.0..1.0) >= probability {
            return None;
        }
        let duration = self.roll_duration(lane);
        self.inject_blocked_car(lane, duration)
    }

    /// Block or unblock ordinary spawns for a lane. Vehicles already in
    /// the lane are untouched; injections still work on a blocked lane.
    pub fn set_lane_blocked(&mut self, lane: usize, blocked: bool) {
        if !self.lanes.contains_key(&lane) {
            return;
        }
        let changed = if blocked {
            self.blocked_lanes.insert(lane)
        } else {
            self.blocked_lanes.remove(&lane)
        };
        if changed {
            debug!(
                "lane {lane} {}",
                if blocked { "blocked" } else { "unblocked" }
            );
            self.publish();
        }
    }

    /// Empty every lane's vehicle list (game restart).
    pub fn clear_all_cars(&mut self) {
        for state in self.lanes.values_mut() {
            state.clear();
        }
        self.publish();
    }

    /// Shorten a vehicle's remaining crossing time so it exits sooner.
    ///
    /// The remaining time shrinks to [`BOOST_REMAINING_FACTOR`] of itself
    /// (never below [`BOOST_MIN_REMAINING_MS`]); elapsed time is
    /// preserved, so the vehicle's visible progress can only move
    /// forward, never backward. No-op for finished or unknown vehicles
    /// and for vehicles that have already used up their duration.
    pub fn boost_car_speed(&mut self, lane: usize, id: &VehicleId) {
        let now = self.time_ms;
        let Some(state) = self.lanes.get_mut(&lane) else {
            return;
        };
        let Some(vehicle) = state.vehicles.iter_mut().find(|v| &v.id == id) else {
            return;
        };
        if vehicle.done {
            return;
        }
        let elapsed = vehicle.elapsed_ms(now);
        if elapsed >= vehicle.animation_duration_ms {
            return;
        }
        let remaining = vehicle.animation_duration_ms - elapsed;
        let shortened =
            ((remaining as f64 * BOOST_REMAINING_FACTOR).round() as u64).max(BOOST_MIN_REMAINING_MS);
        if shortened >= remaining {
            return;
        }
        vehicle.animation_duration_ms = elapsed + shortened;
        debug!("lane {lane}: boosted {id}, {remaining} ms remaining cut to {shortened} ms");
        self.publish();
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Register a snapshot observer. The callback is invoked immediately
    /// with the current state, so new subscribers are never stale, then
    /// on every mutation until `unsubscribe`.
    pub fn subscribe(&mut self, callback: impl FnMut(&TrafficSnapshot) + 'static) -> SubscriberId {
        let id = self.subscribers.add(Box::new(callback));
        let snapshot = self.snapshot();
        self.subscribers.notify_one(id, &snapshot);
        id
    }

    /// Remove a subscriber registered with [`TrafficEngine::subscribe`].
    /// Unknown ids are ignored.
    pub fn unsubscribe(&mut self, id: SubscriberId) {
        self.subscribers.remove(id);
    }

    /// Defensive copy of every lane's vehicle list. Mutating the returned
    /// value never touches engine state.
    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            lanes: self
                .lanes
                .iter()
                .map(|(lane, state)| (*lane, state.vehicles.clone()))
                .collect(),
        }
    }

    fn publish(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        self.subscribers.notify_all(&snapshot);
    }

    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_lane_blocked(&self, lane: usize) -> bool {
        self.blocked_lanes.contains(&lane)
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    // ------------------------------------------------------------------
    // Console output
    // ------------------------------------------------------------------

    /// Print a summary of the current traffic state.
    pub fn print_summary(&self) {
        println!("=== Traffic Engine Summary ===");
        println!(
            "Clock: {:.1}s, started: {}",
            self.time_ms as f64 / 1000.0,
            self.started
        );
        println!(
            "Spawned: {}, injected: {}, retired: {}",
            self.stats.total_spawned, self.stats.total_injected, self.stats.total_retired
        );
        for (lane, state) in &self.lanes {
            let active = state.active_regular_count();
            let total = state.vehicles.len();
            let blocked = if self.blocked_lanes.contains(lane) {
                " [blocked]"
            } else {
                ""
            };
            println!("  Lane {lane}: {active} active / {total} listed{blocked}");
        }
    }

    /// Draw the lanes as ASCII rows, one row per lane with vehicles
    /// placed by crossing progress.
    pub fn draw_map(&self) {
        const WIDTH: usize = 50;

        println!("\n=== Lane Map ===");
        println!("Legend: >=car, X=crash, B=showcase, .=finished, #=lane blocked");
        println!("  0 |{}| sidewalk", "-".repeat(WIDTH));
        for (lane, state) in &self.lanes {
            let mut row = vec!['-'; WIDTH];
            for vehicle in &state.vehicles {
                let col = ((vehicle.progress(self.time_ms) * (WIDTH - 1) as f64).round() as usize)
                    .min(WIDTH - 1);
                row[col] = if vehicle.done {
                    '.'
                } else if vehicle.is_crash {
                    'X'
                } else if vehicle.is_blocked_showcase {
                    'B'
                } else {
                    '>'
                };
            }
            let marker = if self.blocked_lanes.contains(lane) {
                '#'
            } else {
                ' '
            };
            let line: String = row.iter().collect();
            println!("{marker} {lane} |{line}|");
        }
        println!();
    }
}
