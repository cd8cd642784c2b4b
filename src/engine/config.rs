//! Engine configuration
//!
//! Plain-data tunables read once at `init` time. The engine itself
//! accepts any config without complaint (invalid values degrade to
//! defensive behavior, never errors); `validate` exists for drivers that
//! load user-supplied files.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Complete configuration bundle for [`TrafficEngine::init`].
///
/// [`TrafficEngine::init`]: super::TrafficEngine::init
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Spawn scheduling and lane-occupancy rules.
    pub flow: FlowConfig,
    /// Crossing-duration rules.
    pub speed: SpeedConfig,
}

/// Spawn scheduling and lane-occupancy rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Mean inter-arrival time per lane (entry N-1 serves lane N).
    pub mean_interval_ms_by_lane: Vec<u64>,
    /// Fallback mean for lanes beyond the per-lane list.
    pub base_mean_interval_ms: u64,
    /// Scales every mean interval; smaller means busier lanes.
    pub spawn_rate_multiplier: f64,
    /// Uniform jitter applied to each scheduled inter-arrival delay.
    pub arrival_jitter_ms: u64,
    /// Minimum fractional progress the newest vehicle in a lane must have
    /// reached before another may spawn.
    pub headway_min_progress: f64,
    /// Minimum elapsed time, as a fraction of the newest vehicle's
    /// crossing duration, before another may spawn.
    pub headway_min_time_fraction: f64,
    /// Hard cap on concurrent unfinished vehicles per lane.
    pub max_cars_per_lane_visible: usize,
    /// Floor on any computed scheduling delay.
    pub min_delay_ms: u64,
    /// Explicit per-lane spawn switch (entry N-1 serves lane N); lanes
    /// beyond the list default to enabled.
    pub per_lane_spawn_enabled: Vec<bool>,
    /// Caps every lane at exactly one concurrent unfinished vehicle.
    pub no_overlap_strict: bool,
    /// Uniform range for a lane's very first spawn delay, so lanes
    /// desynchronize.
    pub initial_offset_range_ms: (u64, u64),
    /// Period of the sweep that removes finished vehicles.
    pub cleanup_interval_ms: u64,
    /// Chance that blocking a lane injects a showcase vehicle.
    pub blocked_showcase_probability: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            mean_interval_ms_by_lane: vec![2400, 2000, 2700, 1800, 2200],
            base_mean_interval_ms: 2500,
            spawn_rate_multiplier: 1.0,
            arrival_jitter_ms: 400,
            headway_min_progress: 0.35,
            headway_min_time_fraction: 0.30,
            max_cars_per_lane_visible: 2,
            min_delay_ms: 250,
            per_lane_spawn_enabled: Vec::new(),
            no_overlap_strict: false,
            initial_offset_range_ms: (200, 1500),
            cleanup_interval_ms: 1000,
            blocked_showcase_probability: 0.35,
        }
    }
}

impl FlowConfig {
    /// Mean inter-arrival time for a lane, falling back to the base mean
    /// when the per-lane list has no entry.
    pub fn mean_interval_for(&self, lane: usize) -> u64 {
        let idx = lane.saturating_sub(1);
        self.mean_interval_ms_by_lane
            .get(idx)
            .copied()
            .unwrap_or(self.base_mean_interval_ms)
    }

    /// Whether ordinary spawning is enabled for a lane.
    pub fn lane_enabled(&self, lane: usize) -> bool {
        let idx = lane.saturating_sub(1);
        self.per_lane_spawn_enabled.get(idx).copied().unwrap_or(true)
    }
}

/// Crossing-duration rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeedConfig {
    /// Base crossing durations; the pattern cycles across lanes.
    pub lane_speed_pattern_ms: Vec<u64>,
    /// Global scale on every crossing duration.
    pub speed_multiplier: f64,
    /// Per-spawn jitter fraction; durations scale by a uniform factor in
    /// [1 - jitter, 1 + jitter].
    pub speed_jitter: f64,
    /// Floor on any crossing duration.
    pub min_speed_ms: u64,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            lane_speed_pattern_ms: vec![2600, 2100, 2900, 1900, 2400],
            speed_multiplier: 1.0,
            speed_jitter: 0.15,
            min_speed_ms: 900,
        }
    }
}

impl SpeedConfig {
    /// Base crossing duration for a lane. The pattern repeats across
    /// lanes; an empty pattern degrades to the minimum speed.
    pub fn base_duration_for(&self, lane: usize) -> u64 {
        if self.lane_speed_pattern_ms.is_empty() {
            return self.min_speed_ms;
        }
        let idx = lane.saturating_sub(1) % self.lane_speed_pattern_ms.len();
        self.lane_speed_pattern_ms[idx]
    }
}

impl EngineConfig {
    /// Load a config from a JSON file. Missing fields fall back to the
    /// defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Sanity checks for user-supplied configs.
    pub fn validate(&self) -> Result<()> {
        let flow = &self.flow;
        if !(flow.spawn_rate_multiplier.is_finite() && flow.spawn_rate_multiplier > 0.0) {
            bail!("spawn_rate_multiplier must be positive");
        }
        if !(0.0..=1.0).contains(&flow.headway_min_progress) {
            bail!("headway_min_progress must be within [0, 1]");
        }
        if !(flow.headway_min_time_fraction.is_finite() && flow.headway_min_time_fraction >= 0.0) {
            bail!("headway_min_time_fraction must be non-negative");
        }
        if flow.max_cars_per_lane_visible == 0 {
            bail!("max_cars_per_lane_visible must be at least 1");
        }
        if flow.initial_offset_range_ms.0 > flow.initial_offset_range_ms.1 {
            bail!("initial_offset_range_ms must be ordered (min, max)");
        }
        if flow.cleanup_interval_ms == 0 {
            bail!("cleanup_interval_ms must be positive");
        }
        if !(0.0..=1.0).contains(&flow.blocked_showcase_probability) {
            bail!("blocked_showcase_probability must be within [0, 1]");
        }

        let speed = &self.speed;
        if !(speed.speed_multiplier.is_finite() && speed.speed_multiplier > 0.0) {
            bail!("speed_multiplier must be positive");
        }
        if !(0.0..1.0).contains(&speed.speed_jitter) {
            bail!("speed_jitter must be within [0, 1)");
        }
        if speed.min_speed_ms == 0 {
            bail!("min_speed_ms must be positive");
        }
        Ok(())
    }
}
