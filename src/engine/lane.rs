//! Per-lane traffic state
//!
//! Each tracked lane owns an append-only vehicle list and the deadline of
//! its next spawn attempt. Arrival order is insertion order; vehicles
//! only leave through the cleanup sweep.

use super::types::Vehicle;

#[derive(Debug, Default)]
pub(crate) struct LaneState {
    /// Vehicles in temporal arrival order.
    pub vehicles: Vec<Vehicle>,
    /// Engine-clock deadline of the next spawn attempt; `None` while the
    /// engine is stopped or the lane is disabled.
    pub next_attempt_at: Option<u64>,
}

impl LaneState {
    /// Unfinished ordinary vehicles (crash and showcase cars never count).
    pub fn active_regular_count(&self) -> usize {
        self.vehicles
            .iter()
            .filter(|v| v.counts_for_occupancy())
            .count()
    }

    /// The most recent ordinary vehicle, used for the headway check.
    pub fn last_regular(&self) -> Option<&Vehicle> {
        self.vehicles.iter().rev().find(|v| v.counts_for_occupancy())
    }

    pub fn clear(&mut self) {
        self.vehicles.clear();
    }

    /// Drop finished vehicles; returns how many were removed.
    pub fn sweep_done(&mut self) -> usize {
        let before = self.vehicles.len();
        self.vehicles.retain(|v| !v.done);
        before - self.vehicles.len()
    }
}
