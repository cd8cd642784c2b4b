//! Standalone traffic engine module
//!
//! This module contains the core traffic simulation that the Chicken Road
//! client renders: lane scheduling, vehicle lifecycle, and the command
//! surface the game-logic layer uses to choreograph crashes, blocked
//! lanes, and speed boosts. It has no view-layer dependencies and can be
//! exercised via console without booting any UI.

mod config;
mod engine;
mod lane;
mod subscribers;
mod types;

pub use config::{EngineConfig, FlowConfig, SpeedConfig};
pub use engine::{EngineStats, TrafficEngine};
pub use subscribers::SubscriberId;
pub use types::{
    TrafficSnapshot, Vehicle, VehicleId, BOOST_MIN_REMAINING_MS, BOOST_REMAINING_FACTOR,
    CRASH_CAR_MIN_DURATION_MS, SHOWCASE_CAR_MIN_DURATION_MS,
};
