// src/scheduler/mod.rs - Control loop timing
pub mod control_loop;
pub mod scaling;

pub use control_loop::{ControlLoop, ControlLoopError};
pub use scaling::{ScalingClock, SpeedScaling};
