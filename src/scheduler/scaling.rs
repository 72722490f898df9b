// src/scheduler/scaling.rs - Trajectory time under live speed scaling
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Shared speed scaling factor.
///
/// Written from any thread, read once per control cycle without locking.
#[derive(Debug, Clone)]
pub struct SpeedScaling {
    bits: Arc<AtomicU64>,
}

impl SpeedScaling {
    pub fn new(factor: f64) -> Self {
        let factor = if factor.is_finite() && factor >= 0.0 { factor } else { 1.0 };
        Self {
            bits: Arc::new(AtomicU64::new(factor.to_bits())),
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Set a new factor. Negative or non-finite values are ignored.
    pub fn set(&self, factor: f64) -> bool {
        if !(factor.is_finite() && factor >= 0.0) {
            tracing::warn!("Ignoring invalid speed scaling factor {}", factor);
            return false;
        }
        self.bits.store(factor.to_bits(), Ordering::Relaxed);
        tracing::debug!("Speed scaling factor set to {}", factor);
        true
    }
}

impl Default for SpeedScaling {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Accumulates trajectory time and wall time for the active trajectory.
#[derive(Debug, Clone, Default)]
pub struct ScalingClock {
    trajectory_time: f64,
    wall_time: f64,
}

impl ScalingClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart both clocks at zero.
    pub fn reset(&mut self) {
        self.trajectory_time = 0.0;
        self.wall_time = 0.0;
    }

    /// Advance by one cycle. Returns the trajectory-time increment.
    pub fn advance(&mut self, period: Duration, factor: f64) -> f64 {
        let dt = period.as_secs_f64();
        let increment = dt * factor.max(0.0);
        self.wall_time += dt;
        self.trajectory_time += increment;
        increment
    }

    /// Seconds of trajectory time since the trajectory started.
    pub fn trajectory_time(&self) -> f64 {
        self.trajectory_time
    }

    /// Seconds of wall time since the trajectory started.
    pub fn wall_time(&self) -> f64 {
        self.wall_time
    }
}
