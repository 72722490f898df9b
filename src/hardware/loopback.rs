// src/hardware/loopback.rs - Simulated joints that feed commands back as state
use std::time::Duration;

use super::{HardwareError, InterfaceBuffers, InterfaceType, JointHardware};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopbackMode {
    /// State follows the command within the same cycle.
    Mirror,
    /// State never moves.
    Frozen,
    /// State covers `ratio` of the remaining distance to the command each cycle.
    Lagged { ratio: f64 },
}

/// Single-integrator joint model used by tests and the host binary.
///
/// Position commands are tracked directly, velocity commands are integrated
/// into position and effort commands are treated as acceleration of a unit mass.
#[derive(Debug, Clone)]
pub struct LoopbackHardware {
    mode: LoopbackMode,
    position: Vec<f64>,
    velocity: Vec<f64>,
    acceleration: Vec<f64>,
}

impl LoopbackHardware {
    pub fn new(initial_positions: Vec<f64>, mode: LoopbackMode) -> Self {
        let dof = initial_positions.len();
        Self {
            mode,
            position: initial_positions,
            velocity: vec![0.0; dof],
            acceleration: vec![0.0; dof],
        }
    }

    pub fn mode(&self) -> LoopbackMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: LoopbackMode) {
        self.mode = mode;
    }

    pub fn positions(&self) -> &[f64] {
        &self.position
    }

    pub fn velocities(&self) -> &[f64] {
        &self.velocity
    }

    /// Move the simulated joints, as if pushed by an external force.
    pub fn set_positions(&mut self, positions: &[f64]) -> Result<(), HardwareError> {
        if positions.len() != self.position.len() {
            return Err(HardwareError::JointCount {
                expected: self.position.len(),
                actual: positions.len(),
            });
        }
        self.position.copy_from_slice(positions);
        self.velocity.fill(0.0);
        self.acceleration.fill(0.0);
        Ok(())
    }

    fn check_len(&self, values: &[f64]) -> Result<(), HardwareError> {
        if values.len() == self.position.len() {
            Ok(())
        } else {
            Err(HardwareError::JointCount {
                expected: self.position.len(),
                actual: values.len(),
            })
        }
    }
}

impl JointHardware for LoopbackHardware {
    fn read(&mut self, state: &mut InterfaceBuffers, _period: Duration) -> Result<(), HardwareError> {
        for (interface, values) in [
            (InterfaceType::Position, &self.position),
            (InterfaceType::Velocity, &self.velocity),
            (InterfaceType::Acceleration, &self.acceleration),
        ] {
            if state.has(interface) {
                state.set(interface, values)?;
            }
        }
        Ok(())
    }

    fn write(&mut self, command: &InterfaceBuffers, period: Duration) -> Result<(), HardwareError> {
        let ratio = match self.mode {
            LoopbackMode::Frozen => return Ok(()),
            LoopbackMode::Mirror => 1.0,
            LoopbackMode::Lagged { ratio } => ratio.clamp(0.0, 1.0),
        };
        let dt = period.as_secs_f64();
        let velocity_command = command.get(InterfaceType::Velocity);
        let acceleration_command = command.get(InterfaceType::Acceleration);

        if let Some(positions) = command.get(InterfaceType::Position) {
            self.check_len(positions)?;
            for (j, target) in positions.iter().enumerate() {
                if target.is_nan() {
                    continue;
                }
                let previous = self.position[j];
                self.position[j] = previous + (target - previous) * ratio;
                self.velocity[j] = match velocity_command.and_then(|v| v.get(j).copied()) {
                    Some(v) if !v.is_nan() => v,
                    _ if dt > 0.0 => (self.position[j] - previous) / dt,
                    _ => 0.0,
                };
                self.acceleration[j] = match acceleration_command.and_then(|a| a.get(j).copied()) {
                    Some(a) if !a.is_nan() => a,
                    _ => 0.0,
                };
            }
        } else if let Some(velocities) = velocity_command {
            self.check_len(velocities)?;
            for (j, target) in velocities.iter().enumerate() {
                if target.is_nan() {
                    continue;
                }
                let previous = self.velocity[j];
                self.velocity[j] = previous + (target - previous) * ratio;
                self.acceleration[j] = if dt > 0.0 { (self.velocity[j] - previous) / dt } else { 0.0 };
                self.position[j] += self.velocity[j] * dt;
            }
        } else if let Some(efforts) = command.get(InterfaceType::Effort) {
            self.check_len(efforts)?;
            for (j, effort) in efforts.iter().enumerate() {
                if effort.is_nan() {
                    continue;
                }
                self.acceleration[j] = effort * ratio;
                self.velocity[j] += self.acceleration[j] * dt;
                self.position[j] += self.velocity[j] * dt;
            }
        }
        Ok(())
    }
}
