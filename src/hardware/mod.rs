// src/hardware/mod.rs - Joint state and command interfaces
pub mod loopback;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use loopback::{LoopbackHardware, LoopbackMode};

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Interface '{0}' is not available")]
    MissingInterface(InterfaceType),
    #[error("Expected {expected} joints, got {actual}")]
    JointCount { expected: usize, actual: usize },
}

/// Kind of value exchanged with an actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Position,
    Velocity,
    Acceleration,
    Effort,
}

impl InterfaceType {
    pub const ALL: [InterfaceType; 4] = [
        InterfaceType::Position,
        InterfaceType::Velocity,
        InterfaceType::Acceleration,
        InterfaceType::Effort,
    ];
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceType::Position => write!(f, "position"),
            InterfaceType::Velocity => write!(f, "velocity"),
            InterfaceType::Acceleration => write!(f, "acceleration"),
            InterfaceType::Effort => write!(f, "effort"),
        }
    }
}

/// One buffer per claimed interface type, each sized to the joint count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceBuffers {
    position: Option<Vec<f64>>,
    velocity: Option<Vec<f64>>,
    acceleration: Option<Vec<f64>>,
    effort: Option<Vec<f64>>,
}

impl InterfaceBuffers {
    pub fn new(interfaces: &[InterfaceType], dof: usize, initial: f64) -> Self {
        let mut buffers = Self::default();
        for interface in interfaces {
            *buffers.slot_mut(*interface) = Some(vec![initial; dof]);
        }
        buffers
    }

    fn slot(&self, interface: InterfaceType) -> &Option<Vec<f64>> {
        match interface {
            InterfaceType::Position => &self.position,
            InterfaceType::Velocity => &self.velocity,
            InterfaceType::Acceleration => &self.acceleration,
            InterfaceType::Effort => &self.effort,
        }
    }

    fn slot_mut(&mut self, interface: InterfaceType) -> &mut Option<Vec<f64>> {
        match interface {
            InterfaceType::Position => &mut self.position,
            InterfaceType::Velocity => &mut self.velocity,
            InterfaceType::Acceleration => &mut self.acceleration,
            InterfaceType::Effort => &mut self.effort,
        }
    }

    pub fn has(&self, interface: InterfaceType) -> bool {
        self.slot(interface).is_some()
    }

    pub fn get(&self, interface: InterfaceType) -> Option<&[f64]> {
        self.slot(interface).as_deref()
    }

    pub fn get_mut(&mut self, interface: InterfaceType) -> Option<&mut [f64]> {
        self.slot_mut(interface).as_deref_mut()
    }

    /// Overwrite an interface from `values`. Fails if the interface is not claimed.
    pub fn set(&mut self, interface: InterfaceType, values: &[f64]) -> Result<(), HardwareError> {
        let buffer = self
            .get_mut(interface)
            .ok_or(HardwareError::MissingInterface(interface))?;
        if buffer.len() != values.len() {
            return Err(HardwareError::JointCount {
                expected: buffer.len(),
                actual: values.len(),
            });
        }
        buffer.copy_from_slice(values);
        Ok(())
    }

    /// Set every value of an interface, if claimed.
    pub fn fill(&mut self, interface: InterfaceType, value: f64) {
        if let Some(buffer) = self.get_mut(interface) {
            buffer.fill(value);
        }
    }

    pub fn claimed(&self) -> impl Iterator<Item = InterfaceType> + '_ {
        InterfaceType::ALL.into_iter().filter(|t| self.has(*t))
    }
}

/// State and command buffers shared between hardware and controller.
#[derive(Debug, Clone, PartialEq)]
pub struct JointInterfaces {
    pub joint_names: Vec<String>,
    pub state: InterfaceBuffers,
    pub command: InterfaceBuffers,
}

impl JointInterfaces {
    /// Command buffers start out as NaN so a fresh controller can tell "never
    /// commanded" from a running command.
    pub fn new(joint_names: Vec<String>, command: &[InterfaceType], state: &[InterfaceType]) -> Self {
        let dof = joint_names.len();
        Self {
            joint_names,
            state: InterfaceBuffers::new(state, dof, 0.0),
            command: InterfaceBuffers::new(command, dof, f64::NAN),
        }
    }

    pub fn dof(&self) -> usize {
        self.joint_names.len()
    }
}

/// An actuator backend driven by the control loop.
pub trait JointHardware: Send {
    /// Fill the state buffers with the latest measurements.
    fn read(&mut self, state: &mut InterfaceBuffers, period: Duration) -> Result<(), HardwareError>;
    /// Consume the command buffers.
    fn write(&mut self, command: &InterfaceBuffers, period: Duration) -> Result<(), HardwareError>;
}
