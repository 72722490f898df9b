//! # Controller Configuration
//!
//! The controller is configured from a single TOML file.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! joints = ["shoulder", "elbow", "wrist"]
//! command_interfaces = ["position"]
//! state_interfaces = ["position", "velocity"]
//! update_rate = 100
//! interpolation_method = "splines"
//!
//! [speed_scaling]
//! initial_scaling_factor = 1.0
//!
//! [constraints]
//! goal_time = 0.5
//! stopped_velocity_tolerance = 0.01
//!
//! [constraints.joints.shoulder]
//! trajectory = 0.05
//! goal = 0.01
//!
//! [gains.shoulder]
//! p = 5.0
//! ff_velocity_scale = 1.0
//! ```
//!
//! - Tolerances and gains are keyed by joint name and must refer to configured joints.
//! - Gains are only used when the controller runs the closed-loop adapter
//!   (velocity-only or effort command interfaces).

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::hardware::InterfaceType;
use crate::motion::interpolation::InterpolationMethod;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("At least one joint must be configured")]
    NoJoints,
    #[error("Joint '{0}' is listed more than once")]
    DuplicateJoint(String),
    #[error("Invalid command interfaces: {0}")]
    CommandInterfaces(String),
    #[error("Invalid state interfaces: {0}")]
    StateInterfaces(String),
    #[error("'{section}' refers to unknown joint '{joint}'")]
    UnknownJoint { section: &'static str, joint: String },
    #[error("Invalid value for '{0}': {1}")]
    InvalidValue(&'static str, String),
}

/// Full controller configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ControllerConfig {
    #[serde(default)]
    pub joints: Vec<String>,
    #[serde(default = "default_command_interfaces")]
    pub command_interfaces: Vec<InterfaceType>,
    #[serde(default = "default_state_interfaces")]
    pub state_interfaces: Vec<InterfaceType>,
    /// Control loop frequency in Hz.
    #[serde(default = "default_update_rate")]
    pub update_rate: u32,
    #[serde(default)]
    pub interpolation_method: InterpolationMethod,
    #[serde(default)]
    pub allow_partial_joints_goal: bool,
    #[serde(default)]
    pub allow_nonzero_velocity_at_trajectory_end: bool,
    /// Start new trajectories from the last command instead of the measured state.
    #[serde(default)]
    pub open_loop_control: bool,
    #[serde(default = "default_true")]
    pub start_with_holding: bool,
    #[serde(default)]
    pub speed_scaling: SpeedScalingConfig,
    #[serde(default)]
    pub constraints: ConstraintsConfig,
    #[serde(default)]
    pub gains: HashMap<String, GainsConfig>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            joints: Vec::new(),
            command_interfaces: default_command_interfaces(),
            state_interfaces: default_state_interfaces(),
            update_rate: default_update_rate(),
            interpolation_method: InterpolationMethod::default(),
            allow_partial_joints_goal: false,
            allow_nonzero_velocity_at_trajectory_end: false,
            open_loop_control: false,
            start_with_holding: true,
            speed_scaling: SpeedScalingConfig::default(),
            constraints: ConstraintsConfig::default(),
            gains: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SpeedScalingConfig {
    #[serde(default = "default_scaling_factor")]
    pub initial_scaling_factor: f64,
}

impl Default for SpeedScalingConfig {
    fn default() -> Self {
        Self {
            initial_scaling_factor: default_scaling_factor(),
        }
    }
}

/// Default tolerances, overridable per goal.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ConstraintsConfig {
    /// Seconds allowed past the end of a trajectory; zero means no deadline.
    #[serde(default)]
    pub goal_time: f64,
    #[serde(default = "default_stopped_velocity_tolerance")]
    pub stopped_velocity_tolerance: f64,
    #[serde(default)]
    pub joints: HashMap<String, JointConstraints>,
}

impl Default for ConstraintsConfig {
    fn default() -> Self {
        Self {
            goal_time: 0.0,
            stopped_velocity_tolerance: default_stopped_velocity_tolerance(),
            joints: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
pub struct JointConstraints {
    /// Position tolerance while moving.
    #[serde(default)]
    pub trajectory: f64,
    /// Position tolerance at the end.
    #[serde(default)]
    pub goal: f64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
pub struct GainsConfig {
    #[serde(default)]
    pub p: f64,
    #[serde(default)]
    pub i: f64,
    #[serde(default)]
    pub d: f64,
    #[serde(default)]
    pub i_clamp: f64,
    #[serde(default)]
    pub ff_velocity_scale: f64,
}

impl ControllerConfig {
    pub fn dof(&self) -> usize {
        self.joints.len()
    }

    pub fn has_command_interface(&self, interface: InterfaceType) -> bool {
        self.command_interfaces.contains(&interface)
    }

    pub fn has_state_interface(&self, interface: InterfaceType) -> bool {
        self.state_interfaces.contains(&interface)
    }

    /// Position error is turned into velocity or effort commands by PID.
    pub fn uses_closed_loop_adapter(&self) -> bool {
        use InterfaceType::*;
        let velocity_only = self.command_interfaces == [Velocity];
        (velocity_only && !self.open_loop_control) || self.has_command_interface(Effort)
    }

    /// Validate joints, interface combinations and numeric limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        use InterfaceType::*;

        if self.joints.is_empty() {
            return Err(ConfigError::NoJoints);
        }
        for (i, joint) in self.joints.iter().enumerate() {
            if self.joints[..i].contains(joint) {
                return Err(ConfigError::DuplicateJoint(joint.clone()));
            }
        }

        let cmd = |t| self.has_command_interface(t);
        let state = |t| self.has_state_interface(t);

        if self.command_interfaces.is_empty() {
            return Err(ConfigError::CommandInterfaces("none configured".into()));
        }
        if cmd(Effort) && self.command_interfaces.len() > 1 {
            return Err(ConfigError::CommandInterfaces(
                "'effort' cannot be combined with other command interfaces".into(),
            ));
        }
        if cmd(Acceleration) && !(cmd(Position) && cmd(Velocity)) {
            return Err(ConfigError::CommandInterfaces(
                "'acceleration' requires 'position' and 'velocity'".into(),
            ));
        }
        if cmd(Velocity) && !(self.command_interfaces.len() == 1 || cmd(Position)) {
            return Err(ConfigError::CommandInterfaces(
                "'velocity' must be used alone or together with 'position'".into(),
            ));
        }

        if self.state_interfaces.is_empty() {
            return Err(ConfigError::StateInterfaces("none configured".into()));
        }
        if state(Effort) {
            return Err(ConfigError::StateInterfaces("'effort' is not a supported state interface".into()));
        }
        if !state(Position) {
            return Err(ConfigError::StateInterfaces("'position' is required".into()));
        }
        if state(Acceleration) && !state(Velocity) {
            return Err(ConfigError::StateInterfaces(
                "'acceleration' requires 'position' and 'velocity'".into(),
            ));
        }
        let velocity_only = self.command_interfaces == [Velocity];
        if (velocity_only || cmd(Effort)) && !state(Velocity) {
            return Err(ConfigError::StateInterfaces(
                "velocity-only and effort command interfaces need 'position' and 'velocity' state".into(),
            ));
        }

        if self.update_rate == 0 {
            return Err(ConfigError::InvalidValue("update_rate", "must be > 0".into()));
        }
        let factor = self.speed_scaling.initial_scaling_factor;
        if !(factor.is_finite() && factor >= 0.0) {
            return Err(ConfigError::InvalidValue(
                "speed_scaling.initial_scaling_factor",
                format!("{} must be >= 0", factor),
            ));
        }

        let constraints = &self.constraints;
        if !(constraints.goal_time >= 0.0) {
            return Err(ConfigError::InvalidValue("constraints.goal_time", "must be >= 0".into()));
        }
        if !(constraints.stopped_velocity_tolerance >= 0.0) {
            return Err(ConfigError::InvalidValue(
                "constraints.stopped_velocity_tolerance",
                "must be >= 0".into(),
            ));
        }
        for (joint, limits) in &constraints.joints {
            if !self.joints.contains(joint) {
                return Err(ConfigError::UnknownJoint {
                    section: "constraints.joints",
                    joint: joint.clone(),
                });
            }
            if !(limits.trajectory >= 0.0 && limits.goal >= 0.0) {
                return Err(ConfigError::InvalidValue(
                    "constraints.joints",
                    format!("tolerances for '{}' must be >= 0", joint),
                ));
            }
        }
        for joint in self.gains.keys() {
            if !self.joints.contains(joint) {
                return Err(ConfigError::UnknownJoint {
                    section: "gains",
                    joint: joint.clone(),
                });
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_command_interfaces() -> Vec<InterfaceType> { vec![InterfaceType::Position] }
fn default_state_interfaces() -> Vec<InterfaceType> { vec![InterfaceType::Position, InterfaceType::Velocity] }
fn default_update_rate() -> u32 { 100 }
fn default_true() -> bool { true }
fn default_scaling_factor() -> f64 { 1.0 }
fn default_stopped_velocity_tolerance() -> f64 { 0.01 }

/// Parse a configuration from a TOML string.
pub fn parse_config(contents: &str) -> Result<ControllerConfig, ConfigError> {
    toml::from_str(contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: impl AsRef<Path>) -> Result<ControllerConfig, ConfigError> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents),
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            Err(ConfigError::Io(e))
        }
    }
}
