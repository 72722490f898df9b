// src/communication/validation.rs - Structural checks on incoming trajectories
use std::time::Duration;
use thiserror::Error;

use super::ResultCode;
use crate::config::ControllerConfig;
use crate::hardware::InterfaceType;
use crate::motion::tolerances::ToleranceError;
use crate::motion::trajectory::{JointTrajectory, JointTrajectoryPoint};

/// Why a goal was refused. Decided from the message alone, before execution.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GoalRejection {
    #[error("Controller is not active")]
    ControllerInactive,
    #[error("Empty joint names on incoming trajectory")]
    EmptyJointNames,
    #[error("Trajectory has no points")]
    EmptyTrajectory,
    #[error("Incoming trajectory has {actual} joints, the controller expects {expected}")]
    JointCountMismatch { expected: usize, actual: usize },
    #[error("Incoming joint '{0}' is not handled by this controller")]
    UnknownJoint(String),
    #[error("Joint '{0}' appears more than once")]
    DuplicateJoint(String),
    #[error("Time of point #{index} ({current:?}) is not after the previous point ({previous:?})")]
    TimeNotIncreasing {
        index: usize,
        previous: Duration,
        current: Duration,
    },
    #[error("Point #{index} has {actual} {field}, expected {expected}")]
    FieldSize {
        index: usize,
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Point #{index} carries effort, but the controller has no effort command interface")]
    EffortNotSupported { index: usize },
    #[error("Point #{index} has a non-finite {field} value")]
    NonFinite { index: usize, field: &'static str },
    #[error("Velocity of the last point for joint '{joint}' is {velocity}, but must be zero")]
    NonzeroEndVelocity { joint: String, velocity: f64 },
    #[error("Invalid tolerances: {0}")]
    Tolerance(#[from] ToleranceError),
}

impl GoalRejection {
    pub fn error_code(&self) -> ResultCode {
        match self {
            GoalRejection::JointCountMismatch { .. }
            | GoalRejection::UnknownJoint(_)
            | GoalRejection::DuplicateJoint(_)
            | GoalRejection::EmptyJointNames => ResultCode::InvalidJoints,
            _ => ResultCode::InvalidGoal,
        }
    }
}

/// Validates trajectories against the controller configuration and maps them
/// into controller joint order.
#[derive(Debug, Clone)]
pub struct GoalValidator {
    joints: Vec<String>,
    allow_partial_joints_goal: bool,
    allow_nonzero_velocity_at_trajectory_end: bool,
    has_effort_command: bool,
}

impl GoalValidator {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            joints: config.joints.clone(),
            allow_partial_joints_goal: config.allow_partial_joints_goal,
            allow_nonzero_velocity_at_trajectory_end: config.allow_nonzero_velocity_at_trajectory_end,
            has_effort_command: config.has_command_interface(InterfaceType::Effort),
        }
    }

    pub fn joints(&self) -> &[String] {
        &self.joints
    }

    pub fn validate(&self, trajectory: &JointTrajectory) -> Result<(), GoalRejection> {
        let names = &trajectory.joint_names;
        if names.is_empty() {
            return Err(GoalRejection::EmptyJointNames);
        }
        if trajectory.points.is_empty() {
            return Err(GoalRejection::EmptyTrajectory);
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(GoalRejection::DuplicateJoint(name.clone()));
            }
            if !self.joints.contains(name) {
                return Err(GoalRejection::UnknownJoint(name.clone()));
            }
        }
        if !self.allow_partial_joints_goal && names.len() != self.joints.len() {
            return Err(GoalRejection::JointCountMismatch {
                expected: self.joints.len(),
                actual: names.len(),
            });
        }

        let dof = names.len();
        let mut previous: Option<Duration> = None;
        for (index, point) in trajectory.points.iter().enumerate() {
            if let Some(previous) = previous {
                if point.time_from_start <= previous {
                    return Err(GoalRejection::TimeNotIncreasing {
                        index,
                        previous,
                        current: point.time_from_start,
                    });
                }
            }
            previous = Some(point.time_from_start);
            self.validate_point(index, point, dof)?;
        }

        if !self.allow_nonzero_velocity_at_trajectory_end {
            if let Some(last) = trajectory.points.last() {
                for (joint, velocity) in names.iter().zip(&last.velocities) {
                    if velocity.abs() > f64::from(f32::EPSILON) {
                        return Err(GoalRejection::NonzeroEndVelocity {
                            joint: joint.clone(),
                            velocity: *velocity,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_point(&self, index: usize, point: &JointTrajectoryPoint, dof: usize) -> Result<(), GoalRejection> {
        if !point.effort.is_empty() && !self.has_effort_command {
            return Err(GoalRejection::EffortNotSupported { index });
        }
        let fields: [(&'static str, &[f64], bool); 4] = [
            ("positions", &point.positions, true),
            ("velocities", &point.velocities, false),
            ("accelerations", &point.accelerations, false),
            ("effort", &point.effort, false),
        ];
        for (field, values, required) in fields {
            if values.is_empty() && !required {
                continue;
            }
            if values.len() != dof {
                return Err(GoalRejection::FieldSize {
                    index,
                    field,
                    expected: dof,
                    actual: values.len(),
                });
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(GoalRejection::NonFinite { index, field });
            }
        }
        Ok(())
    }

    /// Validate `trajectory` and return it in controller joint order.
    ///
    /// Joints missing from a partial goal get NaN positions, which the
    /// controller replaces with the state at trajectory start.
    pub fn prepare(&self, trajectory: &JointTrajectory) -> Result<JointTrajectory, GoalRejection> {
        self.validate(trajectory)?;

        let dof = self.joints.len();
        let mapping: Vec<usize> = trajectory
            .joint_names
            .iter()
            .filter_map(|name| self.joints.iter().position(|joint| joint == name))
            .collect();

        let remap = |values: &[f64], fill: f64| -> Vec<f64> {
            if values.is_empty() {
                return Vec::new();
            }
            let mut ordered = vec![fill; dof];
            for (source, target) in mapping.iter().enumerate() {
                ordered[*target] = values[source];
            }
            ordered
        };

        let points = trajectory
            .points
            .iter()
            .map(|point| JointTrajectoryPoint {
                positions: remap(&point.positions, f64::NAN),
                velocities: remap(&point.velocities, 0.0),
                accelerations: remap(&point.accelerations, 0.0),
                effort: remap(&point.effort, 0.0),
                time_from_start: point.time_from_start,
            })
            .collect();

        Ok(JointTrajectory::new(self.joints.clone(), points))
    }
}
