// src/motion/tolerances.rs - Path and goal tolerance evaluation
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::trajectory::JointTrajectoryPoint;
use crate::config::ControllerConfig;

/// Override value that resets a tolerance axis to "unchecked".
pub const ERASE_TOLERANCE: f64 = -1.0;

/// Per-joint tolerance. Zero on an axis means the axis is not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StateTolerance {
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
}

/// Tolerances resolved into controller joint order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentTolerances {
    /// Seconds allowed past the nominal end; zero disables the deadline.
    pub goal_time_tolerance: f64,
    pub stopped_velocity_tolerance: f64,
    /// Checked while the trajectory is running.
    pub state_tolerance: Vec<StateTolerance>,
    /// Checked against the final waypoint once the nominal end has passed.
    pub goal_state_tolerance: Vec<StateTolerance>,
}

/// Tolerance override carried by a goal, addressed by joint name.
///
/// Zero on an axis keeps the controller default for that axis,
/// [`ERASE_TOLERANCE`] turns the check off, and any positive value replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointTolerance {
    pub name: String,
    #[serde(default)]
    pub position: f64,
    #[serde(default)]
    pub velocity: f64,
    #[serde(default)]
    pub acceleration: f64,
}

impl JointTolerance {
    pub fn new(name: impl Into<String>, position: f64, velocity: f64, acceleration: f64) -> Self {
        Self {
            name: name.into(),
            position,
            velocity,
            acceleration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Position,
    Velocity,
    Acceleration,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Position => write!(f, "position"),
            Axis::Velocity => write!(f, "velocity"),
            Axis::Acceleration => write!(f, "acceleration"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToleranceError {
    #[error("Tolerance given for unknown joint '{0}'")]
    UnknownJoint(String),
    #[error("Invalid {axis} tolerance {value} for joint '{joint}'")]
    InvalidValue { joint: String, axis: Axis, value: f64 },
}

/// A single out-of-tolerance axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceViolation {
    pub joint: usize,
    pub axis: Axis,
    pub error: f64,
    pub tolerance: f64,
}

impl fmt::Display for ToleranceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "joint {} {} error {:.6} exceeds tolerance {:.6}",
            self.joint, self.axis, self.error, self.tolerance
        )
    }
}

/// Result of comparing one sample against the measured state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Continue,
    GoalReached,
    PathViolation(ToleranceViolation),
    GoalViolation {
        overshoot: f64,
        violation: ToleranceViolation,
    },
}

/// Timing information the evaluator needs besides the two states.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// Trajectory time of the sample, seconds.
    pub elapsed: f64,
    /// Nominal end of the trajectory, seconds.
    pub end_time: f64,
    /// First sample of a freshly started trajectory.
    pub first_sample: bool,
    pub final_point: &'a JointTrajectoryPoint,
}

impl SegmentTolerances {
    /// Controller-wide defaults from the `[constraints]` section.
    pub fn from_config(config: &ControllerConfig) -> Self {
        let constraints = &config.constraints;
        let stopped = constraints.stopped_velocity_tolerance;
        // a trajectory allowed to end moving is not expected to stop
        let goal_velocity = if config.allow_nonzero_velocity_at_trajectory_end { 0.0 } else { stopped };
        let mut state_tolerance = Vec::with_capacity(config.joints.len());
        let mut goal_state_tolerance = Vec::with_capacity(config.joints.len());

        for joint in &config.joints {
            let limits = constraints.joints.get(joint).copied().unwrap_or_default();
            state_tolerance.push(StateTolerance {
                position: limits.trajectory,
                ..Default::default()
            });
            goal_state_tolerance.push(StateTolerance {
                position: limits.goal,
                velocity: goal_velocity,
                acceleration: 0.0,
            });
        }

        Self {
            goal_time_tolerance: constraints.goal_time,
            stopped_velocity_tolerance: stopped,
            state_tolerance,
            goal_state_tolerance,
        }
    }

    /// Apply the overrides carried by a goal on top of these defaults.
    ///
    /// A zero `goal_time_tolerance` keeps the default deadline.
    pub fn with_overrides(
        &self,
        joints: &[String],
        goal_time_tolerance: Duration,
        path_tolerance: &[JointTolerance],
        goal_tolerance: &[JointTolerance],
    ) -> Result<Self, ToleranceError> {
        let mut resolved = self.clone();
        if !goal_time_tolerance.is_zero() {
            resolved.goal_time_tolerance = goal_time_tolerance.as_secs_f64();
        }
        apply_overrides(joints, path_tolerance, &mut resolved.state_tolerance)?;
        apply_overrides(joints, goal_tolerance, &mut resolved.goal_state_tolerance)?;
        Ok(resolved)
    }
}

fn apply_overrides(
    joints: &[String],
    overrides: &[JointTolerance],
    target: &mut [StateTolerance],
) -> Result<(), ToleranceError> {
    for entry in overrides {
        let index = joints
            .iter()
            .position(|name| name == &entry.name)
            .ok_or_else(|| ToleranceError::UnknownJoint(entry.name.clone()))?;
        let Some(slot) = target.get_mut(index) else {
            return Err(ToleranceError::UnknownJoint(entry.name.clone()));
        };
        slot.position = resolve_value(&entry.name, Axis::Position, entry.position, slot.position)?;
        slot.velocity = resolve_value(&entry.name, Axis::Velocity, entry.velocity, slot.velocity)?;
        slot.acceleration = resolve_value(&entry.name, Axis::Acceleration, entry.acceleration, slot.acceleration)?;
    }
    Ok(())
}

fn resolve_value(joint: &str, axis: Axis, value: f64, default: f64) -> Result<f64, ToleranceError> {
    if value == 0.0 {
        Ok(default)
    } else if value == ERASE_TOLERANCE {
        Ok(0.0)
    } else if value < 0.0 || !value.is_finite() {
        Err(ToleranceError::InvalidValue {
            joint: joint.to_string(),
            axis,
            value,
        })
    } else {
        Ok(value)
    }
}

/// Compare `measured` against `reference` for one joint.
///
/// Velocity and acceleration are only compared when the measured state carries
/// them. A missing reference derivative counts as zero.
pub fn check_state_tolerance_per_joint(
    reference: &JointTrajectoryPoint,
    measured: &JointTrajectoryPoint,
    joint: usize,
    tolerance: &StateTolerance,
) -> Option<ToleranceViolation> {
    let violation = |axis, error: f64, limit: f64| {
        (limit > 0.0 && error.abs() > limit).then_some(ToleranceViolation {
            joint,
            axis,
            error,
            tolerance: limit,
        })
    };

    let reference_position = reference.positions.get(joint).copied().unwrap_or(0.0);
    let measured_position = measured.positions.get(joint).copied().unwrap_or(0.0);
    if let Some(v) = violation(
        Axis::Position,
        reference_position - measured_position,
        tolerance.position,
    ) {
        return Some(v);
    }

    if let Some(measured_velocity) = measured.velocities.get(joint) {
        let reference_velocity = reference.velocities.get(joint).copied().unwrap_or(0.0);
        if let Some(v) = violation(
            Axis::Velocity,
            reference_velocity - measured_velocity,
            tolerance.velocity,
        ) {
            return Some(v);
        }
    }

    if let Some(measured_acceleration) = measured.accelerations.get(joint) {
        let reference_acceleration = reference.accelerations.get(joint).copied().unwrap_or(0.0);
        if let Some(v) = violation(
            Axis::Acceleration,
            reference_acceleration - measured_acceleration,
            tolerance.acceleration,
        ) {
            return Some(v);
        }
    }

    None
}

/// Decide whether execution continues, succeeded or must abort.
///
/// Path tolerances apply while the trajectory is running and on the first
/// sample; a path violation takes precedence over everything else. Once the
/// nominal end has passed the measured state is compared with the final
/// waypoint.
pub fn evaluate(
    setpoint: &JointTrajectoryPoint,
    measured: &JointTrajectoryPoint,
    context: &EvaluationContext<'_>,
    tolerances: &SegmentTolerances,
) -> Outcome {
    let dof = measured.positions.len();
    let running = context.elapsed < context.end_time;

    if running || context.first_sample {
        for (joint, tolerance) in tolerances.state_tolerance.iter().enumerate().take(dof) {
            if let Some(violation) = check_state_tolerance_per_joint(setpoint, measured, joint, tolerance) {
                return Outcome::PathViolation(violation);
            }
        }
    }
    if running {
        return Outcome::Continue;
    }

    let unmet = tolerances
        .goal_state_tolerance
        .iter()
        .enumerate()
        .take(dof)
        .find_map(|(joint, tolerance)| {
            check_state_tolerance_per_joint(context.final_point, measured, joint, tolerance)
        });

    match unmet {
        None => Outcome::GoalReached,
        Some(violation) => {
            let overshoot = context.elapsed - context.end_time;
            if tolerances.goal_time_tolerance > 0.0 && overshoot > tolerances.goal_time_tolerance {
                Outcome::GoalViolation { overshoot, violation }
            } else {
                Outcome::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControllerConfig, JointConstraints};

    fn config() -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.joints = vec!["j1".into(), "j2".into(), "j3".into()];
        config.constraints.goal_time = 0.5;
        config.constraints.stopped_velocity_tolerance = 0.02;
        for (name, limit) in [("j1", 0.1), ("j2", 0.2), ("j3", 0.3)] {
            config.constraints.joints.insert(
                name.into(),
                JointConstraints {
                    trajectory: limit,
                    goal: limit / 10.0,
                },
            );
        }
        config
    }

    fn state(positions: &[f64], velocities: &[f64]) -> JointTrajectoryPoint {
        JointTrajectoryPoint {
            positions: positions.to_vec(),
            velocities: velocities.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_from_config() {
        let tolerances = SegmentTolerances::from_config(&config());
        assert_eq!(tolerances.goal_time_tolerance, 0.5);
        assert_eq!(tolerances.state_tolerance[1].position, 0.2);
        assert_eq!(tolerances.goal_state_tolerance[2].position, 0.03);
        assert_eq!(tolerances.goal_state_tolerance[0].velocity, 0.02);
        assert_eq!(tolerances.state_tolerance[0].velocity, 0.0);
    }

    #[test]
    fn test_overrides_resolve_in_controller_order() {
        let config = config();
        let defaults = SegmentTolerances::from_config(&config);
        let path = vec![
            JointTolerance::new("j3", 0.3, 0.4, 0.5),
            JointTolerance::new("j1", 0.1, 0.2, 0.3),
        ];
        let goal = vec![JointTolerance::new("j2", 0.01, 0.02, 0.03)];
        let resolved = defaults
            .with_overrides(&config.joints, Duration::from_secs_f64(2.0), &path, &goal)
            .unwrap();

        assert_eq!(resolved.goal_time_tolerance, 2.0);
        assert_eq!(resolved.state_tolerance[0], StateTolerance { position: 0.1, velocity: 0.2, acceleration: 0.3 });
        assert_eq!(resolved.state_tolerance[1], defaults.state_tolerance[1]);
        assert_eq!(resolved.state_tolerance[2], StateTolerance { position: 0.3, velocity: 0.4, acceleration: 0.5 });
        assert_eq!(resolved.goal_state_tolerance[1].acceleration, 0.03);
        assert_eq!(resolved.goal_state_tolerance[0], defaults.goal_state_tolerance[0]);
    }

    #[test]
    fn test_zero_goal_time_keeps_default() {
        let config = config();
        let defaults = SegmentTolerances::from_config(&config);
        let resolved = defaults.with_overrides(&config.joints, Duration::ZERO, &[], &[]).unwrap();
        assert_eq!(resolved, defaults);
    }

    #[test]
    fn test_erase_and_invalid_values() {
        let config = config();
        let defaults = SegmentTolerances::from_config(&config);
        let erase = vec![JointTolerance::new("j1", ERASE_TOLERANCE, 0.0, 0.0)];
        let resolved = defaults.with_overrides(&config.joints, Duration::ZERO, &erase, &[]).unwrap();
        assert_eq!(resolved.state_tolerance[0].position, 0.0);

        let negative = vec![JointTolerance::new("j1", -0.5, 0.0, 0.0)];
        assert!(matches!(
            defaults.with_overrides(&config.joints, Duration::ZERO, &negative, &[]),
            Err(ToleranceError::InvalidValue { axis: Axis::Position, .. })
        ));

        let unknown = vec![JointTolerance::new("elbow", 0.1, 0.0, 0.0)];
        assert_eq!(
            defaults.with_overrides(&config.joints, Duration::ZERO, &[], &unknown),
            Err(ToleranceError::UnknownJoint("elbow".into()))
        );
    }

    #[test]
    fn test_zero_override_keeps_default_axis() {
        let config = config();
        let defaults = SegmentTolerances::from_config(&config);
        let goal = vec![JointTolerance::new("j2", 0.5, 0.0, 0.0)];
        let resolved = defaults.with_overrides(&config.joints, Duration::ZERO, &[], &goal).unwrap();
        assert_eq!(resolved.goal_state_tolerance[1].position, 0.5);
        assert_eq!(resolved.goal_state_tolerance[1].velocity, 0.02);
        assert_eq!(resolved.goal_state_tolerance[1].acceleration, 0.0);

        let path = vec![JointTolerance::new("j3", 0.0, 0.4, 0.0)];
        let resolved = defaults.with_overrides(&config.joints, Duration::ZERO, &path, &[]).unwrap();
        assert_eq!(resolved.state_tolerance[2].position, 0.3);
        assert_eq!(resolved.state_tolerance[2].velocity, 0.4);

        let erase = vec![JointTolerance::new("j2", 0.0, ERASE_TOLERANCE, 0.0)];
        let resolved = defaults.with_overrides(&config.joints, Duration::ZERO, &[], &erase).unwrap();
        assert_eq!(resolved.goal_state_tolerance[1].position, 0.02);
        assert_eq!(resolved.goal_state_tolerance[1].velocity, 0.0);
    }

    #[test]
    fn test_zero_tolerance_is_unchecked() {
        let reference = state(&[0.0], &[0.0]);
        let measured = state(&[100.0], &[100.0]);
        assert!(check_state_tolerance_per_joint(&reference, &measured, 0, &StateTolerance::default()).is_none());
    }

    #[test]
    fn test_velocity_skipped_without_measurement() {
        let reference = state(&[0.0], &[5.0]);
        let measured = state(&[0.0], &[]);
        let tolerance = StateTolerance { position: 0.1, velocity: 0.1, acceleration: 0.1 };
        assert!(check_state_tolerance_per_joint(&reference, &measured, 0, &tolerance).is_none());

        let measured = state(&[0.0], &[0.0]);
        let violation = check_state_tolerance_per_joint(&reference, &measured, 0, &tolerance).unwrap();
        assert_eq!(violation.axis, Axis::Velocity);
        assert_eq!(violation.error, 5.0);
    }

    #[test]
    fn test_path_violation_while_running() {
        let tolerances = SegmentTolerances::from_config(&config());
        let final_point = state(&[1.0, 1.0, 1.0], &[]);
        let context = EvaluationContext { elapsed: 0.5, end_time: 1.0, first_sample: false, final_point: &final_point };
        let setpoint = state(&[0.5, 0.5, 0.5], &[0.0, 0.0, 0.0]);

        let close = state(&[0.45, 0.5, 0.5], &[0.0, 0.0, 0.0]);
        assert_eq!(evaluate(&setpoint, &close, &context, &tolerances), Outcome::Continue);

        let far = state(&[0.5, 0.25, 0.5], &[0.0, 0.0, 0.0]);
        match evaluate(&setpoint, &far, &context, &tolerances) {
            Outcome::PathViolation(v) => {
                assert_eq!(v.joint, 1);
                assert_eq!(v.axis, Axis::Position);
            }
            other => panic!("expected path violation, got {:?}", other),
        }
    }

    #[test]
    fn test_first_sample_is_path_checked_at_end() {
        let tolerances = SegmentTolerances::from_config(&config());
        let final_point = state(&[1.0, 1.0, 1.0], &[]);
        let measured = state(&[0.0, 0.0, 0.0], &[]);
        let context = EvaluationContext { elapsed: 0.0, end_time: 0.0, first_sample: true, final_point: &final_point };
        assert!(matches!(
            evaluate(&final_point, &measured, &context, &tolerances),
            Outcome::PathViolation(_)
        ));
    }

    #[test]
    fn test_goal_reached_and_deadline() {
        let tolerances = SegmentTolerances::from_config(&config());
        let final_point = state(&[1.0, 1.0, 1.0], &[]);

        let at_goal = state(&[1.005, 1.0, 1.0], &[0.0, 0.01, 0.0]);
        let context = EvaluationContext { elapsed: 1.0, end_time: 1.0, first_sample: false, final_point: &final_point };
        assert_eq!(evaluate(&final_point, &at_goal, &context, &tolerances), Outcome::GoalReached);

        let still_moving = state(&[1.0, 1.0, 1.0], &[0.0, 0.5, 0.0]);
        assert_eq!(evaluate(&final_point, &still_moving, &context, &tolerances), Outcome::Continue);

        let late = EvaluationContext { elapsed: 1.6, ..context };
        match evaluate(&final_point, &still_moving, &late, &tolerances) {
            Outcome::GoalViolation { overshoot, violation } => {
                assert!((overshoot - 0.6).abs() < 1e-12);
                assert_eq!(violation.axis, Axis::Velocity);
            }
            other => panic!("expected goal violation, got {:?}", other),
        }
    }

    #[test]
    fn test_no_deadline_waits_forever() {
        let mut tolerances = SegmentTolerances::from_config(&config());
        tolerances.goal_time_tolerance = 0.0;
        let final_point = state(&[1.0, 1.0, 1.0], &[]);
        let measured = state(&[0.0, 0.0, 0.0], &[]);
        let context = EvaluationContext { elapsed: 1e6, end_time: 1.0, first_sample: false, final_point: &final_point };
        assert_eq!(evaluate(&final_point, &measured, &context, &tolerances), Outcome::Continue);
    }
}
