// src/motion/trajectory.rs
//! Immutable joint trajectories and the segment sampler.
//!
//! A [`Trajectory`] wraps a shared [`JointTrajectory`] message together with the
//! controller state captured when execution started. Sampling never mutates the
//! trajectory, so the same instance can be sampled any number of times per cycle.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::interpolation::{InterpolationMethod, interpolate_between_points};

/// One waypoint, or one sampled setpoint.
///
/// Empty vectors mean "not provided". Positions are mandatory for waypoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointTrajectoryPoint {
    pub positions: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub velocities: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accelerations: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effort: Vec<f64>,
    #[serde(default, with = "duration_secs")]
    pub time_from_start: Duration,
}

impl JointTrajectoryPoint {
    /// Waypoint with positions only.
    pub fn new(positions: Vec<f64>, time_from_start: Duration) -> Self {
        Self {
            positions,
            time_from_start,
            ..Default::default()
        }
    }

    /// Empty point whose buffers can hold `dof` joints without reallocating.
    pub fn with_capacity(dof: usize) -> Self {
        Self {
            positions: Vec::with_capacity(dof),
            velocities: Vec::with_capacity(dof),
            accelerations: Vec::with_capacity(dof),
            effort: Vec::with_capacity(dof),
            time_from_start: Duration::ZERO,
        }
    }

    pub fn with_velocities(mut self, velocities: Vec<f64>) -> Self {
        self.velocities = velocities;
        self
    }

    pub fn with_accelerations(mut self, accelerations: Vec<f64>) -> Self {
        self.accelerations = accelerations;
        self
    }

    pub fn has_velocities(&self) -> bool {
        !self.velocities.is_empty()
    }

    pub fn has_accelerations(&self) -> bool {
        !self.accelerations.is_empty()
    }

    pub fn has_effort(&self) -> bool {
        !self.effort.is_empty()
    }

    /// Copy `other` into `self`, reusing the existing buffers.
    pub fn assign(&mut self, other: &JointTrajectoryPoint) {
        self.positions.clone_from(&other.positions);
        self.velocities.clone_from(&other.velocities);
        self.accelerations.clone_from(&other.accelerations);
        self.effort.clone_from(&other.effort);
        self.time_from_start = other.time_from_start;
    }

    /// Fill missing velocities and accelerations with zeros.
    pub fn pad_derivatives(&mut self) {
        let dof = self.positions.len();
        if self.velocities.is_empty() {
            self.velocities.resize(dof, 0.0);
        }
        if self.accelerations.is_empty() {
            self.accelerations.resize(dof, 0.0);
        }
    }

    pub(crate) fn time_secs(&self) -> f64 {
        self.time_from_start.as_secs_f64()
    }
}

/// A trajectory message: joint names and the ordered waypoints that refer to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointTrajectory {
    pub joint_names: Vec<String>,
    pub points: Vec<JointTrajectoryPoint>,
}

impl JointTrajectory {
    pub fn new(joint_names: Vec<String>, points: Vec<JointTrajectoryPoint>) -> Self {
        Self { joint_names, points }
    }
}

/// Waypoint indices around a sample.
///
/// Before the first waypoint both indices are 0. Inside a segment they are
/// `(i, i + 1)`. Past the last waypoint `end` equals the number of points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentBounds {
    pub start: usize,
    pub end: usize,
}

impl SegmentBounds {
    pub fn is_past_end(&self, len: usize) -> bool {
        self.end >= len
    }
}

/// A trajectory ready for execution.
#[derive(Debug, Clone)]
pub struct Trajectory {
    msg: Arc<JointTrajectory>,
    state_before: JointTrajectoryPoint,
}

impl Trajectory {
    /// Build a trajectory that starts from `state_before`.
    ///
    /// Positions given as NaN (joints left out of a partial goal) take the value
    /// from `state_before`.
    pub fn new(msg: Arc<JointTrajectory>, state_before: JointTrajectoryPoint) -> Self {
        let needs_fill = msg
            .points
            .iter()
            .any(|p| p.positions.iter().any(|x| x.is_nan()));
        let msg = if needs_fill {
            let mut owned = (*msg).clone();
            for point in &mut owned.points {
                for (j, position) in point.positions.iter_mut().enumerate() {
                    if position.is_nan() {
                        if let Some(current) = state_before.positions.get(j) {
                            *position = *current;
                        }
                    }
                }
            }
            Arc::new(owned)
        } else {
            msg
        };
        Self { msg, state_before }
    }

    /// Single-point trajectory at time zero that holds `point`.
    ///
    /// Velocities are kept only when `keep_velocities` is set, accelerations are
    /// always zeroed.
    pub fn hold(joint_names: Vec<String>, point: &JointTrajectoryPoint, keep_velocities: bool) -> Self {
        let dof = point.positions.len();
        let mut waypoint = JointTrajectoryPoint::new(point.positions.clone(), Duration::ZERO);
        waypoint.velocities = if keep_velocities && point.has_velocities() {
            point.velocities.clone()
        } else {
            vec![0.0; dof]
        };
        waypoint.accelerations = vec![0.0; dof];
        let state_before = waypoint.clone();
        Self {
            msg: Arc::new(JointTrajectory::new(joint_names, vec![waypoint])),
            state_before,
        }
    }

    pub fn message(&self) -> &Arc<JointTrajectory> {
        &self.msg
    }

    pub fn joint_names(&self) -> &[String] {
        &self.msg.joint_names
    }

    pub fn points(&self) -> &[JointTrajectoryPoint] {
        &self.msg.points
    }

    pub fn len(&self) -> usize {
        self.msg.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msg.points.is_empty()
    }

    pub fn state_before(&self) -> &JointTrajectoryPoint {
        &self.state_before
    }

    pub fn last_point(&self) -> Option<&JointTrajectoryPoint> {
        self.msg.points.last()
    }

    /// Nominal end of the trajectory in trajectory time (seconds).
    pub fn end_time(&self) -> f64 {
        self.last_point().map(|p| p.time_secs()).unwrap_or(0.0)
    }

    /// Sample at trajectory time `t` (seconds). Returns `None` for an empty trajectory.
    pub fn sample(
        &self,
        t: f64,
        method: InterpolationMethod,
    ) -> Option<(JointTrajectoryPoint, SegmentBounds)> {
        let mut out = JointTrajectoryPoint::with_capacity(self.state_before.positions.len());
        let bounds = self.sample_into(t, method, &mut out)?;
        Some((out, bounds))
    }

    /// Like [`Trajectory::sample`] but writes into a caller-owned point.
    pub fn sample_into(
        &self,
        t: f64,
        method: InterpolationMethod,
        out: &mut JointTrajectoryPoint,
    ) -> Option<SegmentBounds> {
        let points = &self.msg.points;
        let first = points.first()?;
        let sample_time = Duration::try_from_secs_f64(t.max(0.0)).unwrap_or_default();

        if t < 0.0 {
            out.assign(&self.state_before);
            out.pad_derivatives();
            out.time_from_start = sample_time;
            return Some(SegmentBounds { start: 0, end: 0 });
        }

        // number of waypoints already reached at `t`
        let reached = points.partition_point(|p| p.time_secs() <= t);

        let bounds = if reached == 0 {
            match method {
                InterpolationMethod::None => out.assign(first),
                InterpolationMethod::Splines => {
                    interpolate_between_points(0.0, &self.state_before, first.time_secs(), first, t, out)
                }
            }
            SegmentBounds { start: 0, end: 0 }
        } else if reached < points.len() {
            let start = &points[reached - 1];
            let end = &points[reached];
            match method {
                InterpolationMethod::None => out.assign(end),
                InterpolationMethod::Splines => {
                    interpolate_between_points(start.time_secs(), start, end.time_secs(), end, t, out)
                }
            }
            SegmentBounds {
                start: reached - 1,
                end: reached,
            }
        } else {
            out.assign(&points[points.len() - 1]);
            SegmentBounds {
                start: points.len() - 1,
                end: points.len(),
            }
        };

        out.pad_derivatives();
        out.time_from_start = sample_time;
        Some(bounds)
    }
}

/// Serialize a [`Duration`] as fractional seconds.
pub(crate) mod duration_secs {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid duration {}: {}", secs, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn two_point_trajectory() -> Trajectory {
        let msg = JointTrajectory::new(
            vec!["a".into(), "b".into()],
            vec![
                JointTrajectoryPoint::new(vec![1.0, 1.0], secs(1.0)),
                JointTrajectoryPoint::new(vec![2.0, 3.0], secs(2.0)),
            ],
        );
        let before = JointTrajectoryPoint::new(vec![0.0, 0.0], Duration::ZERO);
        Trajectory::new(Arc::new(msg), before)
    }

    #[test]
    fn test_negative_time_holds_state_before() {
        let traj = two_point_trajectory();
        let (point, bounds) = traj.sample(-0.5, InterpolationMethod::Splines).unwrap();
        assert_eq!(point.positions, vec![0.0, 0.0]);
        assert_eq!(point.velocities, vec![0.0, 0.0]);
        assert_eq!(bounds, SegmentBounds { start: 0, end: 0 });
    }

    #[test]
    fn test_ramp_to_first_waypoint() {
        let traj = two_point_trajectory();
        let (point, bounds) = traj.sample(0.5, InterpolationMethod::Splines).unwrap();
        assert!((point.positions[0] - 0.5).abs() < 1e-12);
        assert_eq!(bounds, SegmentBounds { start: 0, end: 0 });
        assert_eq!(point.time_from_start, secs(0.5));
    }

    #[test]
    fn test_inside_segment() {
        let traj = two_point_trajectory();
        let (point, bounds) = traj.sample(1.5, InterpolationMethod::Splines).unwrap();
        assert!((point.positions[0] - 1.5).abs() < 1e-12);
        assert!((point.positions[1] - 2.0).abs() < 1e-12);
        assert_eq!(bounds, SegmentBounds { start: 0, end: 1 });
        assert!(!bounds.is_past_end(traj.len()));
    }

    #[test]
    fn test_waypoint_time_starts_next_segment() {
        let traj = two_point_trajectory();
        let (point, bounds) = traj.sample(1.0, InterpolationMethod::Splines).unwrap();
        assert_eq!(point.positions, vec![1.0, 1.0]);
        assert_eq!(bounds, SegmentBounds { start: 0, end: 1 });
    }

    #[test]
    fn test_after_end_returns_last_point() {
        let traj = two_point_trajectory();
        for t in [2.0, 2.5, 100.0] {
            let (point, bounds) = traj.sample(t, InterpolationMethod::Splines).unwrap();
            assert_eq!(point.positions, vec![2.0, 3.0]);
            assert_eq!(point.velocities, vec![0.0, 0.0]);
            assert_eq!(point.accelerations, vec![0.0, 0.0]);
            assert!(bounds.is_past_end(traj.len()));
        }
        assert_eq!(traj.end_time(), 2.0);
    }

    #[test]
    fn test_no_interpolation_forwards_next_waypoint() {
        let traj = two_point_trajectory();
        let (point, _) = traj.sample(0.1, InterpolationMethod::None).unwrap();
        assert_eq!(point.positions, vec![1.0, 1.0]);
        let (point, _) = traj.sample(1.1, InterpolationMethod::None).unwrap();
        assert_eq!(point.positions, vec![2.0, 3.0]);
    }

    #[test]
    fn test_single_point_at_zero_is_emitted_directly() {
        let msg = JointTrajectory::new(
            vec!["a".into()],
            vec![JointTrajectoryPoint::new(vec![4.0], Duration::ZERO)],
        );
        let traj = Trajectory::new(Arc::new(msg), JointTrajectoryPoint::new(vec![0.0], Duration::ZERO));
        let (point, bounds) = traj.sample(0.0, InterpolationMethod::Splines).unwrap();
        assert_eq!(point.positions, vec![4.0]);
        assert!(bounds.is_past_end(1));
    }

    #[test]
    fn test_nan_positions_filled_from_state_before() {
        let msg = JointTrajectory::new(
            vec!["a".into(), "b".into()],
            vec![JointTrajectoryPoint::new(vec![f64::NAN, 1.0], secs(1.0))],
        );
        let traj = Trajectory::new(Arc::new(msg), JointTrajectoryPoint::new(vec![0.7, 0.0], Duration::ZERO));
        assert_eq!(traj.points()[0].positions, vec![0.7, 1.0]);
        let (point, _) = traj.sample(0.5, InterpolationMethod::Splines).unwrap();
        assert!((point.positions[0] - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_hold_trajectory() {
        let current = JointTrajectoryPoint::new(vec![1.0, 2.0], secs(3.0)).with_velocities(vec![0.5, 0.5]);
        let hold = Trajectory::hold(vec!["a".into(), "b".into()], &current, false);
        assert_eq!(hold.len(), 1);
        assert_eq!(hold.end_time(), 0.0);
        let (point, _) = hold.sample(0.0, InterpolationMethod::Splines).unwrap();
        assert_eq!(point.positions, vec![1.0, 2.0]);
        assert_eq!(point.velocities, vec![0.0, 0.0]);

        let keep = Trajectory::hold(vec!["a".into(), "b".into()], &current, true);
        let (point, _) = keep.sample(10.0, InterpolationMethod::Splines).unwrap();
        assert_eq!(point.velocities, vec![0.5, 0.5]);
    }

    #[test]
    fn test_empty_trajectory_has_no_samples() {
        let traj = Trajectory::new(
            Arc::new(JointTrajectory::default()),
            JointTrajectoryPoint::new(vec![0.0], Duration::ZERO),
        );
        assert!(traj.sample(0.0, InterpolationMethod::Splines).is_none());
    }

    #[test]
    fn test_point_deserializes_seconds() {
        let point: JointTrajectoryPoint =
            serde_json::from_str(r#"{"positions":[1.0],"time_from_start":0.25}"#).unwrap();
        assert_eq!(point.time_from_start, Duration::from_millis(250));
        assert!(!point.has_velocities());
    }
}
