// src/motion/interpolation.rs - Per-segment spline interpolation
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::trajectory::JointTrajectoryPoint;

/// How a setpoint is produced between two waypoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    /// Forward the next waypoint without blending.
    None,
    /// Cubic Hermite splines, quintic when both boundaries carry accelerations.
    #[default]
    Splines,
}

impl fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpolationMethod::None => write!(f, "none"),
            InterpolationMethod::Splines => write!(f, "splines"),
        }
    }
}

impl FromStr for InterpolationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(InterpolationMethod::None),
            "splines" | "spline" => Ok(InterpolationMethod::Splines),
            other => Err(format!("Unknown interpolation method '{}'", other)),
        }
    }
}

/// Interpolate between `start` (reached at `start_time`) and `end` (reached at
/// `end_time`) and write the result for `sample_time` into `out`.
///
/// Missing velocities count as zero. The sample time is clamped to the segment,
/// so callers never extrapolate past either boundary.
pub fn interpolate_between_points(
    start_time: f64,
    start: &JointTrajectoryPoint,
    end_time: f64,
    end: &JointTrajectoryPoint,
    sample_time: f64,
    out: &mut JointTrajectoryPoint,
) {
    let dof = end.positions.len();
    let duration = end_time - start_time;
    let t = (sample_time - start_time).clamp(0.0, duration.max(0.0));
    let quintic = start.has_accelerations() && end.has_accelerations();

    out.positions.resize(dof, 0.0);
    out.velocities.resize(dof, 0.0);
    out.accelerations.resize(dof, 0.0);

    for j in 0..dof {
        let p0 = start.positions.get(j).copied().unwrap_or(end.positions[j]);
        let p1 = end.positions[j];
        let v0 = start.velocities.get(j).copied().unwrap_or(0.0);
        let v1 = end.velocities.get(j).copied().unwrap_or(0.0);

        let (p, v, a) = if duration <= 0.0 {
            (p1, v1, end.accelerations.get(j).copied().unwrap_or(0.0))
        } else if quintic {
            let a0 = start.accelerations.get(j).copied().unwrap_or(0.0);
            let a1 = end.accelerations.get(j).copied().unwrap_or(0.0);
            quintic_sample(p0, v0, a0, p1, v1, a1, duration, t)
        } else {
            cubic_sample(p0, v0, p1, v1, duration, t)
        };

        out.positions[j] = p;
        out.velocities[j] = v;
        out.accelerations[j] = a;
    }

    if start.has_effort() && end.has_effort() && duration > 0.0 {
        let ratio = t / duration;
        out.effort.resize(dof, 0.0);
        for j in 0..dof {
            let e0 = start.effort.get(j).copied().unwrap_or(0.0);
            let e1 = end.effort.get(j).copied().unwrap_or(0.0);
            out.effort[j] = e0 + (e1 - e0) * ratio;
        }
    } else {
        out.effort.clone_from(&end.effort);
    }
}

fn cubic_sample(p0: f64, v0: f64, p1: f64, v1: f64, duration: f64, t: f64) -> (f64, f64, f64) {
    let t2 = duration * duration;
    let t3 = t2 * duration;
    let c0 = p0;
    let c1 = v0;
    let c2 = (-3.0 * p0 + 3.0 * p1 - 2.0 * v0 * duration - v1 * duration) / t2;
    let c3 = (2.0 * p0 - 2.0 * p1 + v0 * duration + v1 * duration) / t3;

    let position = c0 + c1 * t + c2 * t * t + c3 * t * t * t;
    let velocity = c1 + 2.0 * c2 * t + 3.0 * c3 * t * t;
    let acceleration = 2.0 * c2 + 6.0 * c3 * t;
    (position, velocity, acceleration)
}

#[allow(clippy::too_many_arguments)]
fn quintic_sample(
    p0: f64,
    v0: f64,
    a0: f64,
    p1: f64,
    v1: f64,
    a1: f64,
    duration: f64,
    t: f64,
) -> (f64, f64, f64) {
    let d = duration;
    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d3 * d;
    let d5 = d4 * d;

    let c0 = p0;
    let c1 = v0;
    let c2 = a0 / 2.0;
    let c3 = (-20.0 * p0 + 20.0 * p1 - 3.0 * a0 * d2 + a1 * d2 - 12.0 * v0 * d - 8.0 * v1 * d)
        / (2.0 * d3);
    let c4 = (30.0 * p0 - 30.0 * p1 + 3.0 * a0 * d2 - 2.0 * a1 * d2 + 16.0 * v0 * d + 14.0 * v1 * d)
        / (2.0 * d4);
    let c5 = (-12.0 * p0 + 12.0 * p1 - a0 * d2 + a1 * d2 - 6.0 * v0 * d - 6.0 * v1 * d)
        / (2.0 * d5);

    let t2 = t * t;
    let t3 = t2 * t;
    let t4 = t3 * t;
    let t5 = t4 * t;

    let position = c0 + c1 * t + c2 * t2 + c3 * t3 + c4 * t4 + c5 * t5;
    let velocity = c1 + 2.0 * c2 * t + 3.0 * c3 * t2 + 4.0 * c4 * t3 + 5.0 * c5 * t4;
    let acceleration = 2.0 * c2 + 6.0 * c3 * t + 12.0 * c4 * t2 + 20.0 * c5 * t3;
    (position, velocity, acceleration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn point(positions: &[f64], velocities: &[f64]) -> JointTrajectoryPoint {
        JointTrajectoryPoint {
            positions: positions.to_vec(),
            velocities: velocities.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cubic_hits_boundaries() {
        let a = point(&[0.0], &[]);
        let b = point(&[1.0], &[]);
        let mut out = JointTrajectoryPoint::default();

        interpolate_between_points(0.0, &a, 2.0, &b, 0.0, &mut out);
        assert!((out.positions[0] - 0.0).abs() < 1e-12);
        assert!(out.velocities[0].abs() < 1e-12);

        interpolate_between_points(0.0, &a, 2.0, &b, 2.0, &mut out);
        assert!((out.positions[0] - 1.0).abs() < 1e-12);
        assert!(out.velocities[0].abs() < 1e-12);
    }

    #[test]
    fn test_cubic_midpoint_is_symmetric() {
        let a = point(&[0.0, 2.0], &[]);
        let b = point(&[1.0, 0.0], &[]);
        let mut out = JointTrajectoryPoint::default();
        interpolate_between_points(0.0, &a, 1.0, &b, 0.5, &mut out);
        assert!((out.positions[0] - 0.5).abs() < 1e-12);
        assert!((out.positions[1] - 1.0).abs() < 1e-12);
        // peak speed of a rest-to-rest cubic is 1.5 * distance / duration
        assert!((out.velocities[0] - 1.5).abs() < 1e-12);
        assert!((out.velocities[1] + 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_cubic_respects_boundary_velocity() {
        let a = point(&[0.0], &[1.0]);
        let b = point(&[1.0], &[1.0]);
        let mut out = JointTrajectoryPoint::default();
        for sample in [0.0, 0.25, 0.5, 0.75, 1.0] {
            interpolate_between_points(0.0, &a, 1.0, &b, sample, &mut out);
            assert!((out.positions[0] - sample).abs() < 1e-12);
            assert!((out.velocities[0] - 1.0).abs() < 1e-12);
            assert!(out.accelerations[0].abs() < 1e-12);
        }
    }

    #[test]
    fn test_quintic_matches_boundary_accelerations() {
        let mut a = point(&[0.0], &[0.0]);
        a.accelerations = vec![0.5];
        let mut b = point(&[1.0], &[0.0]);
        b.accelerations = vec![-0.5];
        let mut out = JointTrajectoryPoint::default();

        interpolate_between_points(1.0, &a, 3.0, &b, 1.0, &mut out);
        assert!((out.accelerations[0] - 0.5).abs() < 1e-9);
        interpolate_between_points(1.0, &a, 3.0, &b, 3.0, &mut out);
        assert!((out.positions[0] - 1.0).abs() < 1e-9);
        assert!((out.accelerations[0] + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_sample_time_is_clamped() {
        let a = point(&[0.0], &[]);
        let b = point(&[1.0], &[]);
        let mut out = JointTrajectoryPoint::default();
        interpolate_between_points(0.0, &a, 1.0, &b, 5.0, &mut out);
        assert!((out.positions[0] - 1.0).abs() < 1e-12);
        interpolate_between_points(0.0, &a, 1.0, &b, -5.0, &mut out);
        assert!(out.positions[0].abs() < 1e-12);
    }

    #[test]
    fn test_zero_length_segment_returns_end() {
        let a = point(&[0.0], &[]);
        let mut b = point(&[1.0], &[0.2]);
        b.time_from_start = Duration::ZERO;
        let mut out = JointTrajectoryPoint::default();
        interpolate_between_points(0.0, &a, 0.0, &b, 0.0, &mut out);
        assert_eq!(out.positions, vec![1.0]);
        assert_eq!(out.velocities, vec![0.2]);
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("none".parse::<InterpolationMethod>(), Ok(InterpolationMethod::None));
        assert_eq!("Splines".parse::<InterpolationMethod>(), Ok(InterpolationMethod::Splines));
        assert!("linear".parse::<InterpolationMethod>().is_err());
        assert_eq!(InterpolationMethod::default(), InterpolationMethod::Splines);
    }
}
