// src/motion/mod.rs - Trajectory sampling, tolerances and execution
pub mod controller;
pub mod interpolation;
pub mod pid;
pub mod tolerances;
pub mod trajectory;

pub use controller::{ControllerError, JointTrajectoryController, LifecycleState};
pub use interpolation::InterpolationMethod;
pub use pid::PidController;
pub use tolerances::{JointTolerance, Outcome, SegmentTolerances, StateTolerance, ToleranceViolation};
pub use trajectory::{JointTrajectory, JointTrajectoryPoint, SegmentBounds, Trajectory};
