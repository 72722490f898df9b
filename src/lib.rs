// src/lib.rs - Joint trajectory controller library
pub mod communication;
pub mod config;
pub mod hardware;
pub mod motion;
pub mod scheduler;

pub use communication::{
    ActionServer, ClientGoalHandle, ControllerEvent, Feedback, GoalExchange, GoalId, GoalRequest, GoalResult,
    GoalStatus, ResultCode,
};
pub use config::{ControllerConfig, load_config, parse_config};
pub use hardware::{InterfaceType, JointHardware, JointInterfaces, LoopbackHardware, LoopbackMode};
pub use motion::{
    InterpolationMethod, JointTolerance, JointTrajectory, JointTrajectoryController, JointTrajectoryPoint,
    SegmentTolerances, Trajectory,
};
pub use scheduler::{ControlLoop, SpeedScaling};
