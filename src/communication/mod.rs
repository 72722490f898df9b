//! Goal, feedback and result messages exchanged between clients and the controller.
//!
//! The real-time side reports progress as [`ControllerEvent`]s through an
//! [`EventSink`]; the action server routes them to the per-goal client handles.

pub mod action_server;
pub mod exchange;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::motion::tolerances::{JointTolerance, SegmentTolerances};
use crate::motion::trajectory::{JointTrajectory, JointTrajectoryPoint, duration_secs};

pub use action_server::{ActionError, ActionServer, CancelResponse, ClientGoalHandle};
pub use exchange::{GoalExchange, PendingGoal};
pub use validation::{GoalRejection, GoalValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoalId(Uuid);

impl GoalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GoalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request to execute a trajectory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalRequest {
    pub trajectory: JointTrajectory,
    /// Zero keeps the controller default.
    #[serde(default, with = "duration_secs")]
    pub goal_time_tolerance: Duration,
    #[serde(default)]
    pub path_tolerance: Vec<JointTolerance>,
    #[serde(default)]
    pub goal_tolerance: Vec<JointTolerance>,
}

impl GoalRequest {
    pub fn new(trajectory: JointTrajectory) -> Self {
        Self {
            trajectory,
            ..Default::default()
        }
    }

    pub fn with_goal_time_tolerance(mut self, tolerance: Duration) -> Self {
        self.goal_time_tolerance = tolerance;
        self
    }

    pub fn with_path_tolerance(mut self, tolerance: Vec<JointTolerance>) -> Self {
        self.path_tolerance = tolerance;
        self
    }

    pub fn with_goal_tolerance(mut self, tolerance: Vec<JointTolerance>) -> Self {
        self.goal_tolerance = tolerance;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalStatus {
    Accepted,
    Executing,
    Succeeded,
    Aborted,
    Canceled,
}

impl GoalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GoalStatus::Succeeded | GoalStatus::Aborted | GoalStatus::Canceled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    PathToleranceViolated,
    GoalToleranceViolated,
    ControllerDeactivated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// The client asked for it.
    Requested,
    /// A newer goal or trajectory replaced it.
    Superseded,
}

/// How a goal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalOutcome {
    Succeeded,
    Aborted(AbortReason),
    Canceled(CancelReason),
}

impl GoalOutcome {
    pub fn status(&self) -> GoalStatus {
        match self {
            GoalOutcome::Succeeded => GoalStatus::Succeeded,
            GoalOutcome::Aborted(_) => GoalStatus::Aborted,
            GoalOutcome::Canceled(_) => GoalStatus::Canceled,
        }
    }

    pub fn error_code(&self) -> ResultCode {
        match self {
            GoalOutcome::Succeeded | GoalOutcome::Canceled(_) => ResultCode::Successful,
            GoalOutcome::Aborted(AbortReason::PathToleranceViolated) => ResultCode::PathToleranceViolated,
            GoalOutcome::Aborted(AbortReason::GoalToleranceViolated) => ResultCode::GoalToleranceViolated,
            GoalOutcome::Aborted(AbortReason::ControllerDeactivated) => ResultCode::InvalidGoal,
        }
    }
}

/// Numeric result codes reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ResultCode {
    Successful = 0,
    InvalidGoal = -1,
    InvalidJoints = -2,
    PathToleranceViolated = -4,
    GoalToleranceViolated = -5,
}

/// Terminal result of a goal. Exactly one is produced per accepted goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalResult {
    pub outcome: GoalOutcome,
    pub error_code: ResultCode,
    pub error_string: String,
    pub tolerances: SegmentTolerances,
}

impl GoalResult {
    pub fn new(outcome: GoalOutcome, error_string: impl Into<String>, tolerances: SegmentTolerances) -> Self {
        Self {
            outcome,
            error_code: outcome.error_code(),
            error_string: error_string.into(),
            tolerances,
        }
    }

    pub fn status(&self) -> GoalStatus {
        self.outcome.status()
    }
}

/// Progress of the executing goal, one per control cycle.
///
/// `desired.time_from_start` is trajectory time, `actual.time_from_start` is
/// wall time since the trajectory started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub desired: JointTrajectoryPoint,
    pub actual: JointTrajectoryPoint,
    pub error: JointTrajectoryPoint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Executing { goal: GoalId },
    Feedback { goal: GoalId, feedback: Feedback },
    Finished { goal: GoalId, result: GoalResult },
}

impl ControllerEvent {
    pub fn goal(&self) -> GoalId {
        match self {
            ControllerEvent::Executing { goal }
            | ControllerEvent::Feedback { goal, .. }
            | ControllerEvent::Finished { goal, .. } => *goal,
        }
    }

    pub fn is_feedback(&self) -> bool {
        matches!(self, ControllerEvent::Feedback { .. })
    }
}

/// Non-blocking outlet for controller events.
///
/// `publish` must never wait; an event that cannot be delivered right now is
/// handed back to the caller.
pub trait EventSink: Send {
    fn publish(&mut self, event: ControllerEvent) -> Result<(), ControllerEvent>;
}

impl EventSink for mpsc::Sender<ControllerEvent> {
    fn publish(&mut self, event: ControllerEvent) -> Result<(), ControllerEvent> {
        self.try_send(event).map_err(|e| e.into_inner())
    }
}

impl EventSink for Vec<ControllerEvent> {
    fn publish(&mut self, event: ControllerEvent) -> Result<(), ControllerEvent> {
        self.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_codes() {
        assert_eq!(GoalOutcome::Succeeded.error_code(), ResultCode::Successful);
        assert_eq!(GoalOutcome::Canceled(CancelReason::Requested).error_code(), ResultCode::Successful);
        assert_eq!(
            GoalOutcome::Aborted(AbortReason::PathToleranceViolated).error_code(),
            ResultCode::PathToleranceViolated
        );
        assert_eq!(ResultCode::GoalToleranceViolated as i32, -5);
        assert_eq!(GoalOutcome::Aborted(AbortReason::ControllerDeactivated).status(), GoalStatus::Aborted);
        assert!(GoalStatus::Canceled.is_terminal());
        assert!(!GoalStatus::Executing.is_terminal());
    }

    #[test]
    fn test_sender_sink_hands_back_when_full() {
        let (mut tx, mut rx) = mpsc::channel(1);
        let goal = GoalId::new();
        assert!(tx.publish(ControllerEvent::Executing { goal }).is_ok());
        let rejected = tx.publish(ControllerEvent::Executing { goal }).unwrap_err();
        assert_eq!(rejected.goal(), goal);
        assert_eq!(rx.try_recv().unwrap(), ControllerEvent::Executing { goal });
    }

    #[test]
    fn test_goal_request_from_json() {
        let request: GoalRequest = serde_json::from_str(
            r#"{
                "trajectory": {
                    "joint_names": ["a"],
                    "points": [{"positions": [1.0], "time_from_start": 0.5}]
                },
                "goal_time_tolerance": 0.1,
                "path_tolerance": [{"name": "a", "position": 0.2}]
            }"#,
        )
        .unwrap();
        assert_eq!(request.goal_time_tolerance, Duration::from_millis(100));
        assert_eq!(request.path_tolerance[0].position, 0.2);
        assert!(request.goal_tolerance.is_empty());
        assert_eq!(request.trajectory.points[0].time_from_start, Duration::from_millis(500));
    }
}
