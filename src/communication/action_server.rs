// src/communication/action_server.rs - In-process goal/cancel/feedback/result transport
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::exchange::{GoalExchange, PendingGoal};
use super::validation::{GoalRejection, GoalValidator};
use super::{CancelReason, ControllerEvent, Feedback, GoalId, GoalOutcome, GoalRequest, GoalResult, GoalStatus};
use crate::config::ControllerConfig;
use crate::motion::tolerances::SegmentTolerances;
use crate::motion::trajectory::JointTrajectory;

const FEEDBACK_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Goal {0} was dropped without a result")]
    ResultDropped(GoalId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResponse {
    Accept,
    Reject,
}

/// Client side of an accepted goal.
#[derive(Debug)]
pub struct ClientGoalHandle {
    id: GoalId,
    feedback: mpsc::Receiver<Feedback>,
    result: oneshot::Receiver<GoalResult>,
}

impl ClientGoalHandle {
    pub fn id(&self) -> GoalId {
        self.id
    }

    /// Next feedback message; `None` once the goal has finished.
    pub async fn next_feedback(&mut self) -> Option<Feedback> {
        self.feedback.recv().await
    }

    pub fn try_feedback(&mut self) -> Option<Feedback> {
        self.feedback.try_recv().ok()
    }

    /// Wait for the terminal result.
    pub async fn result(self) -> Result<GoalResult, ActionError> {
        let id = self.id;
        self.result.await.map_err(|_| ActionError::ResultDropped(id))
    }

    /// Terminal result if it is already available.
    pub fn try_result(&mut self) -> Result<Option<GoalResult>, ActionError> {
        match self.result.try_recv() {
            Ok(result) => Ok(Some(result)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(ActionError::ResultDropped(self.id)),
        }
    }
}

struct GoalEntry {
    status: GoalStatus,
    feedback: mpsc::Sender<Feedback>,
    result: oneshot::Sender<GoalResult>,
}

struct ServerInner {
    validator: GoalValidator,
    defaults: SegmentTolerances,
    exchange: Arc<GoalExchange>,
    goals: Mutex<HashMap<GoalId, GoalEntry>>,
}

/// Accepts, rejects and cancels goals and routes controller events to clients.
#[derive(Clone)]
pub struct ActionServer {
    inner: Arc<ServerInner>,
}

impl ActionServer {
    pub fn new(config: &ControllerConfig, exchange: Arc<GoalExchange>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                validator: GoalValidator::from_config(config),
                defaults: SegmentTolerances::from_config(config),
                exchange,
                goals: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn exchange(&self) -> &Arc<GoalExchange> {
        &self.inner.exchange
    }

    fn goals(&self) -> MutexGuard<'_, HashMap<GoalId, GoalEntry>> {
        self.inner.goals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and accept a goal. Rejection is decided here, synchronously.
    pub fn send_goal(&self, request: GoalRequest) -> Result<ClientGoalHandle, GoalRejection> {
        let inner = &self.inner;
        let accepted = self.check_accepting().and_then(|_| {
            let trajectory = inner.validator.prepare(&request.trajectory)?;
            let tolerances = inner.defaults.with_overrides(
                inner.validator.joints(),
                request.goal_time_tolerance,
                &request.path_tolerance,
                &request.goal_tolerance,
            )?;
            Ok((trajectory, tolerances))
        });
        let (trajectory, tolerances) = accepted.inspect_err(|e| {
            tracing::warn!("Rejected goal: {}", e);
        })?;

        let id = GoalId::new();
        let (feedback_tx, feedback_rx) = mpsc::channel(FEEDBACK_CAPACITY);
        let (result_tx, result_rx) = oneshot::channel();
        self.goals().insert(
            id,
            GoalEntry {
                status: GoalStatus::Accepted,
                feedback: feedback_tx,
                result: result_tx,
            },
        );
        tracing::info!(
            "Accepted goal {} with {} points over {:.3}s",
            id,
            trajectory.points.len(),
            trajectory.points.last().map(|p| p.time_from_start.as_secs_f64()).unwrap_or(0.0)
        );

        self.submit(PendingGoal {
            id: Some(id),
            trajectory: Arc::new(trajectory),
            tolerances: Some(Arc::new(tolerances)),
        });

        Ok(ClientGoalHandle {
            id,
            feedback: feedback_rx,
            result: result_rx,
        })
    }

    /// Execute a trajectory without a goal handle. No feedback or result is
    /// produced; controller default tolerances apply.
    pub fn send_trajectory(&self, trajectory: &JointTrajectory) -> Result<(), GoalRejection> {
        self.check_accepting()?;
        let trajectory = self.inner.validator.prepare(trajectory).inspect_err(|e| {
            tracing::warn!("Rejected trajectory: {}", e);
        })?;
        self.submit(PendingGoal {
            id: None,
            trajectory: Arc::new(trajectory),
            tolerances: None,
        });
        Ok(())
    }

    fn check_accepting(&self) -> Result<(), GoalRejection> {
        if self.inner.exchange.is_accepting() {
            Ok(())
        } else {
            Err(GoalRejection::ControllerInactive)
        }
    }

    fn submit(&self, pending: PendingGoal) {
        if let Some(displaced) = self.inner.exchange.submit(pending) {
            if let Some(id) = displaced.id {
                tracing::info!("Goal {} superseded before it started", id);
                self.resolve(
                    id,
                    GoalOutcome::Canceled(CancelReason::Superseded),
                    "Superseded by a newer goal",
                    displaced.tolerances.as_deref(),
                );
            }
        }
    }

    /// Request cancellation of a goal.
    ///
    /// Accepted requests end in `Canceled` unless the goal reaches another
    /// terminal state first.
    pub fn cancel_goal(&self, id: GoalId) -> CancelResponse {
        let known = self
            .goals()
            .get(&id)
            .is_some_and(|entry| !entry.status.is_terminal());
        if !known {
            tracing::warn!("Rejecting cancel request for unknown or finished goal {}", id);
            return CancelResponse::Reject;
        }

        if let Some(pending) = self.inner.exchange.withdraw_pending(id) {
            tracing::info!("Canceled goal {} before it started", id);
            self.resolve(
                id,
                GoalOutcome::Canceled(CancelReason::Requested),
                "Goal canceled",
                pending.tolerances.as_deref(),
            );
        } else {
            tracing::info!("Cancel requested for goal {}", id);
            self.inner.exchange.request_cancel(id);
        }
        CancelResponse::Accept
    }

    /// Status of a goal that has not finished yet.
    pub fn goal_status(&self, id: GoalId) -> Option<GoalStatus> {
        self.goals().get(&id).map(|entry| entry.status)
    }

    pub fn active_goal_count(&self) -> usize {
        self.goals().len()
    }

    /// Route one controller event to its client.
    pub fn handle_event(&self, event: ControllerEvent) {
        match event {
            ControllerEvent::Executing { goal } => {
                if let Some(entry) = self.goals().get_mut(&goal) {
                    entry.status = GoalStatus::Executing;
                }
            }
            ControllerEvent::Feedback { goal, feedback } => {
                if let Some(entry) = self.goals().get(&goal) {
                    // slow clients lose feedback, never results
                    if entry.feedback.try_send(feedback).is_err() {
                        tracing::trace!("Dropped feedback for goal {}", goal);
                    }
                }
            }
            ControllerEvent::Finished { goal, result } => self.finish(goal, result),
        }
    }

    /// Forward events from the controller until its sender is dropped.
    pub fn spawn_dispatcher(&self, mut events: mpsc::Receiver<ControllerEvent>) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                server.handle_event(event);
            }
            tracing::debug!("Controller event stream closed");
        })
    }

    fn resolve(&self, id: GoalId, outcome: GoalOutcome, message: &str, tolerances: Option<&SegmentTolerances>) {
        let tolerances = tolerances.cloned().unwrap_or_else(|| self.inner.defaults.clone());
        self.finish(id, GoalResult::new(outcome, message, tolerances));
    }

    fn finish(&self, id: GoalId, result: GoalResult) {
        let Some(entry) = self.goals().remove(&id) else {
            tracing::warn!("Result for unknown goal {}", id);
            return;
        };
        tracing::info!("Goal {} finished: {:?} ({})", id, result.outcome, result.error_string);
        if entry.result.send(result).is_err() {
            tracing::debug!("Client for goal {} is gone", id);
        }
    }
}
