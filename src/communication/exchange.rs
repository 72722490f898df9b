// src/communication/exchange.rs - Lock-free hand-off between clients and the control loop
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::GoalId;
use crate::motion::tolerances::SegmentTolerances;
use crate::motion::trajectory::{JointTrajectory, Trajectory};
use crate::scheduler::scaling::SpeedScaling;

/// A validated trajectory waiting for the next control cycle.
#[derive(Debug, Clone)]
pub struct PendingGoal {
    /// `None` for trajectories sent without a goal handle.
    pub id: Option<GoalId>,
    /// Already in controller joint order.
    pub trajectory: Arc<JointTrajectory>,
    /// `None` selects the controller defaults.
    pub tolerances: Option<Arc<SegmentTolerances>>,
}

/// Mailboxes shared by the action server and the controller.
///
/// Every slot is an atomically swapped `Arc`, so neither side ever blocks and the
/// control loop always sees a complete value. Cancel requests accumulate until
/// the next cycle drains them.
#[derive(Debug)]
pub struct GoalExchange {
    pending: ArcSwapOption<PendingGoal>,
    cancels: ArcSwapOption<Vec<GoalId>>,
    active_goal: ArcSwapOption<GoalId>,
    active_trajectory: ArcSwapOption<Trajectory>,
    accepting: AtomicBool,
    scaling: SpeedScaling,
}

impl GoalExchange {
    pub fn new(scaling: SpeedScaling) -> Self {
        Self {
            pending: ArcSwapOption::empty(),
            cancels: ArcSwapOption::empty(),
            active_goal: ArcSwapOption::empty(),
            active_trajectory: ArcSwapOption::empty(),
            accepting: AtomicBool::new(false),
            scaling,
        }
    }

    pub fn scaling(&self) -> &SpeedScaling {
        &self.scaling
    }

    /// Whether the controller is active and takes new goals.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub(crate) fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
    }

    /// Queue a trajectory for the next cycle.
    ///
    /// Returns the goal it displaced if the control loop had not picked that one
    /// up yet; the caller owns its result.
    pub fn submit(&self, goal: PendingGoal) -> Option<Arc<PendingGoal>> {
        self.pending.swap(Some(Arc::new(goal)))
    }

    /// Take back a goal that is still waiting, if it is the one named by `id`.
    pub fn withdraw_pending(&self, id: GoalId) -> Option<Arc<PendingGoal>> {
        let current = self.pending.load_full();
        if !current.as_ref().is_some_and(|p| p.id == Some(id)) {
            return None;
        }
        let previous = self.pending.compare_and_swap(&current, None::<Arc<PendingGoal>>);
        let swapped = match (&*previous, &current) {
            (Some(prev), Some(cur)) => Arc::ptr_eq(prev, cur),
            _ => false,
        };
        if swapped { current } else { None }
    }

    pub(crate) fn take_pending(&self) -> Option<Arc<PendingGoal>> {
        self.pending.swap(None)
    }

    /// Ask the control loop to cancel `id`. Applied on the next cycle if `id`
    /// is still executing then.
    pub fn request_cancel(&self, id: GoalId) {
        self.cancels.rcu(|current| {
            let mut ids = current.as_deref().cloned().unwrap_or_default();
            ids.push(id);
            Some(Arc::new(ids))
        });
    }

    /// Drain every cancel request made since the last call, oldest first.
    pub(crate) fn take_cancels(&self) -> Vec<GoalId> {
        self.cancels
            .swap(None)
            .map(Arc::unwrap_or_clone)
            .unwrap_or_default()
    }

    /// Goal currently executing on the control loop.
    pub fn active_goal(&self) -> Option<GoalId> {
        self.active_goal.load().as_deref().copied()
    }

    pub(crate) fn set_active_goal(&self, id: Option<GoalId>) {
        self.active_goal.store(id.map(Arc::new));
    }

    /// Snapshot of the trajectory the control loop is sampling.
    pub fn active_trajectory(&self) -> Option<Arc<Trajectory>> {
        self.active_trajectory.load_full()
    }

    pub(crate) fn publish_trajectory(&self, trajectory: Option<Arc<Trajectory>>) {
        self.active_trajectory.store(trajectory);
    }
}

impl Default for GoalExchange {
    fn default() -> Self {
        Self::new(SpeedScaling::default())
    }
}
