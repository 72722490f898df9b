// src/motion/controller.rs - Joint trajectory controller with goal supervision
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::communication::{
    AbortReason, CancelReason, ControllerEvent, EventSink, Feedback, GoalExchange, GoalId, GoalOutcome,
    GoalResult, PendingGoal,
};
use crate::config::{ConfigError, ControllerConfig};
use crate::hardware::{HardwareError, InterfaceType, JointInterfaces};
use crate::motion::pid::PidController;
use crate::motion::tolerances::{EvaluationContext, Outcome, SegmentTolerances, ToleranceViolation, evaluate};
use crate::motion::trajectory::{JointTrajectory, JointTrajectoryPoint, Trajectory};
use crate::scheduler::scaling::ScalingClock;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: LifecycleState,
    },
    #[error("Interfaces do not match the configuration: {0}")]
    InterfaceMismatch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unconfigured,
    Inactive,
    Active,
}

/// Trajectory waiting to be started on the next cycle.
enum Staged {
    /// From a goal or a fire-and-forget command; starts from the current state.
    Command(Arc<JointTrajectory>),
    /// Hold trajectory built by the controller itself.
    Hold(Trajectory),
}

struct ActiveGoal {
    id: GoalId,
    tolerances: Arc<SegmentTolerances>,
}

/// Executes joint trajectories inside a periodic control loop.
///
/// `update` never blocks: goals arrive through the shared [`GoalExchange`] and
/// progress leaves through the [`EventSink`].
pub struct JointTrajectoryController {
    exchange: Arc<GoalExchange>,
    events: Box<dyn EventSink>,
    undelivered: VecDeque<ControllerEvent>,

    lifecycle: LifecycleState,
    config: ControllerConfig,
    default_tolerances: Arc<SegmentTolerances>,
    active_tolerances: Arc<SegmentTolerances>,
    pids: Vec<PidController>,
    ff_velocity_scale: Vec<f64>,
    use_closed_loop_pid: bool,

    staged: Option<Staged>,
    trajectory: Option<Arc<Trajectory>>,
    goal: Option<ActiveGoal>,
    holding: bool,
    first_sample: bool,
    clock: ScalingClock,

    state_current: JointTrajectoryPoint,
    state_desired: JointTrajectoryPoint,
    state_error: JointTrajectoryPoint,
    last_commanded: JointTrajectoryPoint,
    closed_loop_command: Vec<f64>,
}

impl JointTrajectoryController {
    pub fn new(exchange: Arc<GoalExchange>, events: impl EventSink + 'static) -> Self {
        Self {
            exchange,
            events: Box::new(events),
            undelivered: VecDeque::new(),
            lifecycle: LifecycleState::Unconfigured,
            config: ControllerConfig::default(),
            default_tolerances: Arc::default(),
            active_tolerances: Arc::default(),
            pids: Vec::new(),
            ff_velocity_scale: Vec::new(),
            use_closed_loop_pid: false,
            staged: None,
            trajectory: None,
            goal: None,
            holding: false,
            first_sample: false,
            clock: ScalingClock::new(),
            state_current: JointTrajectoryPoint::default(),
            state_desired: JointTrajectoryPoint::default(),
            state_error: JointTrajectoryPoint::default(),
            last_commanded: JointTrajectoryPoint::default(),
            closed_loop_command: Vec::new(),
        }
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn exchange(&self) -> &Arc<GoalExchange> {
        &self.exchange
    }

    pub fn dof(&self) -> usize {
        self.config.dof()
    }

    /// Latest sampled setpoint.
    pub fn state_reference(&self) -> &JointTrajectoryPoint {
        &self.state_desired
    }

    /// Latest measured state.
    pub fn state_feedback(&self) -> &JointTrajectoryPoint {
        &self.state_current
    }

    pub fn state_error(&self) -> &JointTrajectoryPoint {
        &self.state_error
    }

    pub fn last_commanded(&self) -> &JointTrajectoryPoint {
        &self.last_commanded
    }

    pub fn active_goal(&self) -> Option<GoalId> {
        self.goal.as_ref().map(|goal| goal.id)
    }

    pub fn active_tolerances(&self) -> &SegmentTolerances {
        &self.active_tolerances
    }

    pub fn default_tolerances(&self) -> &SegmentTolerances {
        &self.default_tolerances
    }

    pub fn has_active_trajectory(&self) -> bool {
        self.trajectory.is_some()
    }

    pub fn is_holding(&self) -> bool {
        self.holding
    }

    pub fn uses_closed_loop_pid(&self) -> bool {
        self.use_closed_loop_pid
    }

    /// Buffers matching the configured joints and interfaces.
    pub fn make_interfaces(&self) -> JointInterfaces {
        JointInterfaces::new(
            self.config.joints.clone(),
            &self.config.command_interfaces,
            &self.config.state_interfaces,
        )
    }

    pub fn on_configure(&mut self, config: ControllerConfig) -> Result<(), ControllerError> {
        if self.lifecycle == LifecycleState::Active {
            return Err(ControllerError::InvalidTransition {
                action: "configure",
                state: self.lifecycle,
            });
        }
        config.validate()?;

        let dof = config.dof();
        self.use_closed_loop_pid = config.uses_closed_loop_adapter();
        self.pids.clear();
        self.ff_velocity_scale.clear();
        if self.use_closed_loop_pid {
            for joint in &config.joints {
                let gains = config.gains.get(joint).copied().unwrap_or_else(|| {
                    tracing::warn!("No gains configured for joint '{}', using zero gains", joint);
                    Default::default()
                });
                self.pids.push(PidController::from_gains(&gains));
                self.ff_velocity_scale.push(gains.ff_velocity_scale);
            }
        }

        self.default_tolerances = Arc::new(SegmentTolerances::from_config(&config));
        self.active_tolerances = self.default_tolerances.clone();
        self.state_current = JointTrajectoryPoint::with_capacity(dof);
        self.state_desired = JointTrajectoryPoint::with_capacity(dof);
        self.state_error = JointTrajectoryPoint::with_capacity(dof);
        self.last_commanded = JointTrajectoryPoint::with_capacity(dof);
        self.closed_loop_command = vec![0.0; dof];
        self.exchange
            .scaling()
            .set(config.speed_scaling.initial_scaling_factor);

        tracing::info!(
            "Configured {} joints, command interfaces {:?}, state interfaces {:?}{}",
            dof,
            config.command_interfaces,
            config.state_interfaces,
            if self.use_closed_loop_pid { ", closed-loop PID" } else { "" }
        );
        self.config = config;
        self.lifecycle = LifecycleState::Inactive;
        Ok(())
    }

    pub fn on_activate(&mut self, interfaces: &mut JointInterfaces) -> Result<(), ControllerError> {
        if self.lifecycle != LifecycleState::Inactive {
            return Err(ControllerError::InvalidTransition {
                action: "activate",
                state: self.lifecycle,
            });
        }
        self.check_interfaces(interfaces)?;

        self.read_state(interfaces);
        // a running command survives a controller restart
        if self.read_commands(interfaces) {
            self.state_current.assign(&self.last_commanded);
        } else {
            self.last_commanded.assign(&self.state_current);
        }
        for pid in &mut self.pids {
            pid.reset();
        }
        self.clock.reset();
        self.trajectory = None;
        self.staged = None;
        self.goal = None;
        self.holding = false;
        self.first_sample = false;
        self.active_tolerances = self.default_tolerances.clone();
        self.exchange.publish_trajectory(None);
        self.exchange.set_active_goal(None);
        self.exchange.take_cancels();
        while let Some(stale) = self.exchange.take_pending() {
            self.abort_unstarted(&stale);
        }

        if self.config.start_with_holding {
            self.stage_hold(false);
        }

        self.exchange.set_accepting(true);
        self.lifecycle = LifecycleState::Active;
        tracing::info!("Controller activated");
        Ok(())
    }

    pub fn on_deactivate(&mut self, interfaces: &mut JointInterfaces) -> Result<(), ControllerError> {
        if self.lifecycle != LifecycleState::Active {
            return Err(ControllerError::InvalidTransition {
                action: "deactivate",
                state: self.lifecycle,
            });
        }
        self.exchange.set_accepting(false);

        if self.goal.is_some() {
            tracing::warn!("Aborting active goal, controller is deactivating");
            self.finish_goal(
                GoalOutcome::Aborted(AbortReason::ControllerDeactivated),
                "Goal aborted during controller deactivation",
            );
        }
        while let Some(pending) = self.exchange.take_pending() {
            self.abort_unstarted(&pending);
        }
        self.exchange.take_cancels();

        // position command keeps its value, everything else is stopped
        for interface in [InterfaceType::Velocity, InterfaceType::Acceleration, InterfaceType::Effort] {
            interfaces.command.fill(interface, 0.0);
        }

        self.trajectory = None;
        self.staged = None;
        self.holding = false;
        self.exchange.publish_trajectory(None);
        self.exchange.set_active_goal(None);
        self.flush_undelivered();
        self.lifecycle = LifecycleState::Inactive;
        tracing::info!("Controller deactivated");
        Ok(())
    }

    pub fn on_cleanup(&mut self) -> Result<(), ControllerError> {
        if self.lifecycle != LifecycleState::Inactive {
            return Err(ControllerError::InvalidTransition {
                action: "clean up",
                state: self.lifecycle,
            });
        }
        self.config = ControllerConfig::default();
        self.pids.clear();
        self.lifecycle = LifecycleState::Unconfigured;
        Ok(())
    }

    /// Run one control cycle.
    ///
    /// Order within a cycle: pick up a new goal, read state, sample, evaluate
    /// tolerances, write commands, emit feedback and results, then apply a
    /// pending cancel request. A tolerance violation detected in the same cycle
    /// as a cancel request therefore wins.
    pub fn update(&mut self, period: Duration, interfaces: &mut JointInterfaces) -> Result<(), ControllerError> {
        self.flush_undelivered();
        if self.lifecycle != LifecycleState::Active {
            return Ok(());
        }
        if interfaces.dof() != self.dof() {
            return Err(ControllerError::InterfaceMismatch(format!(
                "expected {} joints, got {}",
                self.dof(),
                interfaces.dof()
            )));
        }

        if let Some(pending) = self.exchange.take_pending() {
            self.start_pending(&pending);
        }

        self.read_state(interfaces);

        if let Some(staged) = self.staged.take() {
            self.begin(staged);
        } else if self.trajectory.is_some() {
            self.clock.advance(period, self.exchange.scaling().get());
            self.first_sample = false;
        }

        let Some(trajectory) = self.trajectory.clone() else {
            self.apply_cancel();
            return Ok(());
        };
        let method = self.config.interpolation_method;
        if trajectory
            .sample_into(self.clock.trajectory_time(), method, &mut self.state_desired)
            .is_none()
        {
            tracing::error!("Active trajectory has no points, holding position");
            self.stage_hold(false);
            self.apply_cancel();
            return Ok(());
        }
        self.state_current.time_from_start = secs(self.clock.wall_time());
        compute_error(&self.state_desired, &self.state_current, &mut self.state_error);

        let outcome = match (self.holding, trajectory.last_point()) {
            (false, Some(final_point)) => {
                let context = EvaluationContext {
                    elapsed: self.clock.trajectory_time(),
                    end_time: trajectory.end_time(),
                    first_sample: self.first_sample,
                    final_point,
                };
                evaluate(&self.state_desired, &self.state_current, &context, &self.active_tolerances)
            }
            _ => Outcome::Continue,
        };
        let violated = matches!(outcome, Outcome::PathViolation(_) | Outcome::GoalViolation { .. });

        if !violated {
            self.write_commands(interfaces, period);
            self.last_commanded.assign(&self.state_desired);
        }

        if let Some(goal) = self.active_goal() {
            self.emit(ControllerEvent::Feedback {
                goal,
                feedback: Feedback {
                    desired: self.state_desired.clone(),
                    actual: self.state_current.clone(),
                    error: self.state_error.clone(),
                },
            });
            self.resolve_outcome(outcome, &trajectory);
        } else {
            match outcome {
                Outcome::PathViolation(violation) => {
                    tracing::error!("Path tolerance violated: {}, holding position", self.describe(&violation));
                    self.stage_hold(false);
                }
                Outcome::GoalViolation { violation, .. } => {
                    tracing::error!("Goal tolerance violated: {}, holding position", self.describe(&violation));
                    self.stage_hold(false);
                }
                Outcome::GoalReached => self.holding = true,
                Outcome::Continue => {}
            }
        }

        self.apply_cancel();
        Ok(())
    }

    fn resolve_outcome(&mut self, outcome: Outcome, trajectory: &Trajectory) {
        match outcome {
            Outcome::Continue => {}
            Outcome::PathViolation(violation) => {
                let message = format!("Aborted due to path tolerance violation: {}", self.describe(&violation));
                tracing::error!("{}", message);
                self.finish_goal(GoalOutcome::Aborted(AbortReason::PathToleranceViolated), message);
                self.stage_hold(false);
            }
            Outcome::GoalViolation { overshoot, violation } => {
                let message = format!(
                    "Aborted due to goal tolerance violation {:.4}s after the end: {}",
                    overshoot,
                    self.describe(&violation)
                );
                tracing::error!("{}", message);
                self.finish_goal(GoalOutcome::Aborted(AbortReason::GoalToleranceViolated), message);
                self.stage_hold(false);
            }
            Outcome::GoalReached => {
                tracing::info!("Goal reached");
                self.finish_goal(GoalOutcome::Succeeded, "Goal successfully reached");
                if let Some(last) = trajectory.last_point() {
                    self.staged = Some(Staged::Hold(Trajectory::hold(self.config.joints.clone(), last, true)));
                }
            }
        }
    }

    fn describe(&self, violation: &ToleranceViolation) -> String {
        let joint = self
            .config
            .joints
            .get(violation.joint)
            .map(String::as_str)
            .unwrap_or("?");
        format!(
            "joint '{}' {} error {:.6} exceeds {:.6}",
            joint, violation.axis, violation.error, violation.tolerance
        )
    }

    fn start_pending(&mut self, pending: &PendingGoal) {
        if self.goal.is_some() {
            tracing::info!("Active goal superseded");
            self.finish_goal(
                GoalOutcome::Canceled(CancelReason::Superseded),
                "Superseded by a newer goal",
            );
        }
        self.active_tolerances = pending
            .tolerances
            .clone()
            .unwrap_or_else(|| self.default_tolerances.clone());
        if let Some(id) = pending.id {
            self.goal = Some(ActiveGoal {
                id,
                tolerances: self.active_tolerances.clone(),
            });
            self.exchange.set_active_goal(Some(id));
            self.emit(ControllerEvent::Executing { goal: id });
            tracing::info!("Executing goal {}", id);
        } else {
            tracing::info!("Executing trajectory command");
        }
        self.staged = Some(Staged::Command(pending.trajectory.clone()));
    }

    fn begin(&mut self, staged: Staged) {
        let (trajectory, holding) = match staged {
            Staged::Command(msg) => {
                let start = if self.config.open_loop_control {
                    &self.last_commanded
                } else {
                    &self.state_current
                };
                let mut state_before = start.clone();
                state_before.time_from_start = Duration::ZERO;
                (Trajectory::new(msg, state_before), false)
            }
            Staged::Hold(hold) => (hold, true),
        };
        let trajectory = Arc::new(trajectory);
        self.exchange.publish_trajectory(Some(trajectory.clone()));
        self.trajectory = Some(trajectory);
        self.holding = holding;
        self.first_sample = true;
        self.clock.reset();
        for pid in &mut self.pids {
            pid.reset();
        }
    }

    /// Hold the measured position from the next cycle on.
    fn stage_hold(&mut self, keep_velocities: bool) {
        self.staged = Some(Staged::Hold(Trajectory::hold(
            self.config.joints.clone(),
            &self.state_current,
            keep_velocities,
        )));
    }

    fn apply_cancel(&mut self) {
        for id in self.exchange.take_cancels() {
            if self.active_goal() == Some(id) {
                tracing::info!("Canceling goal {}", id);
                self.finish_goal(GoalOutcome::Canceled(CancelReason::Requested), "Goal canceled");
                self.stage_hold(false);
            } else {
                tracing::debug!("Ignoring cancel request for goal {}, it is not executing", id);
            }
        }
    }

    fn finish_goal(&mut self, outcome: GoalOutcome, message: impl Into<String>) {
        let Some(goal) = self.goal.take() else {
            return;
        };
        self.exchange.set_active_goal(None);
        let result = GoalResult::new(outcome, message, (*goal.tolerances).clone());
        self.emit(ControllerEvent::Finished { goal: goal.id, result });
    }

    fn abort_unstarted(&mut self, pending: &PendingGoal) {
        let Some(id) = pending.id else {
            return;
        };
        tracing::warn!("Aborting goal {}, controller is not active", id);
        let tolerances = pending
            .tolerances
            .as_deref()
            .cloned()
            .unwrap_or_else(|| (*self.default_tolerances).clone());
        let result = GoalResult::new(
            GoalOutcome::Aborted(AbortReason::ControllerDeactivated),
            "Controller is not active",
            tolerances,
        );
        self.emit(ControllerEvent::Finished { goal: id, result });
    }

    /// Send an event, keeping results that could not be delivered for later.
    fn emit(&mut self, event: ControllerEvent) {
        if !self.undelivered.is_empty() {
            if !event.is_feedback() {
                self.undelivered.push_back(event);
            }
            return;
        }
        if let Err(event) = self.events.publish(event) {
            if event.is_feedback() {
                tracing::trace!("Event sink full, dropping feedback");
            } else {
                tracing::warn!("Event sink full, retrying next cycle");
                self.undelivered.push_back(event);
            }
        }
    }

    fn flush_undelivered(&mut self) {
        while let Some(event) = self.undelivered.pop_front() {
            if let Err(event) = self.events.publish(event) {
                self.undelivered.push_front(event);
                break;
            }
        }
    }

    fn check_interfaces(&self, interfaces: &JointInterfaces) -> Result<(), ControllerError> {
        if interfaces.dof() != self.dof() {
            return Err(ControllerError::InterfaceMismatch(format!(
                "expected {} joints, got {}",
                self.dof(),
                interfaces.dof()
            )));
        }
        for interface in &self.config.command_interfaces {
            if !interfaces.command.has(*interface) {
                return Err(ControllerError::InterfaceMismatch(format!(
                    "missing '{}' command interface",
                    interface
                )));
            }
        }
        for interface in &self.config.state_interfaces {
            if !interfaces.state.has(*interface) {
                return Err(ControllerError::InterfaceMismatch(format!(
                    "missing '{}' state interface",
                    interface
                )));
            }
        }
        Ok(())
    }

    fn read_state(&mut self, interfaces: &JointInterfaces) {
        let state = &interfaces.state;
        let current = &mut self.state_current;
        copy_interface(&mut current.positions, state.get(InterfaceType::Position));
        copy_interface(&mut current.velocities, state.get(InterfaceType::Velocity));
        copy_interface(&mut current.accelerations, state.get(InterfaceType::Acceleration));
    }

    /// Load the last commands into `last_commanded`. False if any position
    /// command was never written.
    fn read_commands(&mut self, interfaces: &JointInterfaces) -> bool {
        let command = &interfaces.command;
        let Some(positions) = command.get(InterfaceType::Position) else {
            return false;
        };
        if positions.iter().any(|p| p.is_nan()) {
            return false;
        }
        let commanded = &mut self.last_commanded;
        copy_interface(&mut commanded.positions, Some(positions));
        copy_interface(
            &mut commanded.velocities,
            written(command.get(InterfaceType::Velocity)),
        );
        copy_interface(
            &mut commanded.accelerations,
            written(command.get(InterfaceType::Acceleration)),
        );
        true
    }

    fn write_commands(&mut self, interfaces: &mut JointInterfaces, period: Duration) {
        let desired = &self.state_desired;
        if self.use_closed_loop_pid {
            let dt = period.as_secs_f64();
            let error = &self.state_error;
            for (j, pid) in self.pids.iter_mut().enumerate() {
                let feedforward = desired.velocities.get(j).copied().unwrap_or(0.0)
                    * self.ff_velocity_scale.get(j).copied().unwrap_or(0.0);
                let position_error = error.positions.get(j).copied().unwrap_or(0.0);
                let velocity_error = error.velocities.get(j).copied();
                self.closed_loop_command[j] = feedforward + pid.compute_command(position_error, velocity_error, dt);
            }
        }

        let command = &mut interfaces.command;
        if let Some(buffer) = command.get_mut(InterfaceType::Position) {
            copy_values(buffer, &desired.positions);
        }
        if let Some(buffer) = command.get_mut(InterfaceType::Velocity) {
            if self.use_closed_loop_pid {
                copy_values(buffer, &self.closed_loop_command);
            } else {
                copy_values(buffer, &desired.velocities);
            }
        }
        if let Some(buffer) = command.get_mut(InterfaceType::Acceleration) {
            copy_values(buffer, &desired.accelerations);
        }
        if let Some(buffer) = command.get_mut(InterfaceType::Effort) {
            copy_values(buffer, &self.closed_loop_command);
            for (value, feedforward) in buffer.iter_mut().zip(&desired.effort) {
                *value += feedforward;
            }
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or_default()
}

fn copy_interface(target: &mut Vec<f64>, source: Option<&[f64]>) {
    target.clear();
    if let Some(values) = source {
        target.extend_from_slice(values);
    }
}

/// Command values, unless some were never written.
fn written(values: Option<&[f64]>) -> Option<&[f64]> {
    values.filter(|v| v.iter().all(|x| !x.is_nan()))
}

fn copy_values(target: &mut [f64], source: &[f64]) {
    for (t, s) in target.iter_mut().zip(source) {
        *t = *s;
    }
}

/// `desired - current`, per measured quantity.
fn compute_error(desired: &JointTrajectoryPoint, current: &JointTrajectoryPoint, error: &mut JointTrajectoryPoint) {
    fn difference(target: &mut Vec<f64>, desired: &[f64], current: &[f64]) {
        target.clear();
        target.extend(desired.iter().zip(current).map(|(d, c)| d - c));
    }
    difference(&mut error.positions, &desired.positions, &current.positions);
    difference(&mut error.velocities, &desired.velocities, &current.velocities);
    difference(&mut error.accelerations, &desired.accelerations, &current.accelerations);
    error.time_from_start = desired.time_from_start;
}
