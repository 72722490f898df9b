// src/scheduler/control_loop.rs - Periodic read/update/write cycle
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use crate::hardware::{HardwareError, JointHardware, JointInterfaces};
use crate::motion::controller::{ControllerError, JointTrajectoryController, LifecycleState};

#[derive(Debug, Error)]
pub enum ControlLoopError {
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),
    #[error("Controller must be configured before it is attached to a loop")]
    NotConfigured,
}

/// Drives one controller against one hardware backend.
pub struct ControlLoop<H: JointHardware> {
    controller: JointTrajectoryController,
    hardware: H,
    interfaces: JointInterfaces,
    period: Duration,
    cycles: u64,
}

impl<H: JointHardware> ControlLoop<H> {
    pub fn new(controller: JointTrajectoryController, hardware: H) -> Result<Self, ControlLoopError> {
        if controller.lifecycle_state() == LifecycleState::Unconfigured {
            return Err(ControlLoopError::NotConfigured);
        }
        let rate = controller.config().update_rate.max(1);
        let interfaces = controller.make_interfaces();
        Ok(Self {
            controller,
            hardware,
            interfaces,
            period: Duration::from_secs_f64(1.0 / rate as f64),
            cycles: 0,
        })
    }

    pub fn controller(&self) -> &JointTrajectoryController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut JointTrajectoryController {
        &mut self.controller
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    pub fn interfaces(&self) -> &JointInterfaces {
        &self.interfaces
    }

    /// Nominal cycle period derived from `update_rate`.
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Read the initial state and activate the controller.
    pub fn start(&mut self) -> Result<(), ControlLoopError> {
        self.hardware.read(&mut self.interfaces.state, Duration::ZERO)?;
        self.controller.on_activate(&mut self.interfaces)?;
        Ok(())
    }

    /// One read, update, write cycle.
    pub fn cycle(&mut self, period: Duration) -> Result<(), ControlLoopError> {
        self.hardware.read(&mut self.interfaces.state, period)?;
        self.controller.update(period, &mut self.interfaces)?;
        self.hardware.write(&self.interfaces.command, period)?;
        self.cycles += 1;
        Ok(())
    }

    /// Deactivate the controller and push the stopped commands to the hardware.
    pub fn stop(&mut self) -> Result<(), ControlLoopError> {
        if self.controller.lifecycle_state() == LifecycleState::Active {
            self.controller.on_deactivate(&mut self.interfaces)?;
            self.hardware.write(&self.interfaces.command, Duration::ZERO)?;
        }
        Ok(())
    }

    /// Run cycles at the configured rate until `shutdown` fires, then stop.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<Self, ControlLoopError> {
        self.start()?;
        tracing::info!("Control loop running at {:?} per cycle", self.period);

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Control loop shutting down after {} cycles", self.cycles);
                    break;
                }
                tick = interval.tick() => {
                    let period = last_tick.map(|last| tick - last).unwrap_or(self.period);
                    last_tick = Some(tick);
                    if let Err(e) = self.cycle(period) {
                        tracing::error!("Control cycle error: {}", e);
                    }
                }
            }
        }

        self.stop()?;
        Ok(self)
    }
}
