// src/motion/pid.rs
use crate::config::GainsConfig;

/// PID controller used to turn joint position error into velocity or effort.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    /// Symmetric bound on the integral contribution; zero disables the bound.
    i_clamp: f64,

    integral: f64,
    previous_error: f64,
    first_update: bool,
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64, i_clamp: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            i_clamp: i_clamp.abs(),
            integral: 0.0,
            previous_error: 0.0,
            first_update: true,
        }
    }

    pub fn from_gains(gains: &GainsConfig) -> Self {
        Self::new(gains.p, gains.i, gains.d, gains.i_clamp)
    }

    /// Compute the output for `error`.
    ///
    /// `error_dot` is the derivative of the error when it is measured directly
    /// (velocity error); without it the derivative is estimated by finite
    /// difference, skipped on the first update.
    pub fn compute_command(&mut self, error: f64, error_dot: Option<f64>, dt: f64) -> f64 {
        if !(dt > 0.0) || !error.is_finite() {
            return 0.0;
        }

        let p_term = self.kp * error;

        self.integral += error * dt;
        let mut i_term = self.ki * self.integral;
        if self.i_clamp > 0.0 && i_term.abs() > self.i_clamp {
            i_term = i_term.clamp(-self.i_clamp, self.i_clamp);
            // anti-windup
            if self.ki != 0.0 {
                self.integral = i_term / self.ki;
            }
        }

        let d_term = match error_dot {
            Some(rate) => self.kd * rate,
            None if self.first_update => 0.0,
            None => self.kd * (error - self.previous_error) / dt,
        };
        self.first_update = false;
        self.previous_error = error;

        p_term + i_term + d_term
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
        self.first_update = true;
    }

    pub fn gains(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }
}
