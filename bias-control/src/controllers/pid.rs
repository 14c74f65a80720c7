//! Discrete-time PID setpoint controller
//!
//! Standard proportional-integral-derivative update with:
//! - trapezoidal integration of the error
//! - derivative on measurement (no kick when the setpoint changes)
//! - back-calculation anti-windup against the output bounds
//! - integrator seeded with `initial_output` so the first command starts there
//!
//! The PID law itself never declares convergence. [`PidController::process`]
//! wraps it with the same tolerance supervision the bisection controller
//! applies, so a leveling session only reads the resulting status. Each step
//! checks the measurement against the tolerance band first and holds the
//! output when inside it. Otherwise the law runs, a spent iteration budget
//! fails, and an output pinned at a bound for `saturation_iterations`
//! consecutive steps fails as saturated.

use tracing::debug;

use super::pinned_bound;
use crate::config::{ControllerConfig, PidGains, StrategyConfig};
use crate::error::ConfigError;
use crate::state::{ControllerState, ControllerStatus, FailureKind};

/// PID controller with setpoint-tracking supervision
#[derive(Debug, Clone)]
pub struct PidController {
    config: ControllerConfig,
    gains: PidGains,
    /// Back-calculation gain
    kb: f64,
    integral: f64,
    prev_error: f64,
    prev_measurement: f64,
    initialized: bool,
    /// Consecutive updates that left the output pinned at a bound
    pinned_count: usize,
    state: ControllerState,
    failure: Option<FailureKind>,
}

impl PidController {
    /// Create a controller from a validated configuration.
    ///
    /// Fails if the configuration is invalid or not a PID strategy.
    pub fn new(config: ControllerConfig) -> Result<Self, ConfigError> {
        let gains = match &config.strategy {
            StrategyConfig::Pid(gains) => gains.clone(),
            StrategyConfig::Bisection { .. } => {
                return Err(ConfigError::StrategyMismatch { expected: "PID" })
            }
        };
        let mut controller = Self {
            gains,
            kb: 0.0,
            integral: 0.0,
            prev_error: 0.0,
            prev_measurement: 0.0,
            initialized: false,
            pinned_count: 0,
            state: ControllerState {
                output: config.initial_output,
                iteration: 0,
                status: ControllerStatus::Running,
                last_error: 0.0,
            },
            failure: None,
            config: config.clone(),
        };
        controller.reset(config)?;
        Ok(controller)
    }

    /// Reinitialize from `config`, clearing integrator and derivative history.
    pub fn reset(&mut self, config: ControllerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let gains = match &config.strategy {
            StrategyConfig::Pid(gains) => gains.clone(),
            StrategyConfig::Bisection { .. } => {
                return Err(ConfigError::StrategyMismatch { expected: "PID" })
            }
        };

        // Default back-calculation gain: ki/kp if kp != 0, else ki
        self.kb = if gains.kp != 0.0 {
            gains.ki / gains.kp
        } else {
            gains.ki
        };
        self.gains = gains;
        self.integral = config.initial_output;
        self.prev_error = 0.0;
        self.prev_measurement = 0.0;
        self.initialized = false;
        self.pinned_count = 0;
        self.failure = None;
        self.state = ControllerState {
            output: config.initial_output,
            iteration: 0,
            status: ControllerStatus::Running,
            last_error: 0.0,
        };
        self.config = config;
        Ok(())
    }

    /// Consume one measurement and return the next commanded output.
    ///
    /// Callers must space calls by at least the configured sample interval.
    pub fn process(&mut self, measurement: f64) -> f64 {
        if self.state.status.is_terminal() {
            return self.state.output;
        }

        self.state.iteration += 1;
        let error = self.config.setpoint - measurement;
        self.state.last_error = error;

        if error.abs() <= self.config.tolerance_abs {
            self.state.status = ControllerStatus::Converged;
            debug!(
                "PID converged at iteration {}: output {:.4}, error {:.4}",
                self.state.iteration, self.state.output, error
            );
            return self.state.output;
        }

        // Work in a frame where positive error calls for more output
        let (e, m) = if self.config.reverse_acting {
            (-error, -measurement)
        } else {
            (error, measurement)
        };

        if self.state.iteration >= self.config.max_iterations {
            self.state.status = ControllerStatus::Failed;
            self.failure = Some(
                match pinned_bound(
                    self.state.output,
                    self.config.output_min,
                    self.config.output_max,
                    e.signum(),
                ) {
                    Some(at_upper) => FailureKind::Saturated { at_upper },
                    None => FailureKind::ConvergenceTimeout,
                },
            );
            return self.state.output;
        }

        let output = self.update(e, m);
        self.state.output = output;

        match pinned_bound(
            output,
            self.config.output_min,
            self.config.output_max,
            e.signum(),
        ) {
            Some(at_upper) => {
                self.pinned_count += 1;
                if self.pinned_count >= self.gains.saturation_iterations.max(1) {
                    self.state.status = ControllerStatus::Failed;
                    self.failure = Some(FailureKind::Saturated { at_upper });
                }
            }
            None => self.pinned_count = 0,
        }

        debug!(
            "PID iteration {}: error {:.4}, integral {:.4}, next output {:.4}",
            self.state.iteration, error, self.integral, output
        );

        output
    }

    /// One PID law step on the direction-normalized error and measurement.
    fn update(&mut self, error: f64, measurement: f64) -> f64 {
        let dt = self.gains.sample_interval_s;

        let p_term = self.gains.kp * error;

        // Trapezoidal integral, skipped on the first step
        if self.initialized {
            self.integral += self.gains.ki * (error + self.prev_error) * dt / 2.0;
        }

        // Derivative on measurement (negated to avoid derivative kick)
        let d_term = if self.initialized {
            -self.gains.kd * (measurement - self.prev_measurement) / dt
        } else {
            0.0
        };

        let unclamped = p_term + self.integral + d_term;
        let clamped = unclamped.clamp(self.config.output_min, self.config.output_max);

        // Anti-windup back-calculation
        if self.initialized {
            self.integral += self.kb * (clamped - unclamped) * dt;
        }

        self.prev_error = error;
        self.prev_measurement = measurement;
        self.initialized = true;

        clamped
    }

    /// Change the target without resetting output, iteration or integrator.
    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.config.setpoint = setpoint;
        if self.state.status == ControllerStatus::Converged {
            self.state.status = ControllerStatus::Running;
        }
    }

    /// Current integrator value
    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Configured gains
    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    pub(crate) fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> &ControllerState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut ControllerState {
        &mut self.state
    }

    pub(crate) fn failure(&self) -> Option<FailureKind> {
        self.failure
    }
}
