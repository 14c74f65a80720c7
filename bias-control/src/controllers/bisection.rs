//! Adaptive step search
//!
//! Used where the actuator-to-measurement relationship is monotonic but not
//! modelled precisely (e.g. LO pump power against SIS junction current).
//!
//! # Operation
//! 1. Start at `initial_output` with `step = initial_step_fraction * (max - min)`
//! 2. Each `process()` computes `error = setpoint - measurement`
//! 3. Inside tolerance: converged, output left unchanged
//! 4. Otherwise step toward the setpoint, halving the step whenever the
//!    direction of travel reverses, and clamp to the output bounds
//! 5. Iteration budget exhausted: failed, output left at the last command

use tracing::debug;

use super::pinned_bound;
use crate::config::{ControllerConfig, StrategyConfig};
use crate::error::ConfigError;
use crate::state::{ControllerState, ControllerStatus, FailureKind};

/// Bisection-style hunting controller
#[derive(Debug, Clone)]
pub struct BisectionController {
    config: ControllerConfig,
    /// Current step size in output units
    step: f64,
    /// Direction of the previous move: +1.0 or -1.0
    last_direction: Option<f64>,
    state: ControllerState,
    failure: Option<FailureKind>,
}

impl BisectionController {
    /// Create a controller from a validated configuration.
    ///
    /// Fails if the configuration is invalid or not a bisection strategy.
    pub fn new(config: ControllerConfig) -> Result<Self, ConfigError> {
        let mut controller = Self {
            step: 0.0,
            last_direction: None,
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

    /// Reinitialize from `config`: output, iteration, step and status.
    pub fn reset(&mut self, config: ControllerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let fraction = match config.strategy {
            StrategyConfig::Bisection {
                initial_step_fraction,
            } => initial_step_fraction,
            StrategyConfig::Pid(_) => {
                return Err(ConfigError::StrategyMismatch {
                    expected: "bisection",
                })
            }
        };

        self.step = fraction * config.output_span();
        self.last_direction = None;
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
                "Bisection converged at iteration {}: output {:.4}, error {:.4}",
                self.state.iteration, self.state.output, error
            );
            return self.state.output;
        }

        let direction = if self.config.reverse_acting {
            -error.signum()
        } else {
            error.signum()
        };

        if self.state.iteration >= self.config.max_iterations {
            self.state.status = ControllerStatus::Failed;
            self.failure = Some(
                match pinned_bound(
                    self.state.output,
                    self.config.output_min,
                    self.config.output_max,
                    direction,
                ) {
                    Some(at_upper) => FailureKind::Saturated { at_upper },
                    None => FailureKind::ConvergenceTimeout,
                },
            );
            return self.state.output;
        }

        if self.last_direction.is_some_and(|last| last != direction) {
            self.step /= 2.0;
        }
        self.last_direction = Some(direction);

        self.state.output = (self.state.output + direction * self.step)
            .clamp(self.config.output_min, self.config.output_max);

        debug!(
            "Bisection iteration {}: error {:.4}, step {:.4}, next output {:.4}",
            self.state.iteration, error, self.step, self.state.output
        );

        self.state.output
    }

    /// Change the target without resetting output or iteration.
    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.config.setpoint = setpoint;
        if self.state.status == ControllerStatus::Converged {
            self.state.status = ControllerStatus::Running;
        }
    }

    /// Current step size in output units
    pub fn step(&self) -> f64 {
        self.step
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(max_iterations: usize) -> ControllerConfig {
        ControllerConfig {
            setpoint: 50.0,
            tolerance_abs: 0.5,
            output_min: 0.0,
            output_max: 100.0,
            max_iterations,
            initial_output: 20.0,
            reverse_acting: false,
            strategy: StrategyConfig::Bisection {
                initial_step_fraction: 0.2,
            },
        }
    }

    /// Drive the controller against a plant until it stops.
    fn run_plant(controller: &mut BisectionController, plant: impl Fn(f64) -> f64) {
        while !controller.state().status.is_terminal() {
            let measured = plant(controller.state().output);
            controller.process(measured);
        }
    }

    #[test]
    fn test_initial_state() {
        let controller = BisectionController::new(config(20)).unwrap();
        assert_eq!(controller.state().output, 20.0);
        assert_eq!(controller.state().iteration, 0);
        assert_eq!(controller.state().status, ControllerStatus::Running);
        assert_relative_eq!(controller.step(), 20.0);
    }

    #[test]
    fn test_converges_on_linear_plant() {
        let mut controller = BisectionController::new(config(20)).unwrap();
        run_plant(&mut controller, |out| 0.8 * out);

        assert_eq!(controller.state().status, ControllerStatus::Converged);
        assert!(controller.state().iteration <= 20);
        let measured = 0.8 * controller.state().output;
        assert!((measured - 50.0).abs() <= 0.5, "measured {measured}");
    }

    #[test]
    fn test_step_sequence_on_linear_plant() {
        // 20 -> 40 -> 60 -> 80, reverse (halve to 10) -> 70 -> 60,
        // reverse (5) -> 65, reverse (2.5) -> 62.5 which measures exactly 50
        let mut controller = BisectionController::new(config(20)).unwrap();
        let expected = [40.0, 60.0, 80.0, 70.0, 60.0, 65.0, 62.5];
        for want in expected {
            let out = controller.process(0.8 * controller.state().output);
            assert_relative_eq!(out, want, epsilon = 1e-12);
        }
        controller.process(0.8 * controller.state().output);
        assert_eq!(controller.state().status, ControllerStatus::Converged);
        assert_eq!(controller.state().iteration, 8);
        assert_relative_eq!(controller.state().output, 62.5);
    }

    #[test]
    fn test_constant_plant_fails_pinned_at_max() {
        let mut controller = BisectionController::new(config(20)).unwrap();
        run_plant(&mut controller, |_| 10.0);

        assert_eq!(controller.state().status, ControllerStatus::Failed);
        assert_eq!(controller.state().iteration, 20);
        assert_eq!(controller.state().output, 100.0);
        assert_eq!(
            controller.failure(),
            Some(FailureKind::Saturated { at_upper: true })
        );
    }

    #[test]
    fn test_timeout_away_from_bounds() {
        // Too few iterations to reach the target, but not pinned
        let mut controller = BisectionController::new(config(2)).unwrap();
        run_plant(&mut controller, |out| 0.8 * out);

        assert_eq!(controller.state().status, ControllerStatus::Failed);
        assert_eq!(controller.state().iteration, 2);
        assert_eq!(controller.failure(), Some(FailureKind::ConvergenceTimeout));
    }

    #[test]
    fn test_reverse_acting_plant() {
        let mut cfg = config(30);
        cfg.reverse_acting = true;
        let mut controller = BisectionController::new(cfg).unwrap();
        run_plant(&mut controller, |out| 100.0 - 0.8 * out);

        assert_eq!(controller.state().status, ControllerStatus::Converged);
        let measured = 100.0 - 0.8 * controller.state().output;
        assert!((measured - 50.0).abs() <= 0.5);
    }

    #[test]
    fn test_process_after_terminal_is_noop() {
        let mut controller = BisectionController::new(config(20)).unwrap();
        controller.process(50.0);
        assert_eq!(controller.state().status, ControllerStatus::Converged);

        let out = controller.process(0.0);
        assert_eq!(out, 20.0);
        assert_eq!(controller.state().iteration, 1);
    }

    #[test]
    fn test_setpoint_change_resumes_in_place() {
        let mut controller = BisectionController::new(config(20)).unwrap();
        run_plant(&mut controller, |out| 0.8 * out);
        let converged_output = controller.state().output;
        let iterations = controller.state().iteration;

        controller.set_setpoint(40.0);
        assert_eq!(controller.state().status, ControllerStatus::Running);
        assert_eq!(controller.state().output, converged_output);
        assert_eq!(controller.state().iteration, iterations);

        run_plant(&mut controller, |out| 0.8 * out);
        assert_eq!(controller.state().status, ControllerStatus::Converged);
        assert!((0.8 * controller.state().output - 40.0).abs() <= 0.5);
    }

    #[test]
    fn test_reset_rejects_pid_strategy() {
        let mut cfg = config(20);
        cfg.strategy = StrategyConfig::Pid(crate::config::PidGains {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            sample_interval_s: 0.1,
            saturation_iterations: 3,
        });
        assert!(matches!(
            BisectionController::new(cfg),
            Err(ConfigError::StrategyMismatch { .. })
        ));
    }
}
