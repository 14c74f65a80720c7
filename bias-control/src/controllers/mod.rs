//! Closed-loop setpoint controllers
//!
//! Two interchangeable strategies drive a single scalar actuator until a
//! measured scalar matches a target within tolerance:
//! - [`BisectionController`]: adaptive step search for monotonic plants
//! - [`PidController`]: proportional-integral-derivative control
//!
//! [`SetpointController`] wraps both behind one contract so leveling sessions
//! and the lock-and-bias procedure never care which strategy is in use.

mod bisection;
mod pid;

pub use bisection::BisectionController;
pub use pid::PidController;

use crate::config::{ControllerConfig, StrategyConfig};
use crate::error::ConfigError;
use crate::state::{ControllerState, ControllerStatus, FailureKind};

/// Report which bound, if any, `output` is pinned against while `direction`
/// (+1 for more output, -1 for less) still pushes into it.
///
/// Returns `Some(true)` for the upper bound and `Some(false)` for the lower.
pub(crate) fn pinned_bound(output: f64, min: f64, max: f64, direction: f64) -> Option<bool> {
    if output >= max && direction > 0.0 {
        Some(true)
    } else if output <= min && direction < 0.0 {
        Some(false)
    } else {
        None
    }
}

/// A setpoint controller of either strategy
///
/// Owns its [`ControllerState`] exclusively. Not safe for concurrent
/// `process` calls; give every session its own instance.
#[derive(Debug, Clone)]
pub enum SetpointController {
    /// Adaptive step search
    Bisection(BisectionController),
    /// PID control
    Pid(PidController),
}

impl SetpointController {
    /// Build the controller named by `config.strategy`.
    pub fn new(config: ControllerConfig) -> Result<Self, ConfigError> {
        match config.strategy {
            StrategyConfig::Bisection { .. } => {
                BisectionController::new(config).map(SetpointController::Bisection)
            }
            StrategyConfig::Pid(_) => PidController::new(config).map(SetpointController::Pid),
        }
    }

    /// Reinitialize output, iteration and status from `config`.
    ///
    /// Switching strategy replaces the inner controller.
    pub fn reset(&mut self, config: ControllerConfig) -> Result<(), ConfigError> {
        let same_strategy = matches!(
            (&*self, &config.strategy),
            (SetpointController::Bisection(_), StrategyConfig::Bisection { .. })
                | (SetpointController::Pid(_), StrategyConfig::Pid(_))
        );
        if !same_strategy {
            *self = Self::new(config)?;
            return Ok(());
        }

        match self {
            SetpointController::Bisection(c) => c.reset(config),
            SetpointController::Pid(c) => c.reset(config),
        }
    }

    /// Consume one measurement and return the next commanded output.
    pub fn process(&mut self, measurement: f64) -> f64 {
        match self {
            SetpointController::Bisection(c) => c.process(measurement),
            SetpointController::Pid(c) => c.process(measurement),
        }
    }

    /// Update the target in place; output and iteration are untouched.
    pub fn set_setpoint(&mut self, setpoint: f64) {
        match self {
            SetpointController::Bisection(c) => c.set_setpoint(setpoint),
            SetpointController::Pid(c) => c.set_setpoint(setpoint),
        }
    }

    /// Mark the controller cancelled; output is left as last commanded.
    pub fn cancel(&mut self) {
        let state = match self {
            SetpointController::Bisection(c) => c.state_mut(),
            SetpointController::Pid(c) => c.state_mut(),
        };
        if !state.status.is_terminal() {
            state.status = ControllerStatus::Cancelled;
        }
    }

    /// Full state snapshot
    pub fn state(&self) -> ControllerState {
        match self {
            SetpointController::Bisection(c) => *c.state(),
            SetpointController::Pid(c) => *c.state(),
        }
    }

    /// Active configuration, including any in-place setpoint change
    pub fn config(&self) -> &ControllerConfig {
        match self {
            SetpointController::Bisection(c) => c.config(),
            SetpointController::Pid(c) => c.config(),
        }
    }

    /// Commanded actuator value
    pub fn output(&self) -> f64 {
        self.state().output
    }

    /// Number of `process` calls since the last reset
    pub fn iteration(&self) -> usize {
        self.state().iteration
    }

    /// Current status
    pub fn status(&self) -> ControllerStatus {
        self.state().status
    }

    /// Reason for a `Failed` status
    pub fn failure(&self) -> Option<FailureKind> {
        match self {
            SetpointController::Bisection(c) => c.failure(),
            SetpointController::Pid(c) => c.failure(),
        }
    }

    /// Strategy name for logs
    pub fn strategy_name(&self) -> &'static str {
        match self {
            SetpointController::Bisection(_) => "bisection",
            SetpointController::Pid(_) => "PID",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PidGains;

    fn bisection() -> ControllerConfig {
        ControllerConfig {
            setpoint: 50.0,
            tolerance_abs: 0.5,
            output_min: 0.0,
            output_max: 100.0,
            max_iterations: 20,
            initial_output: 20.0,
            reverse_acting: false,
            strategy: StrategyConfig::Bisection {
                initial_step_fraction: 0.2,
            },
        }
    }

    fn pid() -> ControllerConfig {
        ControllerConfig {
            strategy: StrategyConfig::Pid(PidGains {
                kp: 0.3,
                ki: 3.0,
                kd: 0.0,
                sample_interval_s: 0.1,
                saturation_iterations: 3,
            }),
            max_iterations: 50,
            ..bisection()
        }
    }

    #[test]
    fn test_pinned_bound() {
        assert_eq!(pinned_bound(100.0, 0.0, 100.0, 1.0), Some(true));
        assert_eq!(pinned_bound(0.0, 0.0, 100.0, -1.0), Some(false));
        assert_eq!(pinned_bound(100.0, 0.0, 100.0, -1.0), None);
        assert_eq!(pinned_bound(50.0, 0.0, 100.0, 1.0), None);
    }

    #[test]
    fn test_both_strategies_converge_through_common_contract() {
        for config in [bisection(), pid()] {
            let mut controller = SetpointController::new(config).unwrap();
            while !controller.status().is_terminal() {
                let measured = 0.8 * controller.output();
                controller.process(measured);
            }
            assert_eq!(
                controller.status(),
                ControllerStatus::Converged,
                "{} did not converge",
                controller.strategy_name()
            );
            assert!((0.8 * controller.output() - 50.0).abs() <= 0.5);
        }
    }

    #[test]
    fn test_reset_rejects_degenerate_bounds() {
        let mut controller = SetpointController::new(bisection()).unwrap();
        let mut bad = bisection();
        bad.output_min = 20.0;
        bad.output_max = 20.0;
        assert_eq!(
            controller.reset(bad),
            Err(ConfigError::DegenerateBounds(20.0))
        );
    }

    #[test]
    fn test_reset_can_switch_strategy() {
        let mut controller = SetpointController::new(bisection()).unwrap();
        controller.reset(pid()).unwrap();
        assert_eq!(controller.strategy_name(), "PID");
        assert_eq!(controller.iteration(), 0);
    }

    #[test]
    fn test_cancel_keeps_output() {
        let mut controller = SetpointController::new(bisection()).unwrap();
        controller.process(16.0);
        let output = controller.output();
        controller.cancel();
        assert_eq!(controller.status(), ControllerStatus::Cancelled);
        assert_eq!(controller.output(), output);

        // Cancelling does not override a terminal result
        let mut done = SetpointController::new(bisection()).unwrap();
        done.process(50.0);
        done.cancel();
        assert_eq!(done.status(), ControllerStatus::Converged);
    }
}
