//! Configuration types for leveling and lock-and-bias runs
//!
//! All configuration is passed in as plain values at the start of a run.
//! Nothing here reads files on its own; reloading is the caller's job.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of consecutive pinned-at-bound iterations before a PID
/// loop is declared saturated.
pub const DEFAULT_SATURATION_ITERATIONS: usize = 3;

fn default_saturation_iterations() -> usize {
    DEFAULT_SATURATION_ITERATIONS
}

/// Proportional-integral-derivative gains and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain (per second)
    pub ki: f64,
    /// Derivative gain (seconds)
    pub kd: f64,
    /// Minimum interval between controller updates, also used as the PID time step
    pub sample_interval_s: f64,
    /// Consecutive iterations pinned at an output bound before reporting saturation
    #[serde(default = "default_saturation_iterations")]
    pub saturation_iterations: usize,
}

impl PidGains {
    /// Minimum interval between controller updates
    pub fn sample_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.sample_interval_s).unwrap_or(Duration::ZERO)
    }
}

/// Strategy-specific controller parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Adaptive step search
    Bisection {
        /// Initial step as a fraction of the output range, in (0, 1]
        initial_step_fraction: f64,
    },
    /// Proportional-integral-derivative control
    Pid(PidGains),
}

/// Configuration for one leveling attempt
///
/// Immutable for the lifetime of the attempt except `setpoint`, which may be
/// changed through the controller before or between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Target value for the measured quantity
    pub setpoint: f64,
    /// Convergence band half-width, strictly positive
    pub tolerance_abs: f64,
    /// Lower actuator bound
    pub output_min: f64,
    /// Upper actuator bound
    pub output_max: f64,
    /// Iteration budget; the only timeout inside a controller
    pub max_iterations: usize,
    /// Starting actuator value, within bounds
    pub initial_output: f64,
    /// When true, increasing the output decreases the measurement
    #[serde(default)]
    pub reverse_acting: bool,
    /// Strategy and its parameters
    pub strategy: StrategyConfig,
}

impl ControllerConfig {
    /// Check every field, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("setpoint", self.setpoint),
            ("tolerance_abs", self.tolerance_abs),
            ("output_min", self.output_min),
            ("output_max", self.output_max),
            ("initial_output", self.initial_output),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { field, value });
            }
        }

        if self.output_min == self.output_max {
            return Err(ConfigError::DegenerateBounds(self.output_min));
        }
        if self.output_min > self.output_max {
            return Err(ConfigError::InvertedBounds {
                min: self.output_min,
                max: self.output_max,
            });
        }
        if self.tolerance_abs <= 0.0 {
            return Err(ConfigError::NonPositiveTolerance(self.tolerance_abs));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if self.initial_output < self.output_min || self.initial_output > self.output_max {
            return Err(ConfigError::InitialOutputOutOfRange {
                initial: self.initial_output,
                min: self.output_min,
                max: self.output_max,
            });
        }

        match &self.strategy {
            StrategyConfig::Bisection {
                initial_step_fraction,
            } => {
                let f = *initial_step_fraction;
                if !(f > 0.0 && f <= 1.0) {
                    return Err(ConfigError::InvalidStepFraction(f));
                }
            }
            StrategyConfig::Pid(gains) => {
                for (field, value) in [("kp", gains.kp), ("ki", gains.ki), ("kd", gains.kd)] {
                    if !value.is_finite() {
                        return Err(ConfigError::NonFinite { field, value });
                    }
                }
                if !(gains.sample_interval_s > 0.0 && gains.sample_interval_s.is_finite()) {
                    return Err(ConfigError::InvalidSampleInterval(gains.sample_interval_s));
                }
            }
        }

        Ok(())
    }

    /// Width of the actuator range
    pub fn output_span(&self) -> f64 {
        self.output_max - self.output_min
    }
}

/// Configuration for one leveling channel (e.g. one polarization)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelingConfig {
    /// Channel label used in logs and messages, e.g. "pol0"
    pub channel: String,
    /// Wait between an actuator write and the following read, in seconds
    pub settle_delay_s: f64,
    /// Number of samples averaged per measurement
    pub averaging: usize,
    /// Controller configuration
    pub controller: ControllerConfig,
}

impl LevelingConfig {
    /// Settle delay as a duration
    pub fn settle_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.settle_delay_s).unwrap_or(Duration::ZERO)
    }

    /// Check the delay, then the controller configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_delay("settle_delay_s", self.settle_delay_s)?;
        self.controller.validate()
    }
}

/// Policy for the lock-then-bias-then-level procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureConfig {
    /// Wait before the single lock retry, in seconds
    pub lock_retry_delay_s: f64,
    /// When true a failed lock aborts the run instead of degrading to tuned-only
    pub require_lock: bool,
    /// Run leveling channels concurrently instead of one after another
    pub run_concurrently: bool,
}

impl Default for ProcedureConfig {
    fn default() -> Self {
        Self {
            lock_retry_delay_s: 1.0,
            require_lock: false,
            run_concurrently: false,
        }
    }
}

impl ProcedureConfig {
    /// Lock retry delay as a duration
    pub fn lock_retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.lock_retry_delay_s).unwrap_or(Duration::ZERO)
    }

    /// Check the retry delay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_delay("lock_retry_delay_s", self.lock_retry_delay_s)
    }
}

fn check_delay(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidDelay { field, value })
    }
}
