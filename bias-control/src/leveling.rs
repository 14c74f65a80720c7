//! Leveling sessions
//!
//! A session drives one [`SetpointController`] against one actuator and one
//! measurement channel until the controller converges, fails, or the caller
//! cancels. Each control step is strictly sequential:
//!
//! 1. check the cancel flag
//! 2. write the controller's current output
//! 3. wait the settle delay (at least the PID sample interval)
//! 4. read an averaged measurement
//! 5. feed it to the controller and publish a progress snapshot
//!
//! Cancellation is cooperative and only observed at step 1, so the worst-case
//! latency is one settle delay plus one measurement. A cancelled session
//! leaves the actuator at its last commanded value.
//!
//! At most one session may drive a given physical actuator at a time. This is
//! the caller's responsibility and is not detected here.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{LevelingConfig, StrategyConfig};
use crate::controllers::SetpointController;
use crate::error::ConfigError;
use crate::progress::{progress_channel, LevelingProgress, ProgressReceiver};
use crate::state::{ControllerStatus, FailureKind};

/// A scalar hardware actuator, e.g. LO pump power in percent.
pub trait Actuator: Send {
    /// Command the actuator to `value`.
    fn write(&mut self, value: f64) -> Result<(), String>;
}

impl<F> Actuator for F
where
    F: FnMut(f64) -> Result<(), String> + Send,
{
    fn write(&mut self, value: f64) -> Result<(), String> {
        self(value)
    }
}

/// A scalar measurement channel, e.g. SIS junction current.
pub trait Meter: Send {
    /// Take a measurement averaged over `averaging` samples.
    fn read(&mut self, averaging: usize) -> Result<f64, String>;
}

impl<F> Meter for F
where
    F: FnMut(usize) -> Result<f64, String> + Send,
{
    fn read(&mut self, averaging: usize) -> Result<f64, String> {
        self(averaging)
    }
}

/// Average `count` single reads (a count of 0 is treated as 1).
///
/// Stops at the first failed or non-finite sample.
pub fn average_reads(
    count: usize,
    mut read_once: impl FnMut() -> Result<f64, String>,
) -> Result<f64, String> {
    let n = count.max(1);
    let mut sum = 0.0;
    for i in 0..n {
        let value = read_once()?;
        if !value.is_finite() {
            return Err(format!("sample {i} of {n} is not finite ({value})"));
        }
        sum += value;
    }
    Ok(sum / n as f64)
}

/// How a leveling session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelingOutcome {
    /// Measurement reached the tolerance band
    Converged,
    /// Iteration budget exhausted while the output could still move
    ConvergenceTimeout,
    /// Output pinned at a bound with the target still out of reach
    Saturated,
    /// Stopped by the cancel flag; not an error
    Cancelled,
    /// Actuator write or measurement read failed
    HardwareError,
}

/// Final report of one leveling session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelingResult {
    /// Channel label
    pub channel: String,
    /// True only when converged
    pub success: bool,
    /// Classified ending
    pub outcome: LevelingOutcome,
    /// Controller status at the end of the run
    pub status: ControllerStatus,
    /// Last commanded actuator value
    pub final_output: f64,
    /// Last measurement, if any was taken
    pub final_measurement: Option<f64>,
    /// Controller iterations performed
    pub iterations: usize,
    /// Loggable one-line summary
    pub message: String,
}

/// Drives one controller against one actuator/measurement pair
pub struct LevelingSession {
    channel: String,
    actuator: Box<dyn Actuator>,
    meter: Box<dyn Meter>,
    controller: SetpointController,
    settle_delay: Duration,
    averaging: usize,
    progress: watch::Sender<LevelingProgress>,
}

impl LevelingSession {
    /// Build a session and its controller from configuration.
    pub fn new(
        config: LevelingConfig,
        actuator: impl Actuator + 'static,
        meter: impl Meter + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let settle_delay = config.settle_delay();
        let controller = SetpointController::new(config.controller)?;
        Ok(Self::with_controller(
            config.channel,
            controller,
            settle_delay,
            config.averaging,
            actuator,
            meter,
        ))
    }

    /// Build a session around an existing controller, e.g. one whose output
    /// should be reused as the starting point of a retry.
    pub fn with_controller(
        channel: impl Into<String>,
        controller: SetpointController,
        settle_delay: Duration,
        averaging: usize,
        actuator: impl Actuator + 'static,
        meter: impl Meter + 'static,
    ) -> Self {
        let channel = channel.into();
        let (progress, _) = progress_channel(LevelingProgress::idle(
            channel.clone(),
            controller.output(),
        ));
        Self {
            channel,
            actuator: Box::new(actuator),
            meter: Box::new(meter),
            controller,
            settle_delay,
            averaging,
            progress,
        }
    }

    /// Channel label
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Observe live progress snapshots.
    pub fn subscribe(&self) -> ProgressReceiver {
        self.progress.subscribe()
    }

    /// The controller being driven
    pub fn controller(&self) -> &SetpointController {
        &self.controller
    }

    /// Mutable access, e.g. to change the setpoint between runs
    pub fn controller_mut(&mut self) -> &mut SetpointController {
        &mut self.controller
    }

    /// Delay between write and read: the settle delay, stretched to the PID
    /// sample interval when that is longer.
    fn step_delay(&self) -> Duration {
        match &self.controller.config().strategy {
            StrategyConfig::Pid(gains) => self.settle_delay.max(gains.sample_interval()),
            StrategyConfig::Bisection { .. } => self.settle_delay,
        }
    }

    fn publish(&self, status: ControllerStatus, last_measurement: Option<f64>) {
        self.progress.send_replace(LevelingProgress {
            channel: self.channel.clone(),
            output: self.controller.output(),
            iteration: self.controller.iteration(),
            status,
            last_measurement,
        });
    }

    /// Run the control loop until converged, failed or cancelled.
    ///
    /// `cancel` is polled once before every step. A controller that is already
    /// terminal returns at once without touching the hardware; reset it or
    /// change its setpoint to run again.
    pub async fn run(&mut self, cancel: impl Fn() -> bool) -> LevelingResult {
        if self.controller.status().is_terminal() {
            return self.already_finished();
        }

        let step_delay = self.step_delay();
        let setpoint = self.controller.config().setpoint;
        info!(
            "{}: leveling with {} toward {:.3} from output {:.3}",
            self.channel,
            self.controller.strategy_name(),
            setpoint,
            self.controller.output()
        );

        let mut last_measurement: Option<f64> = None;

        loop {
            if cancel() {
                self.controller.cancel();
                self.publish(self.controller.status(), last_measurement);
                let message = format!(
                    "{}: cancelled at iteration {} (output {:.3})",
                    self.channel,
                    self.controller.iteration(),
                    self.controller.output()
                );
                info!("{message}");
                return self.finish(LevelingOutcome::Cancelled, last_measurement, message);
            }

            let output = self.controller.output();
            if let Err(e) = self.actuator.write(output) {
                let message = format!("{}: actuator write of {output:.3} failed: {e}", self.channel);
                return self.hardware_failure(last_measurement, message);
            }

            tokio::time::sleep(step_delay).await;

            let measurement = match self.meter.read(self.averaging) {
                Ok(value) if value.is_finite() => value,
                Ok(value) => {
                    let message =
                        format!("{}: measurement read returned {value}", self.channel);
                    return self.hardware_failure(last_measurement, message);
                }
                Err(e) => {
                    let message = format!("{}: measurement read failed: {e}", self.channel);
                    return self.hardware_failure(last_measurement, message);
                }
            };
            last_measurement = Some(measurement);

            self.controller.process(measurement);
            self.publish(self.controller.status(), last_measurement);
            debug!(
                "{}: iteration {} wrote {:.3}, measured {:.4}",
                self.channel,
                self.controller.iteration(),
                output,
                measurement
            );

            match self.controller.status() {
                ControllerStatus::Running => continue,
                ControllerStatus::Converged => {
                    let message = format!(
                        "{}: converged after {} iterations at output {:.3} (measured {:.4}, target {:.4})",
                        self.channel,
                        self.controller.iteration(),
                        self.controller.output(),
                        measurement,
                        self.controller.config().setpoint
                    );
                    info!("{message}");
                    return self.finish(LevelingOutcome::Converged, last_measurement, message);
                }
                ControllerStatus::Failed => {
                    return self.controller_failure(measurement);
                }
                ControllerStatus::Cancelled => {
                    let message = format!("{}: controller cancelled", self.channel);
                    return self.finish(LevelingOutcome::Cancelled, last_measurement, message);
                }
            }
        }
    }

    fn controller_failure(&self, measurement: f64) -> LevelingResult {
        let config = self.controller.config();
        let (outcome, message) = match self.controller.failure() {
            Some(FailureKind::Saturated { at_upper }) => (
                LevelingOutcome::Saturated,
                format!(
                    "{}: actuator saturated at {} bound {:.3} after {} iterations; measured {:.4} cannot reach target {:.4}",
                    self.channel,
                    if at_upper { "upper" } else { "lower" },
                    self.controller.output(),
                    self.controller.iteration(),
                    measurement,
                    config.setpoint
                ),
            ),
            Some(FailureKind::ConvergenceTimeout) | None => (
                LevelingOutcome::ConvergenceTimeout,
                format!(
                    "{}: no convergence after {} iterations (output {:.3}, measured {:.4}, target {:.4} +/- {})",
                    self.channel,
                    self.controller.iteration(),
                    self.controller.output(),
                    measurement,
                    config.setpoint,
                    config.tolerance_abs
                ),
            ),
        };
        warn!("{message}");
        self.finish(outcome, Some(measurement), message)
    }

    fn already_finished(&self) -> LevelingResult {
        let status = self.controller.status();
        let outcome = match status {
            ControllerStatus::Converged => LevelingOutcome::Converged,
            ControllerStatus::Failed => match self.controller.failure() {
                Some(FailureKind::Saturated { .. }) => LevelingOutcome::Saturated,
                Some(FailureKind::ConvergenceTimeout) | None => {
                    LevelingOutcome::ConvergenceTimeout
                }
            },
            ControllerStatus::Running | ControllerStatus::Cancelled => LevelingOutcome::Cancelled,
        };
        let message = format!(
            "{}: controller already {status:?} at iteration {} (output {:.3}); nothing written",
            self.channel,
            self.controller.iteration(),
            self.controller.output()
        );
        debug!("{message}");
        let last_measurement = self.progress.borrow().last_measurement;
        self.finish(outcome, last_measurement, message)
    }

    fn hardware_failure(&self, last_measurement: Option<f64>, message: String) -> LevelingResult {
        warn!("{message}");
        self.publish(ControllerStatus::Failed, last_measurement);
        self.finish(LevelingOutcome::HardwareError, last_measurement, message)
    }

    fn finish(
        &self,
        outcome: LevelingOutcome,
        final_measurement: Option<f64>,
        message: String,
    ) -> LevelingResult {
        let status = match outcome {
            LevelingOutcome::Converged => ControllerStatus::Converged,
            LevelingOutcome::Cancelled => ControllerStatus::Cancelled,
            _ => ControllerStatus::Failed,
        };
        LevelingResult {
            channel: self.channel.clone(),
            success: outcome == LevelingOutcome::Converged,
            outcome,
            status,
            final_output: self.controller.output(),
            final_measurement,
            iterations: self.controller.iteration(),
            message,
        }
    }
}
