//! Lock-then-bias-then-level procedure
//!
//! Brings a receiver to its operating point for one LO frequency:
//!
//! 1. Programming frequency: command the LO. An achieved frequency that is
//!    zero, negative or not finite means the target is outside the tunable
//!    range and ends the run.
//! 2. Locking: an unlocked LO gets exactly one retry after a fixed delay. A
//!    second failure degrades to tuned-only unless a hard lock is required.
//! 3. Biasing: interpolate the calibration table at the achieved frequency
//!    and write the bias set.
//! 4. Leveling: run every leveling session, sequentially or concurrently.
//!
//! Leveling failures are recorded per channel and never hide the results of
//! other channels. A session that panics becomes a failed result in either
//! leveling mode. A cancelled run is flagged in [`ProcedureResult::cancelled`]
//! and is not logged as a failure.

use std::fmt;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::calibration::{CalibrationPoint, CalibrationTable};
use crate::config::ProcedureConfig;
use crate::error::ConfigError;
use crate::leveling::{LevelingOutcome, LevelingResult, LevelingSession};
use crate::progress::{CancelToken, ProgressReceiver};
use crate::state::ControllerStatus;

/// What the LO reported after a frequency command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockResult {
    /// PLL reports phase lock
    pub locked: bool,
    /// Accepted without confirmed lock
    pub tuned_only: bool,
    /// Frequency the LO actually reached; zero when out of range
    pub achieved_frequency_ghz: f64,
    /// Device-level detail
    pub message: String,
}

impl LockResult {
    /// A confirmed lock at `frequency_ghz`.
    pub fn locked(frequency_ghz: f64, message: impl Into<String>) -> Self {
        Self {
            locked: true,
            tuned_only: false,
            achieved_frequency_ghz: frequency_ghz,
            message: message.into(),
        }
    }

    /// Tuned to `frequency_ghz` but not locked.
    pub fn unlocked(frequency_ghz: f64, message: impl Into<String>) -> Self {
        Self {
            locked: false,
            tuned_only: false,
            achieved_frequency_ghz: frequency_ghz,
            message: message.into(),
        }
    }

    /// Target outside the tunable range.
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::unlocked(0.0, message)
    }

    fn in_range(&self) -> bool {
        self.achieved_frequency_ghz.is_finite() && self.achieved_frequency_ghz > 0.0
    }
}

/// Procedure stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcedureStage {
    ProgrammingFrequency,
    Locking,
    Biasing,
    Leveling,
    Done,
}

impl fmt::Display for ProcedureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcedureStage::ProgrammingFrequency => "programming frequency",
            ProcedureStage::Locking => "locking",
            ProcedureStage::Biasing => "biasing",
            ProcedureStage::Leveling => "leveling",
            ProcedureStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Aggregated outcome of one procedure run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureResult {
    /// Lock/tune outcome accepted and every leveling channel converged
    pub success: bool,
    /// Stage messages in execution order, joined with "; "
    pub message: String,
    /// Last stage entered
    pub stage: ProcedureStage,
    /// At least one leveling session stopped on the cancel token
    pub cancelled: bool,
    /// Final lock attempt, if the LO was commanded
    pub lock: Option<LockResult>,
    /// Bias set written, if biasing ran
    pub bias: Option<CalibrationPoint>,
    /// One result per leveling session, in the order the sessions were given
    pub leveling: Vec<LevelingResult>,
}

/// Sequences LO lock, bias programming and leveling
#[derive(Debug, Clone)]
pub struct LockAndBiasProcedure {
    config: ProcedureConfig,
}

impl LockAndBiasProcedure {
    pub fn new(config: ProcedureConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ProcedureConfig {
        &self.config
    }

    /// Run all stages for `target_ghz`.
    ///
    /// `lock_fn` commands the LO and reports the lock state. `bias_fn` writes
    /// one interpolated bias set. Sessions are consumed; subscribe to their
    /// progress before calling this to observe them while they run.
    pub async fn run<L, B>(
        &self,
        mut lock_fn: L,
        calibration: &CalibrationTable,
        target_ghz: f64,
        mut bias_fn: B,
        sessions: Vec<LevelingSession>,
        cancel: &CancelToken,
    ) -> ProcedureResult
    where
        L: FnMut(f64) -> LockResult,
        B: FnMut(&CalibrationPoint),
    {
        let mut report = Report::default();

        // Programming frequency
        info!("Stage {}: {target_ghz:.3} GHz", ProcedureStage::ProgrammingFrequency);
        let first = lock_fn(target_ghz);
        if !first.in_range() {
            let message = format!(
                "frequency out of range: {target_ghz:.3} GHz ({})",
                first.message
            );
            error!("{message}");
            report.push(message);
            return report.fail(ProcedureStage::ProgrammingFrequency, Some(first));
        }

        // Locking
        let lock = if first.locked {
            report.push(format!(
                "LO locked at {:.3} GHz",
                first.achieved_frequency_ghz
            ));
            first
        } else {
            warn!(
                "LO not locked at {:.3} GHz ({}); retrying in {:?}",
                first.achieved_frequency_ghz,
                first.message,
                self.config.lock_retry_delay()
            );
            tokio::time::sleep(self.config.lock_retry_delay()).await;

            info!("Stage {}: retry", ProcedureStage::Locking);
            let retry = lock_fn(target_ghz);
            if !retry.in_range() {
                let message = format!(
                    "frequency out of range on lock retry: {target_ghz:.3} GHz ({})",
                    retry.message
                );
                error!("{message}");
                report.push(message);
                return report.fail(ProcedureStage::Locking, Some(retry));
            }

            if retry.locked {
                report.push(format!(
                    "LO lock succeeded on retry at {:.3} GHz",
                    retry.achieved_frequency_ghz
                ));
                retry
            } else if self.config.require_lock {
                let message = format!(
                    "LO failed to lock at {:.3} GHz after retry: {}",
                    retry.achieved_frequency_ghz, retry.message
                );
                error!("{message}");
                report.push(message);
                return report.fail(ProcedureStage::Locking, Some(retry));
            } else {
                let message = format!(
                    "LO lock failed after retry; continuing tuned-only at {:.3} GHz",
                    retry.achieved_frequency_ghz
                );
                warn!("{message}");
                report.push(message);
                LockResult {
                    tuned_only: true,
                    ..retry
                }
            }
        };

        // Biasing
        info!(
            "Stage {}: {:.3} GHz",
            ProcedureStage::Biasing,
            lock.achieved_frequency_ghz
        );
        let bias = calibration.interpolate(lock.achieved_frequency_ghz);
        bias_fn(&bias);
        report.push(format!(
            "bias set for {:.3} GHz: {}",
            bias.frequency_ghz,
            format_parameters(&bias)
        ));

        // Leveling
        info!(
            "Stage {}: {} channel(s), {}",
            ProcedureStage::Leveling,
            sessions.len(),
            if self.config.run_concurrently {
                "concurrent"
            } else {
                "sequential"
            }
        );
        let leveling = if sessions.is_empty() {
            report.push("no leveling channels configured".to_string());
            Vec::new()
        } else if self.config.run_concurrently {
            level_concurrently(sessions, cancel).await
        } else {
            level_sequentially(sessions, cancel).await
        };
        for result in &leveling {
            report.push(result.message.clone());
        }

        let success = leveling.iter().all(|result| result.success);
        let cancelled = leveling
            .iter()
            .any(|result| result.outcome == LevelingOutcome::Cancelled);
        let result = ProcedureResult {
            success,
            message: report.join(),
            stage: ProcedureStage::Done,
            cancelled,
            lock: Some(lock),
            bias: Some(bias),
            leveling,
        };
        if result.success {
            info!("Lock and bias complete: {}", result.message);
        } else if result.cancelled {
            info!("Lock and bias cancelled: {}", result.message);
        } else {
            warn!("Lock and bias finished with failures: {}", result.message);
        }
        result
    }
}

async fn level_sequentially(
    sessions: Vec<LevelingSession>,
    cancel: &CancelToken,
) -> Vec<LevelingResult> {
    let mut results = Vec::with_capacity(sessions.len());
    for mut session in sessions {
        let observer = session.subscribe();
        let token = cancel.clone();
        let joined =
            tokio::spawn(async move { session.run(move || token.is_cancelled()).await }).await;
        results.push(joined_result(joined, &observer));
    }
    results
}

async fn level_concurrently(
    sessions: Vec<LevelingSession>,
    cancel: &CancelToken,
) -> Vec<LevelingResult> {
    let observers: Vec<_> = sessions.iter().map(LevelingSession::subscribe).collect();

    let handles = sessions.into_iter().map(|mut session| {
        let token = cancel.clone();
        tokio::spawn(async move { session.run(move || token.is_cancelled()).await })
    });

    join_all(handles)
        .await
        .into_iter()
        .zip(&observers)
        .map(|(joined, observer)| joined_result(joined, observer))
        .collect()
}

/// Unwrap a leveling task, turning a panic into a failed result built from
/// the last published progress of the lost session.
fn joined_result(
    joined: Result<LevelingResult, JoinError>,
    observer: &ProgressReceiver,
) -> LevelingResult {
    match joined {
        Ok(result) => result,
        Err(e) => {
            let last = observer.borrow().clone();
            let message = format!("{}: leveling task aborted: {e}", last.channel);
            error!("{message}");
            LevelingResult {
                channel: last.channel,
                success: false,
                outcome: LevelingOutcome::HardwareError,
                status: ControllerStatus::Failed,
                final_output: last.output,
                final_measurement: last.last_measurement,
                iterations: last.iteration,
                message,
            }
        }
    }
}

fn format_parameters(point: &CalibrationPoint) -> String {
    point
        .parameters
        .iter()
        .map(|(name, value)| format!("{name}={value:.3}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stage messages collected in execution order
#[derive(Default)]
struct Report {
    messages: Vec<String>,
}

impl Report {
    fn push(&mut self, message: String) {
        self.messages.push(message);
    }

    fn join(&self) -> String {
        self.messages.join("; ")
    }

    fn fail(self, stage: ProcedureStage, lock: Option<LockResult>) -> ProcedureResult {
        ProcedureResult {
            success: false,
            message: self.join(),
            stage,
            cancelled: false,
            lock,
            bias: None,
            leveling: Vec::new(),
        }
    }
}
