//! Lock-and-bias runs against the simulated receiver

use std::fmt::Write;

use anyhow::Result;
use bias_control::calibration::{CalibrationPoint, CalibrationTable};
use bias_control::procedure::{LockAndBiasProcedure, ProcedureResult};
use bias_control::progress::CancelToken;
use tracing::info;

use crate::bench_config::BenchConfig;
use crate::sim_receiver::SimulatedReceiver;

/// Outcome of one bench run, with the receiver left in its final state
pub struct BenchRun {
    pub result: ProcedureResult,
    pub receiver: SimulatedReceiver,
}

/// Build a simulated receiver from `config` and run the full procedure.
///
/// Fails only on invalid configuration; procedure failures are reported in
/// the returned [`ProcedureResult`].
pub async fn run_lock_and_bias(
    config: &BenchConfig,
    table: &CalibrationTable,
    target_ghz: f64,
    cancel: &CancelToken,
) -> Result<BenchRun> {
    let receiver = SimulatedReceiver::new(config.simulator.clone())?;
    let procedure = LockAndBiasProcedure::new(config.procedure.clone())?;
    let sessions = config.sessions(&receiver)?;

    info!(
        "Running lock and bias at {target_ghz:.3} GHz with {} channel(s)",
        sessions.len()
    );
    let result = procedure
        .run(
            |target| receiver.lock(target),
            table,
            target_ghz,
            |point: &CalibrationPoint| receiver.program_bias(point),
            sessions,
            cancel,
        )
        .await;

    Ok(BenchRun { result, receiver })
}

/// Human-readable per-stage report.
pub fn format_summary(result: &ProcedureResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Result: {} (last stage: {})",
        if result.success {
            "SUCCESS"
        } else if result.cancelled {
            "CANCELLED"
        } else {
            "FAILED"
        },
        result.stage
    );

    if let Some(lock) = &result.lock {
        let state = if lock.locked {
            "locked"
        } else if lock.tuned_only {
            "tuned only"
        } else {
            "not locked"
        };
        let _ = writeln!(
            out,
            "  LO:       {:.3} GHz, {state} ({})",
            lock.achieved_frequency_ghz, lock.message
        );
    }

    if let Some(bias) = &result.bias {
        let _ = write!(out, "  Bias:    ");
        for (name, value) in &bias.parameters {
            let _ = write!(out, " {name}={value:.3}");
        }
        let _ = writeln!(out);
    }

    for leveled in &result.leveling {
        let measured = leveled
            .final_measurement
            .map(|m| format!("{m:.3}"))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "  {:<8}  {:?} after {} iterations, output {:.3}, measured {}",
            format!("{}:", leveled.channel),
            leveled.outcome,
            leveled.iterations,
            leveled.final_output,
            measured
        );
    }

    let _ = writeln!(out, "  Log:      {}", result.message);
    out
}
