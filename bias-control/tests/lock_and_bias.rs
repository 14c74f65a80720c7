//! End-to-end lock, bias and level runs with synthetic devices

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use approx::assert_relative_eq;
use bias_control::calibration::{params, CalibrationPoint, CalibrationTable};
use bias_control::config::ProcedureConfig;
use bias_control::leveling::{LevelingOutcome, LevelingSession};
use bias_control::procedure::{LockAndBiasProcedure, LockResult, ProcedureStage};
use bias_control::progress::CancelToken;
use common::{
    bisection_config, calibration_table, init_tracing, junction_current, leveling, pid_config,
    synthetic_plant,
};
use tempfile::tempdir;

fn concurrent() -> ProcedureConfig {
    ProcedureConfig {
        lock_retry_delay_s: 0.5,
        require_lock: true,
        run_concurrently: true,
    }
}

#[tokio::test(start_paused = true)]
async fn test_two_polarizations_from_saved_table() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("band6.json");
    calibration_table().save_to_file(&path).unwrap();
    let table = CalibrationTable::load_from_file(&path).unwrap();

    let (act0, meter0, log0) = synthetic_plant(junction_current(80.0, 40.0), 0.1, 21);
    let (act1, meter1, log1) = synthetic_plant(junction_current(70.0, 30.0), 0.1, 22);
    let sessions = vec![
        LevelingSession::new(leveling("pol0", pid_config(50.0)), act0, meter0).unwrap(),
        LevelingSession::new(leveling("pol1", bisection_config(45.0)), act1, meter1).unwrap(),
    ];
    let observers: Vec<_> = sessions.iter().map(LevelingSession::subscribe).collect();

    let programmed = Arc::new(Mutex::new(Vec::new()));
    let programmed_in_fn = programmed.clone();
    let procedure = LockAndBiasProcedure::new(concurrent()).unwrap();
    let result = procedure
        .run(
            |target| LockResult::locked(target - 5.0, "PLL locked"),
            &table,
            231.0,
            move |point: &CalibrationPoint| programmed_in_fn.lock().unwrap().push(point.clone()),
            sessions,
            &CancelToken::new(),
        )
        .await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.stage, ProcedureStage::Done);

    // Bias follows the achieved frequency, 226 GHz
    let programmed = programmed.lock().unwrap();
    assert_eq!(programmed.len(), 1);
    assert_relative_eq!(programmed[0].get(params::VJ).unwrap(), 2.35, epsilon = 1e-12);
    assert_relative_eq!(programmed[0].get(params::IJ).unwrap(), 34.5, epsilon = 1e-12);
    assert_relative_eq!(programmed[0].get(params::IMAG).unwrap(), 29.5, epsilon = 1e-12);

    let channels: Vec<_> = result.leveling.iter().map(|r| r.channel.as_str()).collect();
    assert_eq!(channels, ["pol0", "pol1"]);
    assert_eq!(log0.writes().len(), result.leveling[0].iterations);
    assert_eq!(log1.writes().len(), result.leveling[1].iterations);

    // Observers keep the final snapshot after the sessions are gone
    for (observer, leveled) in observers.iter().zip(&result.leveling) {
        assert_eq!(observer.borrow().output, leveled.final_output);
    }

    // Stage messages appear in execution order
    let lock_at = result.message.find("LO locked").unwrap();
    let bias_at = result.message.find("bias set").unwrap();
    let pol0_at = result.message.find("pol0:").unwrap();
    let pol1_at = result.message.find("pol1:").unwrap();
    assert!(lock_at < bias_at && bias_at < pol0_at && pol0_at < pol1_at);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_concurrent_leveling() {
    init_tracing();
    let table = calibration_table();
    // Neither junction can reach its target, so only cancellation ends the run
    let (act0, meter0, _) = synthetic_plant(|pump: f64| 0.05 * pump, 0.0, 1);
    let (act1, meter1, _) = synthetic_plant(|pump: f64| 0.05 * pump, 0.0, 2);
    let sessions = vec![
        LevelingSession::new(leveling("pol0", bisection_config(50.0)), act0, meter0).unwrap(),
        LevelingSession::new(leveling("pol1", bisection_config(50.0)), act1, meter1).unwrap(),
    ];

    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        canceller.cancel();
    });

    let procedure = LockAndBiasProcedure::new(concurrent()).unwrap();
    let result = procedure
        .run(
            |target| LockResult::locked(target, "PLL locked"),
            &table,
            240.0,
            |_: &CalibrationPoint| {},
            sessions,
            &cancel,
        )
        .await;

    assert!(!result.success);
    assert!(result.cancelled);
    assert_eq!(result.leveling.len(), 2);
    for leveled in &result.leveling {
        assert_eq!(leveled.outcome, LevelingOutcome::Cancelled);
        assert!(leveled.iterations < 30);
    }
    assert!(result.message.contains("pol0: cancelled"));
    assert!(result.message.contains("pol1: cancelled"));
}

#[tokio::test(start_paused = true)]
async fn test_sequential_run_reports_every_channel() {
    init_tracing();
    let table = calibration_table();
    let (act0, meter0, _) = synthetic_plant(junction_current(30.0, 40.0), 0.0, 1);
    let (act1, meter1, _) = synthetic_plant(junction_current(80.0, 40.0), 0.0, 2);
    let sessions = vec![
        LevelingSession::new(leveling("pol0", pid_config(50.0)), act0, meter0).unwrap(),
        LevelingSession::new(leveling("pol1", pid_config(50.0)), act1, meter1).unwrap(),
    ];

    let procedure = LockAndBiasProcedure::new(ProcedureConfig {
        run_concurrently: false,
        ..concurrent()
    })
    .unwrap();
    let result = procedure
        .run(
            |target| LockResult::locked(target, "PLL locked"),
            &table,
            211.0,
            |_: &CalibrationPoint| {},
            sessions,
            &CancelToken::new(),
        )
        .await;

    // First channel saturates, second still runs and converges
    assert!(!result.success);
    assert!(!result.cancelled);
    assert_eq!(result.leveling[0].outcome, LevelingOutcome::Saturated);
    assert!(result.leveling[1].success, "{}", result.leveling[1].message);
    assert_eq!(result.bias.unwrap().get(params::VJ), Some(2.2));
}
