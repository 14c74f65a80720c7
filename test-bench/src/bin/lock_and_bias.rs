//! Lock and Bias
//!
//! Runs the full lock, bias and level procedure against the simulated
//! receiver and prints the per-stage result.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bias_control::calibration::CalibrationTable;
use bias_control::progress::CancelToken;
use clap::Parser;
use test_bench::{format_summary, run_lock_and_bias, BenchArgs};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "lock_and_bias")]
#[command(
    about = "Lock the LO, program calibrated bias and level LO pump on a simulated receiver",
    long_about = "Runs the lock-and-bias procedure end to end against the simulated receiver.\n\n\
        The procedure:\n  \
        1. Tunes the LO to the requested frequency and attempts a PLL lock\n  \
        2. Retries the lock once, then continues tuned-only unless --require-lock\n  \
        3. Interpolates the calibration table at the achieved frequency and programs bias\n  \
        4. Levels LO pump power per polarization until the junction current is on target\n\n\
        Ctrl-C cancels leveling; the pump is left at its last commanded value."
)]
struct Args {
    #[arg(long, help = "Calibration table JSON")]
    calibration: PathBuf,

    #[arg(long, help = "Target LO frequency in GHz")]
    frequency_ghz: f64,

    #[arg(
        long,
        help = "Write the full result as JSON",
        long_help = "If provided, writes the procedure result (lock, bias set and every \
            leveling result) as pretty-printed JSON."
    )]
    report: Option<PathBuf>,

    /// Bench configuration and simulator overrides
    #[command(flatten)]
    bench: BenchArgs,
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, cancelling..."),
        _ = terminate => info!("Received SIGTERM, cancelling..."),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    test_bench::init_tracing();
    let args = Args::parse();

    let table = CalibrationTable::load_from_file(&args.calibration).with_context(|| {
        format!(
            "Failed to load calibration table {}",
            args.calibration.display()
        )
    })?;
    let config = args.bench.load()?;

    let (low, high) = table.frequency_range();
    info!("Lock and Bias");
    info!("=============");
    info!("Target:       {:.3} GHz", args.frequency_ghz);
    info!("Calibration:  {} points, {low:.1}-{high:.1} GHz", table.len());
    info!("Channels:     {}", config.channels.len());
    info!("Require lock: {}", config.procedure.require_lock);
    info!("Concurrent:   {}", config.procedure.run_concurrently);

    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    let run = run_lock_and_bias(&config, &table, args.frequency_ghz, &cancel).await?;
    print!("{}", format_summary(&run.result));

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&run.result)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    if run.result.cancelled {
        info!("Cancelled at stage {}; pump left at last commanded value", run.result.stage);
        return Ok(());
    }
    if !run.result.success {
        anyhow::bail!("lock and bias failed at stage {}", run.result.stage);
    }
    Ok(())
}
