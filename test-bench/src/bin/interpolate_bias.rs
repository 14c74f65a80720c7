//! Calibration table lookup
//!
//! Prints the interpolated bias set for one LO frequency or a sweep.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bias_control::calibration::CalibrationTable;
use clap::Parser;
use test_bench::range_arg::RangeArg;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "interpolate_bias")]
#[command(about = "Print interpolated bias parameters from a calibration table")]
struct Args {
    #[arg(long, help = "Calibration table JSON")]
    calibration: PathBuf,

    #[arg(
        long,
        required_unless_present = "sweep",
        conflicts_with = "sweep",
        help = "LO frequency in GHz"
    )]
    frequency: Option<f64>,

    #[arg(
        long,
        help = "Frequency sweep in GHz",
        long_help = "Frequency sweep as start:stop:step in GHz, stop inclusive. \
            Example: 211:275:4"
    )]
    sweep: Option<RangeArg>,

    #[arg(long, help = "Print JSON instead of a table")]
    json: bool,
}

fn main() -> Result<()> {
    test_bench::init_tracing();
    let args = Args::parse();

    let table = CalibrationTable::load_from_file(&args.calibration).with_context(|| {
        format!(
            "Failed to load calibration table {}",
            args.calibration.display()
        )
    })?;

    let frequencies = match (&args.sweep, args.frequency) {
        (Some(sweep), _) => sweep.values(),
        (None, Some(frequency)) => vec![frequency],
        (None, None) => anyhow::bail!("either --frequency or --sweep is required"),
    };

    let (low, high) = table.frequency_range();
    for &frequency in &frequencies {
        if frequency < low || frequency > high {
            warn!("{frequency:.3} GHz outside table range {low:.3}-{high:.3} GHz, clamping");
        }
    }

    let points: Vec<_> = frequencies.iter().map(|&f| table.interpolate(f)).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&points)?);
        return Ok(());
    }

    let names: Vec<&String> = table.points()[0].parameters.keys().collect();
    print!("{:>12}", "freq_ghz");
    for name in &names {
        print!(" {name:>10}");
    }
    println!();

    for (frequency, point) in frequencies.iter().zip(&points) {
        print!("{frequency:>12.3}");
        for name in &names {
            print!(" {:>10.4}", point.parameters[name.as_str()]);
        }
        println!();
    }

    Ok(())
}
