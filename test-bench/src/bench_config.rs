//! Bench configuration
//!
//! One JSON file describes a bench run: the procedure policy, one leveling
//! channel per polarization and the simulator parameters. Command-line flags
//! from [`BenchArgs`] override individual fields after loading.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bias_control::config::{
    ControllerConfig, LevelingConfig, PidGains, ProcedureConfig, StrategyConfig,
};
use bias_control::leveling::LevelingSession;
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::sim_receiver::{SimulatedReceiver, SimulatorConfig};

/// Everything a bench run needs apart from the calibration table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub procedure: ProcedureConfig,
    /// Leveling channels; channel `i` drives simulated polarization `i`
    pub channels: Vec<LevelingConfig>,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        let pol0 = ControllerConfig {
            setpoint: 50.0,
            tolerance_abs: 0.5,
            output_min: 0.0,
            output_max: 100.0,
            max_iterations: 50,
            initial_output: 20.0,
            reverse_acting: false,
            strategy: StrategyConfig::Pid(PidGains {
                kp: 0.3,
                ki: 3.0,
                kd: 0.0,
                sample_interval_s: 0.1,
                saturation_iterations: 3,
            }),
        };
        let pol1 = ControllerConfig {
            setpoint: 45.0,
            max_iterations: 30,
            strategy: StrategyConfig::Bisection {
                initial_step_fraction: 0.2,
            },
            ..pol0.clone()
        };

        Self {
            procedure: ProcedureConfig::default(),
            channels: vec![
                LevelingConfig {
                    channel: "pol0".to_string(),
                    settle_delay_s: 0.2,
                    averaging: 8,
                    controller: pol0,
                },
                LevelingConfig {
                    channel: "pol1".to_string(),
                    settle_delay_s: 0.2,
                    averaging: 8,
                    controller: pol1,
                },
            ],
            simulator: SimulatorConfig::default(),
        }
    }
}

impl BenchConfig {
    /// Load and validate a bench configuration from JSON.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read bench config {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse bench config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write bench config {}", path.display()))?;
        Ok(())
    }

    /// Check every channel and that each has a simulated mixer.
    pub fn validate(&self) -> Result<()> {
        self.procedure.validate()?;
        for channel in &self.channels {
            channel
                .validate()
                .with_context(|| format!("Invalid leveling config for {}", channel.channel))?;
        }
        if self.channels.len() > self.simulator.mixers.len() {
            bail!(
                "{} leveling channels configured but the simulator has {} mixers",
                self.channels.len(),
                self.simulator.mixers.len()
            );
        }
        Ok(())
    }

    /// One leveling session per channel, bound to its polarization.
    pub fn sessions(&self, receiver: &SimulatedReceiver) -> Result<Vec<LevelingSession>> {
        self.channels
            .iter()
            .enumerate()
            .map(|(pol, channel)| {
                receiver
                    .leveling_session(pol, channel.clone())
                    .with_context(|| format!("Failed to build session for {}", channel.channel))
            })
            .collect()
    }
}

/// Bench overrides for command-line tools
///
/// Use with `#[command(flatten)]` in your CLI args struct.
#[derive(Args, Debug, Clone, Default)]
pub struct BenchArgs {
    #[arg(
        long,
        help = "Bench configuration JSON",
        long_help = "JSON file with the procedure policy, leveling channels and simulator \
            parameters. Built-in defaults (PID on pol0, bisection on pol1) are used when omitted."
    )]
    pub bench_config: Option<PathBuf>,

    #[arg(
        long,
        help = "Fail the run if the LO does not lock",
        long_help = "Abort instead of continuing tuned-only when the LO fails to lock \
            after its single retry."
    )]
    pub require_lock: bool,

    #[arg(long, conflicts_with = "sequential", help = "Level all channels concurrently")]
    pub concurrent: bool,

    #[arg(long, help = "Level channels one after another")]
    pub sequential: bool,

    #[arg(long, help = "Simulated lock attempts that fail before the PLL locks")]
    pub lock_failures: Option<usize>,

    #[arg(long, help = "Simulated read noise per sample, µA")]
    pub noise_std: Option<f64>,

    #[arg(long, help = "Simulator noise seed")]
    pub seed: Option<u64>,
}

impl BenchArgs {
    /// Load the configured file (or defaults) and apply the overrides.
    pub fn load(&self) -> Result<BenchConfig> {
        let mut config = match &self.bench_config {
            Some(path) => BenchConfig::load_from_file(path)?,
            None => BenchConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Apply the overrides that were given.
    pub fn apply(&self, config: &mut BenchConfig) {
        if self.require_lock {
            config.procedure.require_lock = true;
        }
        if self.concurrent {
            config.procedure.run_concurrently = true;
        }
        if self.sequential {
            config.procedure.run_concurrently = false;
        }
        if let Some(failures) = self.lock_failures {
            config.simulator.lock_failures = failures;
        }
        if let Some(noise) = self.noise_std {
            for mixer in &mut config.simulator.mixers {
                mixer.noise_std_ua = noise;
            }
        }
        if let Some(seed) = self.seed {
            config.simulator.seed = seed;
        }
    }
}
