//! Simulated SIS receiver
//!
//! Stands in for the LO synthesizer, bias supply and LO pump attenuators of a
//! dual-polarization receiver so the lock-and-bias procedure can run without
//! hardware. Clones share one receiver state, so an actuator handed to one
//! leveling session and the meter handed to another see the same device.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use bias_control::calibration::CalibrationPoint;
use bias_control::config::LevelingConfig;
use bias_control::error::ConfigError;
use bias_control::leveling::{average_reads, Actuator, LevelingSession, Meter};
use bias_control::procedure::LockResult;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// SIS mixer response for one polarization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixerModel {
    /// Junction current approached at full pump, µA
    pub max_current_ua: f64,
    /// Pump power giving 63% of the maximum current, percent
    pub pump_scale_pct: f64,
    /// Gaussian read noise per sample, µA
    pub noise_std_ua: f64,
}

impl MixerModel {
    /// Noise-free junction current at `pump_pct`.
    pub fn junction_current(&self, pump_pct: f64) -> f64 {
        self.max_current_ua * (1.0 - (-pump_pct.max(0.0) / self.pump_scale_pct).exp())
    }
}

/// Simulator parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Lowest tunable LO frequency, GHz
    pub lo_min_ghz: f64,
    /// Highest tunable LO frequency, GHz
    pub lo_max_ghz: f64,
    /// Number of lock attempts that fail before the PLL locks
    #[serde(default)]
    pub lock_failures: usize,
    /// One mixer per polarization, indexed by channel order
    pub mixers: Vec<MixerModel>,
    /// Noise generator seed
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    42
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            lo_min_ghz: 211.0,
            lo_max_ghz: 275.0,
            lock_failures: 0,
            mixers: vec![
                MixerModel {
                    max_current_ua: 80.0,
                    pump_scale_pct: 40.0,
                    noise_std_ua: 0.2,
                },
                MixerModel {
                    max_current_ua: 70.0,
                    pump_scale_pct: 30.0,
                    noise_std_ua: 0.2,
                },
            ],
            seed: default_seed(),
        }
    }
}

struct ReceiverState {
    lo_ghz: f64,
    locked: bool,
    lock_attempts: usize,
    bias: Option<CalibrationPoint>,
    pump_pct: Vec<f64>,
    rng: StdRng,
}

/// Shared handle to one simulated receiver
#[derive(Clone)]
pub struct SimulatedReceiver {
    config: Arc<SimulatorConfig>,
    noise: Arc<Vec<Normal<f64>>>,
    state: Arc<Mutex<ReceiverState>>,
}

impl SimulatedReceiver {
    pub fn new(config: SimulatorConfig) -> Result<Self> {
        if !(config.lo_min_ghz < config.lo_max_ghz) {
            bail!(
                "LO range {}-{} GHz is empty",
                config.lo_min_ghz,
                config.lo_max_ghz
            );
        }

        let mut noise = Vec::with_capacity(config.mixers.len());
        for (pol, mixer) in config.mixers.iter().enumerate() {
            if !(mixer.pump_scale_pct > 0.0) {
                bail!("pol{pol}: pump scale must be positive");
            }
            noise.push(
                Normal::new(0.0, mixer.noise_std_ua)
                    .map_err(|e| anyhow::anyhow!("pol{pol}: invalid read noise: {e}"))?,
            );
        }

        let state = ReceiverState {
            lo_ghz: 0.0,
            locked: false,
            lock_attempts: 0,
            bias: None,
            pump_pct: vec![0.0; config.mixers.len()],
            rng: StdRng::seed_from_u64(config.seed),
        };

        Ok(Self {
            config: Arc::new(config),
            noise: Arc::new(noise),
            state: Arc::new(Mutex::new(state)),
        })
    }

    fn state(&self) -> MutexGuard<'_, ReceiverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of simulated polarizations
    pub fn polarizations(&self) -> usize {
        self.config.mixers.len()
    }

    /// Tune the LO and attempt a PLL lock.
    pub fn lock(&self, target_ghz: f64) -> LockResult {
        let mut state = self.state();
        state.lock_attempts += 1;

        if !(self.config.lo_min_ghz..=self.config.lo_max_ghz).contains(&target_ghz) {
            state.lo_ghz = 0.0;
            state.locked = false;
            return LockResult::out_of_range(format!(
                "{target_ghz:.3} GHz outside tunable range {:.1}-{:.1} GHz",
                self.config.lo_min_ghz, self.config.lo_max_ghz
            ));
        }

        state.lo_ghz = target_ghz;
        state.locked = state.lock_attempts > self.config.lock_failures;
        debug!(
            "LO tuned to {target_ghz:.3} GHz, attempt {}, locked: {}",
            state.lock_attempts, state.locked
        );
        if state.locked {
            LockResult::locked(target_ghz, "PLL locked")
        } else {
            LockResult::unlocked(target_ghz, "PLL failed to acquire lock")
        }
    }

    /// Apply a bias set to both junctions and magnets.
    pub fn program_bias(&self, point: &CalibrationPoint) {
        info!(
            "Bias programmed for {:.3} GHz ({} parameters)",
            point.frequency_ghz,
            point.parameters.len()
        );
        self.state().bias = Some(point.clone());
    }

    /// Set LO pump power for `pol`, in percent.
    pub fn set_pump(&self, pol: usize, pump_pct: f64) -> Result<(), String> {
        let mut state = self.state();
        let slot = state
            .pump_pct
            .get_mut(pol)
            .ok_or_else(|| format!("no mixer for polarization {pol}"))?;
        if !(0.0..=100.0).contains(&pump_pct) {
            return Err(format!("pump power {pump_pct} % outside 0-100 %"));
        }
        *slot = pump_pct;
        Ok(())
    }

    /// Read the junction current of `pol`, averaged over `averaging` samples.
    ///
    /// An unbiased junction or an untuned LO reads as noise around zero.
    pub fn read_junction_current(&self, pol: usize, averaging: usize) -> Result<f64, String> {
        let mixer = self
            .config
            .mixers
            .get(pol)
            .ok_or_else(|| format!("no mixer for polarization {pol}"))?;
        let noise = self.noise[pol];

        let mut state = self.state();
        let truth = if state.bias.is_some() && state.lo_ghz != 0.0 {
            mixer.junction_current(state.pump_pct[pol])
        } else {
            0.0
        };
        let rng = &mut state.rng;
        average_reads(averaging, || Ok(truth + noise.sample(&mut *rng)))
    }

    /// Current LO pump setting for `pol`
    pub fn pump(&self, pol: usize) -> Option<f64> {
        self.state().pump_pct.get(pol).copied()
    }

    /// Last bias set programmed
    pub fn bias(&self) -> Option<CalibrationPoint> {
        self.state().bias.clone()
    }

    /// Whether the last lock attempt locked
    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    /// Lock attempts so far
    pub fn lock_attempts(&self) -> usize {
        self.state().lock_attempts
    }

    /// LO pump actuator for `pol`
    pub fn pump_actuator(&self, pol: usize) -> impl Actuator {
        let receiver = self.clone();
        move |pump_pct: f64| receiver.set_pump(pol, pump_pct)
    }

    /// Junction current meter for `pol`
    pub fn junction_meter(&self, pol: usize) -> impl Meter {
        let receiver = self.clone();
        move |averaging: usize| receiver.read_junction_current(pol, averaging)
    }

    /// Leveling session driving the pump of `pol` from its junction current.
    pub fn leveling_session(
        &self,
        pol: usize,
        config: LevelingConfig,
    ) -> Result<LevelingSession, ConfigError> {
        LevelingSession::new(config, self.pump_actuator(pol), self.junction_meter(pol))
    }
}
