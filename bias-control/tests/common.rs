//! Common utilities for bias-control integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bias_control::calibration::{params, CalibrationPoint, CalibrationTable};
use bias_control::config::{ControllerConfig, LevelingConfig, PidGains, StrategyConfig};
use bias_control::leveling::{average_reads, Actuator, Meter};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Install a test-friendly tracing subscriber once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// SIS junction current (µA) against LO pump power (%), saturating.
pub fn junction_current(max_current: f64, scale: f64) -> impl Fn(f64) -> f64 + Send + 'static {
    move |pump| max_current * (1.0 - (-pump / scale).exp())
}

/// Handle for inspecting a synthetic plant from the test body
#[derive(Clone, Default)]
pub struct PlantLog {
    pub writes: Arc<Mutex<Vec<f64>>>,
}

impl PlantLog {
    pub fn writes(&self) -> Vec<f64> {
        self.writes.lock().unwrap().clone()
    }
}

/// Build an actuator/meter pair around `response`, with seeded Gaussian
/// read noise of `noise_std` per sample.
pub fn synthetic_plant(
    response: impl Fn(f64) -> f64 + Send + 'static,
    noise_std: f64,
    seed: u64,
) -> (impl Actuator, impl Meter, PlantLog) {
    let level = Arc::new(Mutex::new(0.0));
    let log = PlantLog::default();

    let actuator_level = level.clone();
    let writes = log.writes.clone();
    let actuator = move |value: f64| -> Result<(), String> {
        writes.lock().unwrap().push(value);
        *actuator_level.lock().unwrap() = value;
        Ok(())
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, noise_std).unwrap();
    let meter = move |averaging: usize| -> Result<f64, String> {
        let value = response(*level.lock().unwrap());
        average_reads(averaging, || Ok(value + noise.sample(&mut rng)))
    };

    (actuator, meter, log)
}

pub fn bisection_config(setpoint: f64) -> ControllerConfig {
    ControllerConfig {
        setpoint,
        tolerance_abs: 0.5,
        output_min: 0.0,
        output_max: 100.0,
        max_iterations: 30,
        initial_output: 20.0,
        reverse_acting: false,
        strategy: StrategyConfig::Bisection {
            initial_step_fraction: 0.2,
        },
    }
}

pub fn pid_config(setpoint: f64) -> ControllerConfig {
    ControllerConfig {
        max_iterations: 50,
        strategy: StrategyConfig::Pid(PidGains {
            kp: 0.3,
            ki: 3.0,
            kd: 0.0,
            sample_interval_s: 0.1,
            saturation_iterations: 3,
        }),
        ..bisection_config(setpoint)
    }
}

pub fn leveling(channel: &str, controller: ControllerConfig) -> LevelingConfig {
    LevelingConfig {
        channel: channel.to_string(),
        settle_delay_s: 0.25,
        averaging: 8,
        controller,
    }
}

/// Three-point band 6 style calibration table
pub fn calibration_table() -> CalibrationTable {
    CalibrationTable::new(vec![
        CalibrationPoint::new(
            211.0,
            [(params::VJ, 2.2), (params::IJ, 30.0), (params::IMAG, 28.0)],
        ),
        CalibrationPoint::new(
            231.0,
            [(params::VJ, 2.4), (params::IJ, 36.0), (params::IMAG, 30.0)],
        ),
        CalibrationPoint::new(
            251.0,
            [(params::VJ, 2.8), (params::IJ, 40.0), (params::IMAG, 34.0)],
        ),
    ])
    .unwrap()
}
