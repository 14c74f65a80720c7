//! Simulated receiver bench for bias-control

pub mod bench_config;
pub mod range_arg;
pub mod runner;
pub mod sim_receiver;

pub use bench_config::{BenchArgs, BenchConfig};
pub use runner::{format_summary, run_lock_and_bias, BenchRun};
pub use sim_receiver::{MixerModel, SimulatedReceiver, SimulatorConfig};

/// Install the fmt subscriber used by the bench tools.
///
/// Defaults to `info`; `RUST_LOG` overrides.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
