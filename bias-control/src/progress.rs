use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::state::ControllerStatus;

/// Live leveling progress for external status reporting
///
/// Published as a whole after every controller update, so an observer never
/// sees a half-updated mix of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelingProgress {
    /// Channel label, e.g. "pol0"
    pub channel: String,
    /// Last commanded actuator value
    pub output: f64,
    /// Controller iterations so far
    pub iteration: usize,
    /// Controller status
    pub status: ControllerStatus,
    /// Most recent measurement, if any has been taken
    pub last_measurement: Option<f64>,
}

impl LevelingProgress {
    /// Snapshot for a session that has not started iterating.
    pub fn idle(channel: impl Into<String>, output: f64) -> Self {
        Self {
            channel: channel.into(),
            output,
            iteration: 0,
            status: ControllerStatus::Running,
            last_measurement: None,
        }
    }
}

/// Receiving side handed to status observers
pub type ProgressReceiver = watch::Receiver<LevelingProgress>;

/// Create a publisher/observer pair seeded with `initial`.
pub fn progress_channel(
    initial: LevelingProgress,
) -> (watch::Sender<LevelingProgress>, ProgressReceiver) {
    watch::channel(initial)
}

/// Shared cancellation flag
///
/// Clones observe the same flag. Setting it never interrupts a step in
/// progress; sessions notice it before their next write.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
