use serde::{Deserialize, Serialize};

/// Lifecycle of a setpoint controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerStatus {
    /// Still iterating toward the setpoint
    Running,
    /// Measurement entered the tolerance band
    Converged,
    /// Iteration budget exhausted or actuator saturated
    Failed,
    /// Stopped on request
    Cancelled,
}

impl ControllerStatus {
    /// True once no further `process` calls will change the output
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ControllerStatus::Running)
    }
}

/// Why a controller stopped without converging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Ran out of iterations while the output still had room to move
    ConvergenceTimeout,
    /// Output pinned at a bound while still outside tolerance
    Saturated {
        /// Which bound the output is pinned against
        at_upper: bool,
    },
}

/// Snapshot of a controller's mutable state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    /// Commanded actuator value
    pub output: f64,
    /// Number of `process` calls since the last reset
    pub iteration: usize,
    /// Current status
    pub status: ControllerStatus,
    /// Error (setpoint - measurement) seen on the last `process` call
    pub last_error: f64,
}
