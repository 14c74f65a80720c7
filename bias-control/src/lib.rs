//! Setpoint control and calibrated bias sequencing for cryogenic receivers
//!
//! Brings an SIS receiver to its operating point for a requested LO
//! frequency: lock the LO, program the calibrated bias set, then level each
//! polarization's LO pump power until the junction current reaches its
//! target. Device I/O is supplied by the caller as callbacks.

pub mod calibration;
pub mod config;
pub mod controllers;
pub mod error;
pub mod leveling;
pub mod procedure;
pub mod progress;
pub mod state;

// Re-export commonly used types for external use
pub use crate::calibration::{interpolate, CalibrationPoint, CalibrationTable};
pub use crate::config::{ControllerConfig, LevelingConfig, PidGains, ProcedureConfig, StrategyConfig};
pub use crate::controllers::SetpointController;
pub use crate::error::{CalibrationError, ConfigError};
pub use crate::leveling::{LevelingOutcome, LevelingResult, LevelingSession};
pub use crate::procedure::{LockAndBiasProcedure, LockResult, ProcedureResult, ProcedureStage};
pub use crate::progress::{CancelToken, LevelingProgress};
pub use crate::state::{ControllerState, ControllerStatus, FailureKind};
