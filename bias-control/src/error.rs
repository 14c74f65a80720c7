use thiserror::Error;

/// Errors produced while validating controller configuration.
///
/// These are the only failures that reject synchronously; everything that
/// happens once a loop is running is reported through a result value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Output bounds collapse to a single value.
    #[error("degenerate output bounds: min == max == {0}")]
    DegenerateBounds(f64),

    /// Output bounds are inverted.
    #[error("inverted output bounds: min {min} > max {max}")]
    InvertedBounds {
        /// Configured lower bound.
        min: f64,
        /// Configured upper bound.
        max: f64,
    },

    /// Tolerance must be strictly positive.
    #[error("tolerance must be positive, got {0}")]
    NonPositiveTolerance(f64),

    /// At least one iteration is required.
    #[error("max_iterations must be at least 1")]
    ZeroIterations,

    /// Initial output lies outside the configured bounds.
    #[error("initial output {initial} outside [{min}, {max}]")]
    InitialOutputOutOfRange {
        /// Requested starting output.
        initial: f64,
        /// Configured lower bound.
        min: f64,
        /// Configured upper bound.
        max: f64,
    },

    /// Bisection step fraction must lie in (0, 1].
    #[error("initial step fraction must be in (0, 1], got {0}")]
    InvalidStepFraction(f64),

    /// PID sample interval must be positive.
    #[error("PID sample interval must be positive, got {0} s")]
    InvalidSampleInterval(f64),

    /// Configuration names a different strategy than the controller being reset.
    #[error("strategy mismatch: expected {expected} configuration")]
    StrategyMismatch {
        /// Strategy the controller implements.
        expected: &'static str,
    },

    /// A delay was negative or not finite.
    #[error("{field} must be a non-negative number of seconds, got {value}")]
    InvalidDelay {
        /// Name of the offending field.
        field: &'static str,
        /// Offending value.
        value: f64,
    },

    /// A numeric field was NaN or infinite.
    #[error("{field} must be finite, got {value}")]
    NonFinite {
        /// Name of the offending field.
        field: &'static str,
        /// Offending value.
        value: f64,
    },
}

/// Errors produced while building or loading a calibration table.
#[derive(Error, Debug)]
pub enum CalibrationError {
    /// Table contains no points.
    #[error("calibration table is empty")]
    Empty,

    /// Frequencies are not strictly ascending.
    #[error("calibration frequencies not strictly ascending at index {index}: {previous} GHz then {current} GHz")]
    NotAscending {
        /// Index of the first out-of-order point.
        index: usize,
        /// Frequency of the preceding point.
        previous: f64,
        /// Frequency of the offending point.
        current: f64,
    },

    /// A frequency or parameter value is NaN or infinite.
    #[error("non-finite value in calibration point {index} ({name})")]
    NonFinite {
        /// Index of the offending point.
        index: usize,
        /// Field name, `frequency_ghz` or the parameter name.
        name: String,
    },

    /// A point does not carry the same parameter names as the first point.
    #[error("calibration point {index} parameters {found:?} differ from {expected:?}")]
    ParameterMismatch {
        /// Index of the offending point.
        index: usize,
        /// Parameter names of the first point.
        expected: Vec<String>,
        /// Parameter names of the offending point.
        found: Vec<String>,
    },

    /// Reading or writing the table file failed.
    #[error("calibration file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The table file is not valid JSON for a calibration table.
    #[error("calibration file format error: {0}")]
    Format(#[from] serde_json::Error),
}
