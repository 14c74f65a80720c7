//! Frequency-indexed bias calibration
//!
//! A receiver configuration carries a table of bias operating points measured
//! at discrete LO frequencies. Before a measurement the target frequency is
//! converted into a bias set by clamped piecewise-linear interpolation over
//! this table.
//!
//! # Interpolation rules
//! - Below the first entry: the first entry is returned unchanged
//! - Above the last entry: the last entry is returned unchanged
//! - Exactly on an entry: that entry is returned unchanged
//! - Otherwise each parameter is linearly interpolated between the bracketing
//!   entries and the returned frequency is the target

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CalibrationError;

/// Well-known parameter names used by SIS mixer calibration tables.
pub mod params {
    /// Junction bias voltage (mV)
    pub const VJ: &str = "VJ";
    /// Junction bias current (µA)
    pub const IJ: &str = "IJ";
    /// Superconducting magnet current (mA)
    pub const IMAG: &str = "IMAG";
}

/// One calibration entry: a frequency and the bias parameters measured there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// LO frequency in GHz
    pub frequency_ghz: f64,
    /// Named bias parameters (e.g. VJ, IJ, IMAG)
    pub parameters: BTreeMap<String, f64>,
}

impl CalibrationPoint {
    /// Create a point from a frequency and `(name, value)` pairs.
    pub fn new<I, S>(frequency_ghz: f64, parameters: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            frequency_ghz,
            parameters: parameters
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).copied()
    }
}

/// Validated calibration table, strictly ascending in frequency.
///
/// Immutable once built. Share it by reference (or `Arc`) across concurrent
/// sessions; no locking is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CalibrationPoint>", into = "Vec<CalibrationPoint>")]
pub struct CalibrationTable {
    points: Vec<CalibrationPoint>,
}

impl CalibrationTable {
    /// Build a table, validating ordering, finiteness and parameter names.
    pub fn new(points: Vec<CalibrationPoint>) -> Result<Self, CalibrationError> {
        let first = points.first().ok_or(CalibrationError::Empty)?;
        let expected: Vec<String> = first.parameters.keys().cloned().collect();

        for (index, point) in points.iter().enumerate() {
            if !point.frequency_ghz.is_finite() {
                return Err(CalibrationError::NonFinite {
                    index,
                    name: "frequency_ghz".to_string(),
                });
            }
            if let Some((name, _)) = point.parameters.iter().find(|(_, v)| !v.is_finite()) {
                return Err(CalibrationError::NonFinite {
                    index,
                    name: name.clone(),
                });
            }
            if !point.parameters.keys().eq(expected.iter()) {
                return Err(CalibrationError::ParameterMismatch {
                    index,
                    expected: expected.clone(),
                    found: point.parameters.keys().cloned().collect(),
                });
            }
            if index > 0 {
                let previous = points[index - 1].frequency_ghz;
                if point.frequency_ghz <= previous {
                    return Err(CalibrationError::NotAscending {
                        index,
                        previous,
                        current: point.frequency_ghz,
                    });
                }
            }
        }

        Ok(Self { points })
    }

    /// The table entries in ascending frequency order.
    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    /// Number of entries (always at least one).
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; an empty table cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Lowest and highest calibrated frequency in GHz.
    pub fn frequency_range(&self) -> (f64, f64) {
        let lo = self.points.first().map_or(f64::NAN, |p| p.frequency_ghz);
        let hi = self.points.last().map_or(f64::NAN, |p| p.frequency_ghz);
        (lo, hi)
    }

    /// Interpolate the bias set for `target_ghz`. See [`interpolate`].
    pub fn interpolate(&self, target_ghz: f64) -> CalibrationPoint {
        interpolate(self, target_ghz)
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file, validating the contents
    pub fn load_from_file(path: &Path) -> Result<Self, CalibrationError> {
        let json = std::fs::read_to_string(path)?;
        let points: Vec<CalibrationPoint> = serde_json::from_str(&json)?;
        Self::new(points)
    }
}

impl TryFrom<Vec<CalibrationPoint>> for CalibrationTable {
    type Error = CalibrationError;

    fn try_from(points: Vec<CalibrationPoint>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<CalibrationTable> for Vec<CalibrationPoint> {
    fn from(table: CalibrationTable) -> Self {
        table.points
    }
}

/// Convert a target frequency into a bias parameter set.
///
/// Pure and deterministic: identical inputs give bit-identical outputs.
/// Targets outside the table are clamped to the nearest end entry rather than
/// extrapolated. A NaN target yields the first entry.
pub fn interpolate(table: &CalibrationTable, target_ghz: f64) -> CalibrationPoint {
    let points = table.points();
    // Leftmost insertion position
    let pos = points.partition_point(|p| p.frequency_ghz < target_ghz);

    if pos == 0 {
        if points[0].frequency_ghz != target_ghz {
            debug!(
                "{target_ghz} GHz below calibrated range, using {} GHz entry",
                points[0].frequency_ghz
            );
        }
        return points[0].clone();
    }
    if pos == points.len() {
        let last = &points[pos - 1];
        debug!(
            "{target_ghz} GHz above calibrated range, using {} GHz entry",
            last.frequency_ghz
        );
        return last.clone();
    }

    let after = &points[pos];
    if after.frequency_ghz == target_ghz {
        return after.clone();
    }

    let before = &points[pos - 1];
    let scale = (target_ghz - before.frequency_ghz) / (after.frequency_ghz - before.frequency_ghz);

    // Parameter names are identical across points, so both maps iterate in the same order
    let parameters = before
        .parameters
        .iter()
        .zip(after.parameters.values())
        .map(|((name, lo), hi)| (name.clone(), lo + (hi - lo) * scale))
        .collect();

    CalibrationPoint {
        frequency_ghz: target_ghz,
        parameters,
    }
}
