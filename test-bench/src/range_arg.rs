//! Frequency sweep argument for command-line tools.

use std::fmt;
use std::str::FromStr;

/// Parse a "start:stop:step" sweep string.
///
/// Stop is inclusive. A positive step requires start < stop and a negative
/// step requires start > stop.
///
/// # Examples
/// - "211:275:2" sweeps upward in 2 GHz steps
/// - "275:211:-8" sweeps downward
pub fn parse_range(s: &str) -> Result<(f64, f64, f64), String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return Err("Range must be in format 'start:stop:step'".to_string());
    }

    let parse = |part: &str, name: &str| {
        part.trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| format!("Invalid {name} value '{part}'"))
    };
    let start = parse(parts[0], "start")?;
    let stop = parse(parts[1], "stop")?;
    let step = parse(parts[2], "step")?;

    if step == 0.0 {
        return Err("Step cannot be zero".to_string());
    }

    if step > 0.0 && start >= stop {
        return Err("For positive step, start must be less than stop".to_string());
    }

    if step < 0.0 && start <= stop {
        return Err("For negative step, start must be greater than stop".to_string());
    }

    Ok((start, stop, step))
}

/// Inclusive frequency sweep, in GHz
#[derive(Debug, Clone, PartialEq)]
pub struct RangeArg(pub f64, pub f64, pub f64);

impl FromStr for RangeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, stop, step) = parse_range(s)?;
        Ok(RangeArg(start, stop, step))
    }
}

impl fmt::Display for RangeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.0, self.1, self.2)
    }
}

impl RangeArg {
    pub fn start(&self) -> f64 {
        self.0
    }

    pub fn stop(&self) -> f64 {
        self.1
    }

    pub fn step(&self) -> f64 {
        self.2
    }

    /// Every value of the sweep, start first, stop included when it lands on
    /// a step.
    pub fn values(&self) -> Vec<f64> {
        // Tolerate accumulated rounding in (stop - start) / step
        let count = ((self.1 - self.0) / self.2 + 1e-9).floor() as usize;
        (0..=count).map(|i| self.0 + i as f64 * self.2).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_ranges() {
        assert_eq!(parse_range("211:275:2").unwrap(), (211.0, 275.0, 2.0));
        assert_eq!(parse_range(" 275 : 211 : -8 ").unwrap(), (275.0, 211.0, -8.0));
    }

    #[test]
    fn test_parse_invalid_ranges() {
        assert!(parse_range("211:275").is_err());
        assert!(parse_range("211:275:0").is_err());
        assert!(parse_range("275:211:1").is_err());
        assert!(parse_range("211:275:-1").is_err());
        assert!(parse_range("a:275:1").is_err());
        assert!(parse_range("211:inf:1").is_err());
    }

    #[test]
    fn test_values_include_stop() {
        let range: RangeArg = "220:230:2.5".parse().unwrap();
        assert_eq!(range.values(), vec![220.0, 222.5, 225.0, 227.5, 230.0]);
    }

    #[test]
    fn test_values_stop_between_steps() {
        let range: RangeArg = "220:229:4".parse().unwrap();
        assert_eq!(range.values(), vec![220.0, 224.0, 228.0]);
    }

    #[test]
    fn test_values_descending() {
        let range: RangeArg = "230:220:-5".parse().unwrap();
        assert_eq!(range.values(), vec![230.0, 225.0, 220.0]);
        assert_eq!(range.to_string(), "230:220:-5");
    }
}
