use serde::{Deserialize, Serialize};

/// A single sample. `value == None` means "no sample" and is never coerced
/// to zero by any stage.
///
/// Serializes as a two element array `[time, value]`, the shape clients
/// receive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(i64, Option<f64>)", into = "(i64, Option<f64>)")]
pub struct Point {
    /// Unix timestamp (seconds since epoch)
    pub time: i64,
    pub value: Option<f64>,
}

impl Point {
    pub fn new(time: i64, value: Option<f64>) -> Self {
        Self { time, value }
    }

    pub fn sample(time: i64, value: f64) -> Self {
        Self {
            time,
            value: Some(value),
        }
    }

    pub fn gap(time: i64) -> Self {
        Self { time, value: None }
    }
}

impl From<(i64, Option<f64>)> for Point {
    fn from((time, value): (i64, Option<f64>)) -> Self {
        Self { time, value }
    }
}

impl From<Point> for (i64, Option<f64>) {
    fn from(point: Point) -> Self {
        (point.time, point.value)
    }
}

/// Last known time and value of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastValue {
    pub time: i64,
    pub value: Option<f64>,
}

impl LastValue {
    pub fn new(time: i64, value: Option<f64>) -> Self {
        Self { time, value }
    }
}

/// Rounds half away from zero to `dp` decimal places. Negative `dp` rounds
/// to tens, hundreds and so on.
pub fn round_dp(value: f64, dp: i32) -> f64 {
    if dp >= 0 {
        let factor = 10f64.powi(dp);
        (value * factor).round() / factor
    } else {
        let factor = 10f64.powi(-dp);
        (value / factor).round() * factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_serializes_as_pair() {
        let json = serde_json::to_string(&Point::sample(10, 1.5)).unwrap();
        assert_eq!(json, "[10,1.5]");
        let json = serde_json::to_string(&Point::gap(20)).unwrap();
        assert_eq!(json, "[20,null]");

        let parsed: Point = serde_json::from_str("[30,2.0]").unwrap();
        assert_eq!(parsed, Point::sample(30, 2.0));
    }

    #[test]
    fn test_round_dp() {
        assert_eq!(round_dp(1.2345, 2), 1.23);
        assert_eq!(round_dp(2.5, 0), 3.0);
        assert_eq!(round_dp(-2.5, 0), -3.0);
        assert_eq!(round_dp(1234.0, -2), 1200.0);
    }
}
