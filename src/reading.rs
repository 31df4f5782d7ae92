use crate::config::Id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named numeric values produced by one driver read, e.g. `{"distance_cm": 30.0}`
pub type Measurement = BTreeMap<String, f64>;

/// A single sensor reading as submitted to the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor: Id,
    pub value: Measurement,
}

impl Reading {
    pub fn new(sensor: Id, value: Measurement) -> Self {
        Self { sensor, value }
    }
}

/// Round to a fixed number of decimal places. Exact halves go to the even
/// neighbour (`0.125` -> `0.12`), not away from zero.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}
