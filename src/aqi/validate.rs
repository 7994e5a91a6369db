//! Validation of incoming pollution samples.
//!
//! Validation is total: every feature is checked and every failure is
//! collected, so a client can fix all problems in one round trip. A sample
//! only becomes a `PollutionSample` once the full schema holds.

use serde_json::{Map, Value};

use crate::aqi::REQUIRED_FEATURES;

/// A fully validated sample: all 8 pollutant concentrations present,
/// numeric and non-negative, in training column order.
#[derive(Debug, Clone, PartialEq)]
pub struct PollutionSample {
    pub values: [f64; 8],
}

impl PollutionSample {
    pub fn get(&self, feature: &str) -> Option<f64> {
        REQUIRED_FEATURES
            .iter()
            .position(|f| *f == feature)
            .map(|i| self.values[i])
    }
}

/// JSON numbers and numeric strings are both accepted, matching the
/// reference service's coercion behavior.
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Validates a raw JSON object against the pollutant schema. Returns the
/// sample, or the complete list of human-readable errors. Never
/// short-circuits on the first failure.
pub fn validate_pollution_data(data: &Map<String, Value>) -> Result<PollutionSample, Vec<String>> {
    let mut errors = Vec::new();
    let mut values = [0.0f64; 8];

    for (i, feature) in REQUIRED_FEATURES.iter().enumerate() {
        match data.get(*feature) {
            None => errors.push(format!("Missing feature: {feature}")),
            Some(raw) => match coerce_number(raw) {
                None => errors.push(format!("Invalid numeric value for {feature}: {raw}")),
                Some(value) if !value.is_finite() => {
                    errors.push(format!("Invalid numeric value for {feature}: {raw}"))
                }
                Some(value) => {
                    if value < 0.0 {
                        errors.push(format!("Negative value for {feature}: {value}"));
                    } else if *feature == "co" && value > 10_000.0 {
                        errors.push(format!("CO value seems too high: {value}"));
                    } else if (*feature == "pm2_5" || *feature == "pm10") && value > 1_000.0 {
                        errors.push(format!("{feature} value seems too high: {value}"));
                    }
                    values[i] = value;
                }
            },
        }
    }

    if errors.is_empty() {
        Ok(PollutionSample { values })
    } else {
        Err(errors)
    }
}
