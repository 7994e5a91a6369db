//! AQI regressor: feature scaler, regression model and category banding.
//!
//! The on-disk artifact is a JSON file owned by the training/export tooling:
//! per-feature standardization parameters plus either a linear model or a
//! flattened random forest. Predictions are clamped to [0, 500] and mapped
//! to one of six ordered health bands.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aqi::validate::PollutionSample;
use crate::aqi::REQUIRED_FEATURES;

#[derive(Debug, Error)]
pub enum AqiError {
    #[error("Failed to read AQI model artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed AQI model artifact: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("AQI model artifact is inconsistent: {0}")]
    Inconsistent(String),
}

/// AQI health bands, checked in ascending order over closed intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthySensitiveGroup,
    Unhealthy,
    VeryUnhealthy,
    Severe,
}

const AQI_BANDS: [(i64, i64, AqiCategory); 6] = [
    (0, 50, AqiCategory::Good),
    (51, 100, AqiCategory::Moderate),
    (101, 150, AqiCategory::UnhealthySensitiveGroup),
    (151, 200, AqiCategory::Unhealthy),
    (201, 300, AqiCategory::VeryUnhealthy),
    (301, i64::MAX, AqiCategory::Severe),
];

/// Maps a clamped AQI value to its band. Banding happens on the
/// nearest-integer value so the fractional gaps between the closed integer
/// intervals cannot fall through.
pub fn aqi_category(aqi: f64) -> AqiCategory {
    let rounded = aqi.round() as i64;
    AQI_BANDS
        .iter()
        .find(|(lo, hi, _)| (*lo..=*hi).contains(&rounded))
        .map(|(_, _, band)| *band)
        .unwrap_or(AqiCategory::Severe)
}

/// Per-feature standardization fixed at training time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    fn transform(&self, values: &[f64; 8]) -> [f64; 8] {
        let mut scaled = [0.0; 8];
        for i in 0..8 {
            let sd = if self.scale[i] == 0.0 { 1.0 } else { self.scale[i] };
            scaled[i] = (values[i] - self.mean[i]) / sd;
        }
        scaled
    }
}

/// One node of a flattened decision tree; `feature < 0` marks a leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: i64,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    fn predict(&self, features: &[f64; 8]) -> f64 {
        let mut index = 0;
        loop {
            let node = &self.nodes[index];
            if node.feature < 0 {
                return node.value;
            }
            index = if features[node.feature as usize] <= node.threshold {
                node.left
            } else {
                node.right
            };
        }
    }
}

/// Checks the structural invariants `DecisionTree::predict` relies on, so a
/// malformed artifact is rejected at load instead of panicking or looping in
/// a request handler: split features stay within the 8-feature schema, child
/// indices stay in bounds, and children always point forward (which rules
/// out cycles).
fn validate_tree(tree: &DecisionTree) -> Result<(), String> {
    if tree.nodes.is_empty() {
        return Err("tree has no nodes".to_string());
    }
    for (i, node) in tree.nodes.iter().enumerate() {
        if node.feature < 0 {
            continue;
        }
        if node.feature >= 8 {
            return Err(format!("node {i} splits on out-of-range feature {}", node.feature));
        }
        if node.left >= tree.nodes.len() || node.right >= tree.nodes.len() {
            return Err(format!(
                "node {i} child index out of bounds ({} nodes)",
                tree.nodes.len()
            ));
        }
        if node.left <= i || node.right <= i {
            return Err(format!("node {i} has a non-forward child reference"));
        }
    }
    Ok(())
}

/// The regressor variants the export tooling produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
pub enum Regressor {
    Linear {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    RandomForest {
        trees: Vec<DecisionTree>,
    },
}

impl Regressor {
    fn predict(&self, features: &[f64; 8]) -> f64 {
        match self {
            Regressor::Linear {
                coefficients,
                intercept,
            } => {
                intercept
                    + coefficients
                        .iter()
                        .zip(features)
                        .map(|(c, x)| c * x)
                        .sum::<f64>()
            }
            Regressor::RandomForest { trees } => {
                let sum: f64 = trees.iter().map(|t| t.predict(features)).sum();
                sum / trees.len() as f64
            }
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Regressor::Linear { .. } => "Linear Regression Model",
            Regressor::RandomForest { .. } => "Random Forest Model",
        }
    }
}

/// Serialized form of the AQI artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AqiModelFile {
    pub feature_names: Vec<String>,
    pub scaler: Scaler,
    #[serde(flatten)]
    pub regressor: Regressor,
}

/// A loaded, validated AQI model. Immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct AqiModel {
    scaler: Scaler,
    regressor: Regressor,
}

/// Outcome of one prediction, before it is wrapped into the wire response.
#[derive(Debug, Clone)]
pub struct AqiPrediction {
    pub predicted_aqi: f64,
    pub category: AqiCategory,
    pub rounded: i64,
    pub model_type: &'static str,
}

impl AqiModel {
    /// Loads and validates the artifact. Parameter vectors must all cover
    /// the 8-feature schema; anything else indicates broken export tooling.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AqiError> {
        let text = fs::read_to_string(path.as_ref())?;
        let file: AqiModelFile = serde_json::from_str(&text)?;
        Self::from_file(file)
    }

    pub fn from_file(file: AqiModelFile) -> Result<Self, AqiError> {
        let expected: Vec<String> = REQUIRED_FEATURES.iter().map(|s| s.to_string()).collect();
        if file.feature_names != expected {
            return Err(AqiError::Inconsistent(format!(
                "feature names {:?} do not match the pollutant schema",
                file.feature_names
            )));
        }
        if file.scaler.mean.len() != 8 || file.scaler.scale.len() != 8 {
            return Err(AqiError::Inconsistent(
                "scaler parameters must cover all 8 features".to_string(),
            ));
        }
        if let Regressor::Linear { coefficients, .. } = &file.regressor {
            if coefficients.len() != 8 {
                return Err(AqiError::Inconsistent(
                    "linear model must have 8 coefficients".to_string(),
                ));
            }
        }
        if let Regressor::RandomForest { trees } = &file.regressor {
            if trees.is_empty() {
                return Err(AqiError::Inconsistent(
                    "random forest has no trees".to_string(),
                ));
            }
            for (t, tree) in trees.iter().enumerate() {
                validate_tree(tree)
                    .map_err(|e| AqiError::Inconsistent(format!("tree {t}: {e}")))?;
            }
        }
        Ok(Self {
            scaler: file.scaler,
            regressor: file.regressor,
        })
    }

    pub fn model_type(&self) -> &'static str {
        self.regressor.type_name()
    }

    /// Standardizes the sample, runs the regressor and clamps to [0, 500].
    pub fn predict(&self, sample: &PollutionSample) -> AqiPrediction {
        let scaled = self.scaler.transform(&sample.values);
        let raw = self.regressor.predict(&scaled);
        let aqi = raw.clamp(0.0, 500.0);
        AqiPrediction {
            predicted_aqi: aqi,
            category: aqi_category(aqi),
            rounded: aqi.round() as i64,
            model_type: self.regressor.type_name(),
        }
    }

    /// Writes the artifact back out in the export-tooling format.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), AqiError> {
        let file = AqiModelFile {
            feature_names: REQUIRED_FEATURES.iter().map(|s| s.to_string()).collect(),
            scaler: self.scaler.clone(),
            regressor: self.regressor.clone(),
        };
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path.as_ref(), serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Builds a model from already-fitted parameters (used by the training
    /// fallback and by tests).
    pub fn from_parts(scaler: Scaler, regressor: Regressor) -> Result<Self, AqiError> {
        Self::from_file(AqiModelFile {
            feature_names: REQUIRED_FEATURES.iter().map(|s| s.to_string()).collect(),
            scaler,
            regressor,
        })
    }
}
