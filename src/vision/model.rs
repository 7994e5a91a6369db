//! ONNX session wrapper for the sky-photo classifier.
//!
//! Loading validates the model shape up front: exactly one input and one
//! output slot, a rank-4 input with a static spatial size, and an output
//! class count that matches the label file. A model violating any of those
//! is a broken deployment, so the process fails at startup rather than
//! serving misaligned predictions.

use std::fs;
use std::path::Path;

use ndarray::{Array3, Axis};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::Session;
use ort::value::{Tensor, ValueType};
use serde::Serialize;
use thiserror::Error;

use crate::vision::preprocess::{ImagePreprocessor, PreprocessError};

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("ONNX runtime error: {0}")]
    Ort(String),
    #[error("Model shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
}

/// One entry of the vision-service response, in the model's native class
/// order. `bounding_box` is always null for a pure classifier but stays in
/// the contract shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagPrediction {
    pub tag_name: String,
    pub probability: f32,
    pub tag_id: String,
    pub bounding_box: Option<serde_json::Value>,
}

/// Initializes the global ort environment with the CPU execution provider.
/// Call once before loading any session.
pub fn init_runtime() -> Result<(), VisionError> {
    ort::init()
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .commit()
        .map_err(|e| VisionError::Ort(e.to_string()))?;
    Ok(())
}

pub struct VisionModel {
    session: Session,
    input_name: String,
    output_name: String,
    labels: Vec<String>,
    preprocessor: ImagePreprocessor,
}

impl VisionModel {
    /// Loads the ONNX model and its label file, running all load-time shape
    /// checks. The input spatial size is taken from the declared input shape
    /// (NHWC, dimension 1), the way the reference service does.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        labels_path: P,
        is_bgr: bool,
    ) -> Result<Self, VisionError> {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let session = Session::builder()
            .and_then(|b| b.with_parallel_execution(true))
            .and_then(|b| b.with_inter_threads(1))
            .and_then(|b| b.with_intra_threads(threads))
            .and_then(|b| b.commit_from_file(model_path.as_ref()))
            .map_err(|e| VisionError::Ort(e.to_string()))?;

        if session.inputs.len() != 1 || session.outputs.len() != 1 {
            return Err(VisionError::ShapeMismatch(format!(
                "expected exactly 1 input and 1 output tensor, model declares {} and {}",
                session.inputs.len(),
                session.outputs.len()
            )));
        }
        let input_name = session.inputs[0].name.clone();
        let output_name = session.outputs[0].name.clone();

        let input_size = match &session.inputs[0].input_type {
            ValueType::Tensor { shape: dimensions, .. } if dimensions.len() == 4 && dimensions[1] > 0 => {
                dimensions[1] as u32
            }
            other => {
                return Err(VisionError::ShapeMismatch(format!(
                    "input must be a rank-4 tensor with a static spatial size, got {other:?}"
                )))
            }
        };

        let labels = load_labels(labels_path.as_ref())?;
        if labels.is_empty() {
            return Err(VisionError::ShapeMismatch(
                "label file contains no labels".to_string(),
            ));
        }
        if let ValueType::Tensor { shape: dimensions, .. } = &session.outputs[0].output_type {
            if let Some(&classes) = dimensions.last() {
                if classes > 0 && classes as usize != labels.len() {
                    return Err(VisionError::ShapeMismatch(format!(
                        "model declares {} output classes but label file has {}",
                        classes,
                        labels.len()
                    )));
                }
            }
        }

        Ok(Self {
            session,
            input_name,
            output_name,
            labels,
            preprocessor: ImagePreprocessor::new(input_size, is_bgr),
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn input_size(&self) -> u32 {
        self.preprocessor.input_size()
    }

    /// Runs the full classify path: preprocess raw bytes, forward pass,
    /// label pairing.
    pub fn classify(&mut self, raw_bytes: &[u8]) -> Result<Vec<TagPrediction>, VisionError> {
        let tensor = self.preprocessor.preprocess_bytes(raw_bytes)?;
        let outputs = self.predict(tensor)?;
        format_predictions(&self.labels, &outputs)
    }

    /// Adds a batch dimension of 1, invokes the session and extracts the
    /// single output vector.
    pub fn predict(&mut self, tensor: Array3<f32>) -> Result<Vec<f32>, VisionError> {
        let batched = tensor.insert_axis(Axis(0));
        let input =
            Tensor::from_array(batched).map_err(|e| VisionError::Ort(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| VisionError::Ort(e.to_string()))?;

        let raw = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| VisionError::Ort(e.to_string()))?;

        // Batch size is always 1 here; flatten away the batch axis.
        let row = if raw.ndim() > 1 {
            raw.index_axis(Axis(0), 0).iter().copied().collect()
        } else {
            raw.iter().copied().collect()
        };
        Ok(row)
    }
}

/// Reads a newline-separated label file, skipping blank lines.
fn load_labels(path: &Path) -> Result<Vec<String>, VisionError> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Pairs labels positionally with the output vector. A length mismatch means
/// a broken model/label-file pairing, so it errors instead of returning a
/// partial or misaligned list. Order is the model's native class order.
pub fn format_predictions(
    labels: &[String],
    probabilities: &[f32],
) -> Result<Vec<TagPrediction>, VisionError> {
    if labels.len() != probabilities.len() {
        return Err(VisionError::ShapeMismatch(format!(
            "{} labels but {} output probabilities",
            labels.len(),
            probabilities.len()
        )));
    }
    Ok(labels
        .iter()
        .zip(probabilities)
        .map(|(label, &probability)| TagPrediction {
            tag_name: label.clone(),
            probability,
            tag_id: String::new(),
            bounding_box: None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn format_preserves_model_order() {
        let preds =
            format_predictions(&labels(&["clear", "hazy", "smoggy"]), &[0.1, 0.7, 0.2]).unwrap();
        assert_eq!(preds.len(), 3);
        assert_eq!(preds[0].tag_name, "clear");
        assert_eq!(preds[1].tag_name, "hazy");
        assert_eq!(preds[1].probability, 0.7);
        assert!(preds.iter().all(|p| p.bounding_box.is_none()));
    }

    #[test]
    fn format_rejects_length_mismatch() {
        let err = format_predictions(&labels(&["clear", "hazy"]), &[0.5]).unwrap_err();
        assert!(matches!(err, VisionError::ShapeMismatch(_)));
    }

    #[test]
    fn format_rejects_mismatch_with_empty_labels() {
        let err = format_predictions(&[], &[0.5, 0.5]).unwrap_err();
        assert!(matches!(err, VisionError::ShapeMismatch(_)));
    }
}
