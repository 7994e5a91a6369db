//! Explicit training fallback for the AQI model.
//!
//! When no serialized artifact exists, startup may fit a fresh linear model
//! from the historical pollution CSV. This is never implicit: the caller
//! opts in by setting `AQI_TRAIN_CSV`, and the trained model is written back
//! out so later runs take the file-backed path.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

use crate::aqi::model::{AqiError, AqiModel, Regressor, Scaler};
use crate::aqi::REQUIRED_FEATURES;
use crate::config::Settings;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Failed to read training data: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed training CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Training data has no usable rows")]
    Empty,
    #[error("Normal equations are singular; cannot fit linear model")]
    Singular,
    #[error(transparent)]
    Model(#[from] AqiError),
}

/// Derives the regression target from the dominant pollutants, the same
/// heuristic the historical dataset was labeled with: the maximum of the
/// per-pollutant contributions, clamped to [0, 300].
fn estimate_aqi(row: &[f64; 8]) -> f64 {
    let pm2_5 = row[5] * 2.0;
    let pm10 = row[6] * 1.5;
    let no2 = row[2] * 2.0;
    let o3 = row[3] * 1.2;
    pm2_5.max(pm10).max(no2).max(o3).clamp(0.0, 300.0)
}

/// Reads feature rows from a headed CSV. Rows with missing or non-numeric
/// pollutant columns are skipped.
fn read_rows<R: Read>(reader: R) -> Result<Vec<[f64; 8]>, TrainError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let mut columns = [0usize; 8];
    for (i, feature) in REQUIRED_FEATURES.iter().enumerate() {
        match headers.iter().position(|h| h.trim() == *feature) {
            Some(pos) => columns[i] = pos,
            None => return Err(TrainError::Empty),
        }
    }

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        let mut row = [0.0f64; 8];
        let mut ok = true;
        for (i, &col) in columns.iter().enumerate() {
            match record.get(col).and_then(|v| v.trim().parse::<f64>().ok()) {
                Some(value) => row[i] = value,
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Fits a standard scaler over the rows.
fn fit_scaler(rows: &[[f64; 8]]) -> Scaler {
    let n = rows.len() as f64;
    let mut mean = vec![0.0; 8];
    for row in rows {
        for i in 0..8 {
            mean[i] += row[i];
        }
    }
    for m in &mut mean {
        *m /= n;
    }
    let mut scale = vec![0.0; 8];
    for row in rows {
        for i in 0..8 {
            let d = row[i] - mean[i];
            scale[i] += d * d;
        }
    }
    for s in &mut scale {
        *s = (*s / n).sqrt();
        if *s == 0.0 {
            *s = 1.0;
        }
    }
    Scaler { mean, scale }
}

/// Solves a dense linear system in place by Gaussian elimination with
/// partial pivoting. The system here is 9x9 (8 features + intercept).
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, TrainError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .ok_or(TrainError::Singular)?;
        if a[pivot][col].abs() < 1e-12 {
            return Err(TrainError::Singular);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for col in (0..n).rev() {
        let mut sum = b[col];
        for k in (col + 1)..n {
            sum -= a[col][k] * x[k];
        }
        x[col] = sum / a[col][col];
    }
    Ok(x)
}

/// Fits an ordinary-least-squares linear model on standardized features,
/// with the heuristic AQI target. A small ridge term keeps the normal
/// equations well-conditioned on degenerate datasets.
pub fn train_from_reader<R: Read>(reader: R) -> Result<AqiModel, TrainError> {
    let rows = read_rows(reader)?;
    if rows.is_empty() {
        return Err(TrainError::Empty);
    }
    log::info!("Training AQI fallback model on {} samples", rows.len());

    let scaler = fit_scaler(&rows);
    let targets: Vec<f64> = rows.iter().map(estimate_aqi).collect();
    let scaled: Vec<[f64; 8]> = rows
        .iter()
        .map(|row| {
            let mut s = [0.0; 8];
            for i in 0..8 {
                s[i] = (row[i] - scaler.mean[i]) / scaler.scale[i];
            }
            s
        })
        .collect();

    // Normal equations over [x, 1] design rows.
    const D: usize = 9;
    let mut xtx = vec![vec![0.0; D]; D];
    let mut xty = vec![0.0; D];
    for (row, &target) in scaled.iter().zip(&targets) {
        let mut design = [0.0; D];
        design[..8].copy_from_slice(row);
        design[8] = 1.0;
        for i in 0..D {
            for j in 0..D {
                xtx[i][j] += design[i] * design[j];
            }
            xty[i] += design[i] * target;
        }
    }
    for (i, diag) in xtx.iter_mut().enumerate().take(8) {
        diag[i] += 1e-6;
    }

    let solution = solve(xtx, xty)?;
    let (coefficients, intercept) = (solution[..8].to_vec(), solution[8]);

    Ok(AqiModel::from_parts(
        scaler,
        Regressor::Linear {
            coefficients,
            intercept,
        },
    )?)
}

pub fn train_from_csv<P: AsRef<Path>>(path: P) -> Result<AqiModel, TrainError> {
    train_from_reader(File::open(path.as_ref())?)
}

/// Startup hook: trains from `AQI_TRAIN_CSV` when set and saves the result
/// next to the configured artifact path. Returns `None` when the fallback
/// is not configured or fails; the server still boots and answers AQI
/// requests with model_not_ready.
pub fn train_fallback(settings: &Settings) -> Option<AqiModel> {
    let csv_path = settings.aqi_train_csv.as_ref()?;
    match train_from_csv(csv_path) {
        Ok(model) => {
            if let Err(e) = model.save(&settings.aqi_model_path) {
                log::warn!(
                    "Trained AQI model could not be saved to {}: {e}",
                    settings.aqi_model_path.display()
                );
            } else {
                log::info!(
                    "Trained AQI model saved to {}",
                    settings.aqi_model_path.display()
                );
            }
            Some(model)
        }
        Err(e) => {
            log::error!("AQI training fallback failed: {e}");
            None
        }
    }
}
