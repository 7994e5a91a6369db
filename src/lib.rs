//! Air-quality inference service.
//!
//! Hosts two pretrained models behind a CustomVision-compatible HTTP API:
//! an ONNX sky-photo classifier and a tabular AQI regressor. Models are
//! loaded once at startup into an [`context::AppContext`] and shared
//! read-only across request handlers.

pub mod aqi;
pub mod config;
pub mod context;
pub mod routes;
pub mod vision;
