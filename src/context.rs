use std::sync::Mutex;
use std::time::Duration;

use crate::aqi::model::AqiModel;
use crate::config::{Settings, URL_FETCH_TIMEOUT_SECS};
use crate::vision::model::{VisionError, VisionModel};

/// Process-wide model state, constructed once before the server binds and
/// shared read-only with every request handler via `web::Data`.
///
/// The ort session needs `&mut` to run, so the vision model sits behind a
/// `Mutex`; nothing else is ever mutated after startup. A `None` model means
/// the artifact was missing at startup and the matching endpoints answer
/// with a model_not_ready error instead of refusing to boot.
pub struct AppContext {
    pub vision: Option<Mutex<VisionModel>>,
    pub aqi: Option<AqiModel>,
    pub http: reqwest::Client,
}

impl AppContext {
    pub fn new(vision: Option<VisionModel>, aqi: Option<AqiModel>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(URL_FETCH_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            vision: vision.map(Mutex::new),
            aqi,
            http,
        }
    }

    /// Loads both models from the configured paths. A missing artifact only
    /// disables its endpoints, but a model that loads with the wrong shape
    /// is a broken deployment and refuses startup.
    pub fn from_settings(settings: &Settings) -> Result<Self, VisionError> {
        let vision = match VisionModel::load(
            &settings.vision_model_path,
            &settings.vision_labels_path,
            settings.vision_bgr,
        ) {
            Ok(model) => {
                log::info!(
                    "Vision model loaded from {} ({} labels, input {}px)",
                    settings.vision_model_path.display(),
                    model.labels().len(),
                    model.input_size()
                );
                Some(model)
            }
            Err(e @ VisionError::ShapeMismatch(_)) => return Err(e),
            Err(e) => {
                log::warn!("Vision model unavailable: {e}");
                None
            }
        };

        let aqi = match AqiModel::load(&settings.aqi_model_path) {
            Ok(model) => {
                log::info!(
                    "AQI model loaded from {} ({})",
                    settings.aqi_model_path.display(),
                    model.model_type()
                );
                Some(model)
            }
            Err(e) => {
                log::warn!("AQI model unavailable: {e}");
                crate::aqi::train::train_fallback(settings)
            }
        };

        Ok(Self::new(vision, aqi))
    }
}
