use std::env;
use std::path::PathBuf;

/// 4MB max image size limit, matching the vision-service contract.
pub const MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

/// Timeout for fetching remote images on the /url route.
pub const URL_FETCH_TIMEOUT_SECS: u64 = 10;

/// Process configuration, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub vision_model_path: PathBuf,
    pub vision_labels_path: PathBuf,
    pub vision_bgr: bool,
    pub aqi_model_path: PathBuf,
    pub aqi_train_csv: Option<PathBuf>,
    pub port: u16,
}

impl Settings {
    pub fn from_env() -> Self {
        let vision_model_path =
            env::var("VISION_MODEL_PATH").unwrap_or_else(|_| "app/model.onnx".to_string());
        let vision_labels_path =
            env::var("VISION_LABELS_PATH").unwrap_or_else(|_| "app/labels.txt".to_string());
        let vision_bgr = env::var("VISION_BGR")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let aqi_model_path =
            env::var("AQI_MODEL_PATH").unwrap_or_else(|_| "aqi_model/model.json".to_string());
        let aqi_train_csv = env::var("AQI_TRAIN_CSV").ok().map(PathBuf::from);
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        Self {
            vision_model_path: PathBuf::from(vision_model_path),
            vision_labels_path: PathBuf::from(vision_labels_path),
            vision_bgr,
            aqi_model_path: PathBuf::from(aqi_model_path),
            aqi_train_csv,
            port,
        }
    }
}
