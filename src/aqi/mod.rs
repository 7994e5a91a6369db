pub mod model;
pub mod train;
pub mod validate;

/// The 8 pollutant features the regressor was trained on, in column order.
pub const REQUIRED_FEATURES: [&str; 8] =
    ["co", "no", "no2", "o3", "so2", "pm2_5", "pm10", "nh3"];
