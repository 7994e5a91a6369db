use actix_cors::Cors;
use actix_web::{web, App, HttpServer};

use airvision::config::{Settings, MAX_PAYLOAD_BYTES};
use airvision::context::AppContext;
use airvision::routes::configure_routes;
use airvision::vision::model::init_runtime;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let settings = Settings::from_env();

    if let Err(e) = init_runtime() {
        log::warn!("ONNX runtime initialization failed: {e}");
    }

    let context = AppContext::from_settings(&settings).map_err(|e| {
        log::error!("Refusing to start: {e}");
        std::io::Error::other(format!("Model loading failed: {e}"))
    })?;
    if context.vision.is_none() {
        log::warn!("Vision model could not be loaded. Image classification will not be available.");
    }
    if context.aqi.is_none() {
        log::warn!("AQI model could not be loaded. AQI prediction will not be available.");
    }
    let context = web::Data::new(context);

    let bind_address = format!("0.0.0.0:{}", settings.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(context.clone())
            .app_data(web::PayloadConfig::new(MAX_PAYLOAD_BYTES))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
