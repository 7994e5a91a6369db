//! HTTP surface: the CustomVision-compatible image routes, the AQI
//! prediction endpoint and the static capability description.
//!
//! All per-request errors are converted to JSON bodies with a
//! machine-readable `kind` at this boundary; nothing panics on bad input.

use actix_web::http::header::CONTENT_TYPE;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures::StreamExt;
use futures_util::TryStreamExt;
use log::{error, info};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::aqi::validate::validate_pollution_data;
use crate::aqi::REQUIRED_FEATURES;
use crate::config::MAX_PAYLOAD_BYTES;
use crate::context::AppContext;
use crate::vision::model::{TagPrediction, VisionError};
use crate::vision::preprocess::PreprocessError;

/// Vision-service response envelope for the /image and /url routes.
#[derive(Serialize)]
struct ImagePredictionResponse {
    id: Uuid,
    project: String,
    iteration: String,
    created: String,
    predictions: Vec<TagPrediction>,
}

/// Route aliases emulating the third-party vision-service URL shape.
const IMAGE_ROUTES: [&str; 7] = [
    "/image",
    "/{project}/image",
    "/{project}/image/nostore",
    "/{project}/classify/iterations/{published_name}/image",
    "/{project}/classify/iterations/{published_name}/image/nostore",
    "/{project}/detect/iterations/{published_name}/image",
    "/{project}/detect/iterations/{published_name}/image/nostore",
];

const URL_ROUTES: [&str; 7] = [
    "/url",
    "/{project}/url",
    "/{project}/url/nostore",
    "/{project}/classify/iterations/{published_name}/url",
    "/{project}/classify/iterations/{published_name}/url/nostore",
    "/{project}/detect/iterations/{published_name}/url",
    "/{project}/detect/iterations/{published_name}/url/nostore",
];

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/models/info").route(web::get().to(models_info)))
        .service(web::resource("/predict-aqi").route(web::post().to(handle_predict_aqi)))
        .service(web::resource("/predict-aqi/").route(web::post().to(handle_predict_aqi)));
    for route in IMAGE_ROUTES {
        cfg.service(web::resource(route).route(web::post().to(handle_image)));
    }
    for route in URL_ROUTES {
        cfg.service(web::resource(route).route(web::post().to(handle_url)));
    }
}

fn error_response(status: actix_web::http::StatusCode, kind: &str, message: &str) -> HttpResponse {
    HttpResponse::build(status).json(json!({ "error": message, "kind": kind }))
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(
        "<h1>CustomVision.ai model host harness</h1>\n\
         <p>Available endpoints:</p>\n\
         <ul>\n\
             <li><strong>POST /image</strong> - Classify air quality from sky images</li>\n\
             <li><strong>POST /predict-aqi</strong> - Predict AQI from pollution data</li>\n\
             <li><strong>POST /url</strong> - Classify air quality from image URL</li>\n\
         </ul>",
    )
}

async fn models_info() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "models": {
            "image_classifier": {
                "description": "Classifies air quality from sky images",
                "input": "Image file (jpg, png, etc.)",
                "output": "Air quality classification (GOOD, MODERATE, etc.)",
                "endpoint": "/image"
            },
            "aqi_predictor": {
                "description": "Predicts AQI from pollution measurements",
                "input": "JSON with pollution data (co, no, no2, o3, so2, pm2_5, pm10, nh3)",
                "output": "Numerical AQI value and category",
                "endpoint": "/predict-aqi"
            }
        },
        "pollution_parameters": {
            "co": "Carbon monoxide (mg/m³)",
            "no": "Nitric oxide (µg/m³)",
            "no2": "Nitrogen dioxide (µg/m³)",
            "o3": "Ozone (µg/m³)",
            "so2": "Sulfur dioxide (µg/m³)",
            "pm2_5": "Particulate matter ≤ 2.5µm (µg/m³)",
            "pm10": "Particulate matter ≤ 10µm (µg/m³)",
            "nh3": "Ammonia (µg/m³)"
        }
    }))
}

/// Collects a request body, enforcing the 4MB image cap.
async fn collect_body(mut payload: web::Payload) -> Result<Vec<u8>, HttpResponse> {
    let mut body = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            error_response(
                actix_web::http::StatusCode::BAD_REQUEST,
                "payload_error",
                &format!("Failed to read request body: {e}"),
            )
        })?;
        if body.len() + chunk.len() > MAX_PAYLOAD_BYTES {
            return Err(error_response(
                actix_web::http::StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "Request body exceeds the 4MB limit",
            ));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Extracts image bytes the way the vision-service contract allows: a
/// multipart `imageData` field, an urlencoded `imageData` form field, or the
/// raw request body.
async fn extract_image_bytes(
    req: &HttpRequest,
    payload: web::Payload,
) -> Result<Vec<u8>, HttpResponse> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("multipart/") {
        let mut multipart = actix_multipart::Multipart::new(req.headers(), payload);
        let mut fallback = None;
        while let Ok(Some(mut field)) = multipart.try_next().await {
            let mut data = Vec::new();
            while let Some(chunk) = field.next().await {
                let chunk = chunk.map_err(|e| {
                    error_response(
                        actix_web::http::StatusCode::BAD_REQUEST,
                        "payload_error",
                        &format!("Failed to read multipart field: {e}"),
                    )
                })?;
                if data.len() + chunk.len() > MAX_PAYLOAD_BYTES {
                    return Err(error_response(
                        actix_web::http::StatusCode::PAYLOAD_TOO_LARGE,
                        "payload_too_large",
                        "Request body exceeds the 4MB limit",
                    ));
                }
                data.extend_from_slice(&chunk);
            }
            if field.name() == Some("imageData") && !data.is_empty() {
                return Ok(data);
            }
            if fallback.is_none() && !data.is_empty() {
                fallback = Some(data);
            }
        }
        return fallback.ok_or_else(|| {
            error_response(
                actix_web::http::StatusCode::BAD_REQUEST,
                "payload_error",
                "No image data in multipart body",
            )
        });
    }

    let body = collect_body(payload).await?;
    if content_type.starts_with("application/x-www-form-urlencoded") {
        let field = url::form_urlencoded::parse(&body)
            .find(|(name, _)| name == "imageData")
            .map(|(_, value)| value.into_owned().into_bytes());
        return field.ok_or_else(|| {
            error_response(
                actix_web::http::StatusCode::BAD_REQUEST,
                "payload_error",
                "No imageData field in form body",
            )
        });
    }
    Ok(body)
}

fn classify_and_respond(
    ctx: &AppContext,
    req: &HttpRequest,
    image_bytes: &[u8],
) -> HttpResponse {
    let Some(vision) = ctx.vision.as_ref() else {
        return error_response(
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            "model_not_ready",
            "Vision model is not available",
        );
    };

    let mut model = match vision.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match model.classify(image_bytes) {
        Ok(predictions) => {
            info!("Image classified with {} predictions", predictions.len());
            HttpResponse::Ok().json(ImagePredictionResponse {
                id: Uuid::new_v4(),
                project: req
                    .match_info()
                    .get("project")
                    .unwrap_or_default()
                    .to_string(),
                iteration: req
                    .match_info()
                    .get("published_name")
                    .unwrap_or_default()
                    .to_string(),
                created: Utc::now().to_rfc3339(),
                predictions,
            })
        }
        Err(VisionError::Preprocess(PreprocessError::Decode(e))) => {
            error!("Image decode error: {e}");
            error_response(
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "decode_error",
                "Error processing image",
            )
        }
        Err(e) => {
            error!("Inference error: {e}");
            error_response(
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "inference_error",
                "Error processing image",
            )
        }
    }
}

async fn handle_image(
    ctx: web::Data<AppContext>,
    req: HttpRequest,
    payload: web::Payload,
) -> HttpResponse {
    let image_bytes = match extract_image_bytes(&req, payload).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };
    classify_and_respond(&ctx, &req, &image_bytes)
}

async fn handle_url(
    ctx: web::Data<AppContext>,
    req: HttpRequest,
    payload: web::Payload,
) -> HttpResponse {
    let body = match collect_body(payload).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let parsed: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return error_response(
                actix_web::http::StatusCode::BAD_REQUEST,
                "payload_error",
                "Body must be JSON of the form {\"url\": \"<http url>\"}",
            )
        }
    };
    let Some(image_url) = parsed
        .get("url")
        .or_else(|| parsed.get("Url"))
        .and_then(|v| v.as_str())
    else {
        return error_response(
            actix_web::http::StatusCode::BAD_REQUEST,
            "payload_error",
            "Missing url field",
        );
    };

    // Single attempt with the client's bounded timeout; a failed or
    // oversized download fails the request.
    let response = match ctx.http.get(image_url).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            error!("Image fetch returned status {}", response.status());
            return error_response(
                actix_web::http::StatusCode::BAD_GATEWAY,
                "fetch_error",
                &format!("Image fetch failed with status {}", response.status()),
            );
        }
        Err(e) => {
            error!("Image fetch failed: {e}");
            return error_response(
                actix_web::http::StatusCode::BAD_GATEWAY,
                "fetch_error",
                "Failed to fetch image from url",
            );
        }
    };

    if response
        .content_length()
        .is_some_and(|len| len > MAX_PAYLOAD_BYTES as u64)
    {
        return error_response(
            actix_web::http::StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            "Fetched image exceeds the 4MB limit",
        );
    }

    // Stream the body so an oversized download is aborted at the cap,
    // never buffered whole; Content-Length is advisory only.
    let mut stream = response.bytes_stream();
    let mut image_bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                error!("Image fetch failed while reading body: {e}");
                return error_response(
                    actix_web::http::StatusCode::BAD_GATEWAY,
                    "fetch_error",
                    "Failed to fetch image from url",
                );
            }
        };
        if image_bytes.len() + chunk.len() > MAX_PAYLOAD_BYTES {
            return error_response(
                actix_web::http::StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "Fetched image exceeds the 4MB limit",
            );
        }
        image_bytes.extend_from_slice(&chunk);
    }

    classify_and_respond(&ctx, &req, &image_bytes)
}

async fn handle_predict_aqi(ctx: web::Data<AppContext>, body: web::Bytes) -> HttpResponse {
    let Some(model) = ctx.aqi.as_ref() else {
        return error_response(
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            "model_not_ready",
            "AQI model is not available",
        );
    };

    let expected_format: serde_json::Map<String, serde_json::Value> = REQUIRED_FEATURES
        .iter()
        .map(|f| (f.to_string(), json!("number")))
        .collect();
    let Ok(serde_json::Value::Object(data)) = serde_json::from_slice(&body) else {
        return HttpResponse::BadRequest().json(json!({
            "error": "Body must be a JSON object with pollution data",
            "kind": "validation_error",
            "expected_format": expected_format,
        }));
    };

    let sample = match validate_pollution_data(&data) {
        Ok(sample) => sample,
        Err(validation_errors) => {
            return HttpResponse::BadRequest().json(json!({
                "error": "Invalid input data",
                "kind": "validation_error",
                "validation_errors": validation_errors,
            }))
        }
    };

    let prediction = model.predict(&sample);
    info!(
        "AQI prediction successful: AQI={:.2}, Category={:?}",
        prediction.predicted_aqi, prediction.category
    );
    HttpResponse::Ok().json(json!({
        "predicted_aqi": (prediction.predicted_aqi * 100.0).round() / 100.0,
        "aqi_category": prediction.category,
        "aqi_rounded": prediction.rounded,
        "input_values": data,
        "confidence": serde_json::Value::Null,
        "model_type": prediction.model_type,
    }))
}
