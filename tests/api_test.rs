use actix_web::{test, web, App};
use serde_json::json;

use airvision::aqi::model::{AqiModel, Regressor, Scaler};
use airvision::context::AppContext;
use airvision::routes::configure_routes;

fn constant_aqi_model(value: f64) -> AqiModel {
    AqiModel::from_parts(
        Scaler {
            mean: vec![0.0; 8],
            scale: vec![1.0; 8],
        },
        Regressor::Linear {
            coefficients: vec![0.0; 8],
            intercept: value,
        },
    )
    .unwrap()
}

fn valid_sample() -> serde_json::Value {
    json!({
        "co": 1.2, "no": 15.5, "no2": 25.3, "o3": 45.2,
        "so2": 8.1, "pm2_5": 35.7, "pm10": 55.2, "nh3": 12.4
    })
}

macro_rules! test_app {
    ($ctx:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($ctx))
                .configure(configure_routes),
        )
        .await
    };
}

#[actix_web::test]
async fn predict_aqi_returns_value_and_band() {
    let app = test_app!(AppContext::new(None, Some(constant_aqi_model(75.0))));

    let req = test::TestRequest::post()
        .uri("/predict-aqi")
        .set_json(valid_sample())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["predicted_aqi"], 75.0);
    assert_eq!(body["aqi_category"], "MODERATE");
    assert_eq!(body["aqi_rounded"], 75);
    assert_eq!(body["confidence"], serde_json::Value::Null);
    assert_eq!(body["input_values"]["pm2_5"], 35.7);
    assert_eq!(body["model_type"], "Linear Regression Model");
}

#[actix_web::test]
async fn predict_aqi_severe_band() {
    let app = test_app!(AppContext::new(None, Some(constant_aqi_model(301.0))));

    let req = test::TestRequest::post()
        .uri("/predict-aqi")
        .set_json(valid_sample())
        .to_request();
    let body: serde_json::Value =
        test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["aqi_category"], "SEVERE");
}

#[actix_web::test]
async fn predict_aqi_collects_all_validation_errors() {
    let app = test_app!(AppContext::new(None, Some(constant_aqi_model(75.0))));

    let mut sample = valid_sample();
    sample.as_object_mut().unwrap().remove("nh3");
    sample["no2"] = json!(-5.0);

    let req = test::TestRequest::post()
        .uri("/predict-aqi")
        .set_json(sample)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "validation_error");
    let errors = body["validation_errors"].as_array().unwrap();
    assert_eq!(errors.len(), 2);
    let joined = errors
        .iter()
        .map(|e| e.as_str().unwrap())
        .collect::<Vec<_>>()
        .join("; ");
    assert!(joined.contains("nh3"));
    assert!(joined.contains("Negative value for no2"));
}

#[actix_web::test]
async fn predict_aqi_rejects_non_object_body() {
    let app = test_app!(AppContext::new(None, Some(constant_aqi_model(75.0))));

    let req = test::TestRequest::post()
        .uri("/predict-aqi")
        .insert_header(("content-type", "application/json"))
        .set_payload("[1, 2, 3]")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body["expected_format"]["pm2_5"].is_string());
}

#[actix_web::test]
async fn predict_aqi_without_model_is_not_ready() {
    let app = test_app!(AppContext::new(None, None));

    let req = test::TestRequest::post()
        .uri("/predict-aqi")
        .set_json(valid_sample())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "model_not_ready");
}

#[actix_web::test]
async fn image_without_model_is_not_ready() {
    let app = test_app!(AppContext::new(None, None));

    let req = test::TestRequest::post()
        .uri("/image")
        .insert_header(("content-type", "application/octet-stream"))
        .set_payload(vec![0u8; 16])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "model_not_ready");
}

#[actix_web::test]
async fn image_route_aliases_are_registered() {
    let app = test_app!(AppContext::new(None, None));

    for uri in [
        "/someproject/image",
        "/someproject/image/nostore",
        "/someproject/classify/iterations/iter1/image",
        "/someproject/detect/iterations/iter1/image/nostore",
    ] {
        let req = test::TestRequest::post()
            .uri(uri)
            .insert_header(("content-type", "application/octet-stream"))
            .set_payload(vec![0u8; 16])
            .to_request();
        let resp = test::call_service(&app, req).await;
        // Model is absent, but the route must resolve (not 404).
        assert_eq!(resp.status(), 500, "{uri}");
    }
}

#[actix_web::test]
async fn url_route_rejects_malformed_body() {
    let app = test_app!(AppContext::new(None, None));

    let req = test::TestRequest::post()
        .uri("/url")
        .insert_header(("content-type", "application/json"))
        .set_payload("not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::post()
        .uri("/url")
        .set_json(json!({"link": "http://example.com/sky.jpg"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

/// Serves one hand-written HTTP response on a local port, for exercising
/// the /url fetch path without a real remote host.
fn spawn_http_stub(
    write_response: impl FnOnce(&mut std::net::TcpStream) + Send + 'static,
) -> String {
    use std::io::Read;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut head = [0u8; 4096];
            let _ = stream.read(&mut head);
            write_response(&mut stream);
        }
    });
    format!("http://{addr}/sky.jpg")
}

#[actix_web::test]
async fn url_fetch_rejects_oversized_content_length() {
    use std::io::Write;

    let app = test_app!(AppContext::new(None, None));

    // Declares 10MB up front; the request must fail without downloading it.
    let url = spawn_http_stub(|stream| {
        let _ = stream.write_all(
            b"HTTP/1.1 200 OK\r\n\
              Content-Type: image/jpeg\r\n\
              Content-Length: 10485760\r\n\r\n",
        );
        let _ = stream.write_all(&[0u8; 1024]);
    });

    let req = test::TestRequest::post()
        .uri("/url")
        .set_json(json!({ "url": url }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 413);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "payload_too_large");
}

#[actix_web::test]
async fn url_fetch_aborts_oversized_stream_at_the_cap() {
    use std::io::Write;

    let app = test_app!(AppContext::new(None, None));

    // No Content-Length: a chunked body past 4MB must be cut off mid-stream,
    // not buffered to completion.
    let url = spawn_http_stub(|stream| {
        let _ = stream.write_all(
            b"HTTP/1.1 200 OK\r\n\
              Content-Type: image/jpeg\r\n\
              Transfer-Encoding: chunked\r\n\r\n",
        );
        let megabyte = vec![0u8; 1024 * 1024];
        for _ in 0..6 {
            // The client hangs up at the cap; later writes may fail.
            if stream.write_all(b"100000\r\n").is_err()
                || stream.write_all(&megabyte).is_err()
                || stream.write_all(b"\r\n").is_err()
            {
                return;
            }
        }
        let _ = stream.write_all(b"0\r\n\r\n");
    });

    let req = test::TestRequest::post()
        .uri("/url")
        .set_json(json!({ "url": url }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 413);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "payload_too_large");
}

#[actix_web::test]
async fn models_info_describes_both_models() {
    let app = test_app!(AppContext::new(None, None));

    let req = test::TestRequest::get().uri("/models/info").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["models"]["image_classifier"].is_object());
    assert!(body["models"]["aqi_predictor"].is_object());
    assert_eq!(body["pollution_parameters"].as_object().unwrap().len(), 8);
}

#[actix_web::test]
async fn index_lists_endpoints() {
    let app = test_app!(AppContext::new(None, None));

    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body = test::read_body(resp).await;
    let text = std::str::from_utf8(&body).unwrap();
    assert!(text.contains("/predict-aqi"));
    assert!(text.contains("/image"));
}
