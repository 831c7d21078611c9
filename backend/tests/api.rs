mod common;

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::header::CONTENT_TYPE;
use actix_web::{test, web, App};
use common::*;
use deeptrust::routes::{configure_routes, ApiState};
use serde_json::Value;
use shared::ClassLabel;

const BOUNDARY: &str = "deeptrust-test-boundary";

/// `(name, filename, bytes)` parts of a multipart/form-data body.
fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, data) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            ),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload(uri: &str, body: Vec<u8>) -> test::TestRequest {
    test::TestRequest::post()
        .uri(uri)
        .insert_header((
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(body)
}

fn state(fixture: &Fixture, timeout: Duration) -> web::Data<ApiState> {
    web::Data::new(ApiState {
        orchestrator: fixture.orchestrator.clone(),
        request_timeout: timeout,
        max_upload_bytes: 1024 * 1024,
    })
}

fn face_fixture() -> Fixture {
    Fixture::new(
        Arc::new(ScriptedClassifier::always(scores_for(ClassLabel::Fake, 0.92))),
        Arc::new(CentreFaceDetector::default()),
        Some(Arc::new(StubSaliency::working())),
        Arc::new(MemoryDecoder::readable(10)),
    )
}

macro_rules! app {
    ($fixture:expr, $timeout:expr) => {
        test::init_service(
            App::new()
                .app_data(state(&$fixture, $timeout))
                .configure(|cfg| configure_routes(cfg, $fixture.results_dir())),
        )
        .await
    };
}

#[actix_web::test]
async fn health_reports_backends() {
    let fixture = face_fixture();
    let app = app!(fixture, Duration::from_secs(30));

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["device"], "cpu");
    assert_eq!(body["saliency"], "stub");

    let req = test::TestRequest::get().uri("/").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "running");
}

#[actix_web::test]
async fn analyze_image_then_fetch_and_clean_up_artifacts() {
    let fixture = face_fixture();
    let app = app!(fixture, Duration::from_secs(30));

    let body = multipart(&[("file", Some("face.png"), png_bytes(&frame(60)).as_slice())]);
    let record: Value =
        test::call_and_read_body_json(&app, upload("/api/analyze/image", body).to_request()).await;
    assert_eq!(record["verdict"], "FAKE");
    assert_eq!(record["image_mode"], "face_required");
    assert_eq!(record["face_box"]["width"], 80);
    assert_eq!(record["saliency"]["status"], "available");

    let overlay = record["saliency"]["overlay_uri"].as_str().unwrap().to_string();
    let resp = test::call_service(&app, test::TestRequest::get().uri(&overlay).to_request()).await;
    assert!(resp.status().is_success());

    let request_id = record["request_id"].as_str().unwrap().to_string();
    let cleanup_uri = format!("/api/cleanup/{}", request_id);
    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::delete().uri(&cleanup_uri).to_request(),
    )
    .await;
    assert_eq!(body["deleted"], true);
    assert!(!fixture.results_dir().join(&request_id).exists());

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::delete().uri(&cleanup_uri).to_request(),
    )
    .await;
    assert_eq!(body["deleted"], false);
}

#[actix_web::test]
async fn cleanup_rejects_non_uuid_ids() {
    let fixture = face_fixture();
    let app = app!(fixture, Duration::from_secs(30));

    let req = test::TestRequest::delete().uri("/api/cleanup/not-a-request-id").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "invalid_request");
}

#[actix_web::test]
async fn analyze_image_without_face_is_unprocessable() {
    let fixture = Fixture::new(
        Arc::new(ScriptedClassifier::always(scores_for(ClassLabel::Real, 0.9))),
        Arc::new(NoFaceDetector::default()),
        None,
        Arc::new(MemoryDecoder::readable(0)),
    );
    let app = app!(fixture, Duration::from_secs(30));

    let body = multipart(&[("file", Some("landscape.png"), png_bytes(&frame(5)).as_slice())]);
    let resp = test::call_service(&app, upload("/api/analyze/image", body).to_request()).await;
    assert_eq!(resp.status().as_u16(), 422);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "no_face_detected");
    assert_eq!(body["detail"], "No face detected in the image");
    assert_eq!(entries(&fixture.temp_dir()), 0);
}

#[actix_web::test]
async fn missing_file_field_is_a_bad_request() {
    let fixture = face_fixture();
    let app = app!(fixture, Duration::from_secs(30));

    let body = multipart(&[("num_frames", None, &b"3"[..])]);
    let resp = test::call_service(&app, upload("/api/analyze/video", body).to_request()).await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "invalid_request");
}

#[actix_web::test]
async fn legacy_image_prediction_shape() {
    let fixture = face_fixture();
    let app = app!(fixture, Duration::from_secs(30));

    let body = multipart(&[("file", Some("face.png"), png_bytes(&frame(60)).as_slice())]);
    let resp: Value =
        test::call_and_read_body_json(&app, upload("/api/predict/image", body).to_request()).await;
    assert_eq!(resp["prediction"], "FAKE");
    assert_eq!(resp["prediction_class"], 0);
    assert!((resp["confidence"].as_f64().unwrap() - 0.92).abs() < 1e-4);
    assert!(
        resp["gradcam"]["overlay"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,")
    );
    // Inline saliency leaves nothing behind.
    assert_eq!(entries(&fixture.results_dir()), 0);

    let body = multipart(&[("file", Some("face.png"), png_bytes(&frame(60)).as_slice())]);
    let resp: Value = test::call_and_read_body_json(
        &app,
        upload("/api/predict/image?generate_gradcam=false", body).to_request(),
    )
    .await;
    assert!(resp.get("gradcam").is_none());
    assert!(resp.get("gradcam_error").is_none());
}

#[actix_web::test]
async fn legacy_video_prediction_honours_form_frame_count() {
    let fixture = face_fixture();
    let app = app!(fixture, Duration::from_secs(30));

    let body = multipart(&[
        ("num_frames", None, &b"2"[..]),
        ("file", Some("clip.mp4"), &b"not really a video"[..]),
    ]);
    let resp: Value = test::call_and_read_body_json(
        &app,
        upload("/api/predict/video?num_frames=7", body).to_request(),
    )
    .await;
    assert_eq!(resp["prediction"], "FAKE");
    assert_eq!(resp["frames_analyzed"], 2);
    assert_eq!(resp["summary"]["fake_frames"], 2);
    assert_eq!(resp["frame_predictions"][1]["frame"], 2);
}

#[actix_web::test]
async fn legacy_video_without_faces_is_a_bad_request() {
    let fixture = Fixture::new(
        Arc::new(ScriptedClassifier::always(scores_for(ClassLabel::Real, 0.9))),
        Arc::new(NoFaceDetector::default()),
        None,
        Arc::new(MemoryDecoder::readable(4)),
    );
    let app = app!(fixture, Duration::from_secs(30));

    let body = multipart(&[("file", Some("clip.mp4"), &b"not really a video"[..])]);
    let resp = test::call_service(&app, upload("/api/predict/video", body).to_request()).await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "No faces detected in video");
    assert_eq!(entries(&fixture.temp_dir()), 0);

    // The unified endpoint keeps its own status.
    let body = multipart(&[("file", Some("clip.mp4"), &b"not really a video"[..])]);
    let resp = test::call_service(&app, upload("/api/analyze/video", body).to_request()).await;
    assert_eq!(resp.status().as_u16(), 422);
}

#[actix_web::test]
async fn timed_out_request_still_cleans_up() {
    let fixture = Fixture::new(
        Arc::new(
            ScriptedClassifier::always(scores_for(ClassLabel::Fake, 0.9))
                .with_delay(Duration::from_millis(300)),
        ),
        Arc::new(CentreFaceDetector::default()),
        Some(Arc::new(StubSaliency::working())),
        Arc::new(MemoryDecoder::readable(0)),
    );
    let app = app!(fixture, Duration::from_millis(20));

    let body = multipart(&[("file", Some("face.png"), png_bytes(&frame(60)).as_slice())]);
    let resp = test::call_service(&app, upload("/api/analyze/image", body).to_request()).await;
    assert_eq!(resp.status().as_u16(), 504);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "timeout");

    // Let the abandoned job finish before checking what it left behind.
    actix_web::rt::time::sleep(Duration::from_millis(500)).await;
    let mut waited = 0;
    while (entries(&fixture.temp_dir()) > 0 || entries(&fixture.results_dir()) > 0) && waited < 50 {
        actix_web::rt::time::sleep(Duration::from_millis(100)).await;
        waited += 1;
    }
    assert_eq!(entries(&fixture.temp_dir()), 0);
    assert_eq!(entries(&fixture.results_dir()), 0);
}
