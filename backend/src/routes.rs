use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use futures::TryStreamExt;
use log::{error, info, warn};
use shared::{Category, HealthResponse, PredictionResponse};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::inference::Predictor;

const FILE_FIELD: &str = "file";

/// Shared, read-only state handed to every worker.
pub struct AppState {
    predictor: Arc<dyn Predictor>,
    limiter: Arc<Semaphore>,
    timeout: Duration,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        predictor: Arc<dyn Predictor>,
        max_concurrent: usize,
        timeout: Duration,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            predictor,
            limiter: Arc::new(Semaphore::new(max_concurrent)),
            timeout,
            max_upload_bytes,
        }
    }
}

/// Cross-origin requests are accepted from anywhere.
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            actix_web::http::header::ACCEPT,
            actix_web::http::header::CONTENT_TYPE,
        ])
        .max_age(3600)
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/predict").route(web::post().to(handle_predict)))
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn handle_predict(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ServiceError> {
    let request_id = Uuid::new_v4();
    let start = Instant::now();

    let image = match read_file_field(payload, state.max_upload_bytes).await {
        Ok(Some(image)) => image,
        Ok(None) => {
            warn!("[{}] Rejected request without '{}' field", request_id, FILE_FIELD);
            return Err(ServiceError::MissingFile);
        }
        Err(e) => {
            warn!("[{}] Rejected upload: {:?}", request_id, e);
            return Err(e);
        }
    };
    info!("[{}] Received image of {} bytes", request_id, image.len());

    let limiter = state.limiter.clone();
    let predictor = state.predictor.clone();
    let job = async move {
        let permit = limiter
            .acquire_owned()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        web::block(move || {
            let _permit = permit;
            predictor.predict(&image)
        })
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))
    };

    let prediction = match actix_web::rt::time::timeout(state.timeout, job).await {
        Err(_) => {
            error!(
                "[{}] Inference (including queueing) exceeded {} s",
                request_id,
                state.timeout.as_secs()
            );
            return Err(ServiceError::Timeout);
        }
        Ok(Err(e)) => {
            error!("[{}] Inference worker failed: {:?}", request_id, e);
            return Err(e);
        }
        Ok(Ok(result)) => result.map_err(|e| {
            if e.is_client_error() {
                warn!("[{}] Could not decode upload: {}", request_id, e);
            } else {
                error!("[{}] Model inference error: {:?}", request_id, e);
            }
            ServiceError::from(e)
        })?,
    };

    info!(
        "[{}] Predicted {} ({:.2}%) in {} ms",
        request_id,
        prediction.category,
        prediction.confidence,
        start.elapsed().as_millis()
    );

    Ok(HttpResponse::Ok().json(PredictionResponse {
        disease: prediction.category,
        confidence: prediction.confidence,
    }))
}

/// Returns the bytes of the first `file` part that carries a filename, or
/// `None` when the request has no such part or is not multipart at all.
/// Plain form fields named `file` are not uploads.
async fn read_file_field(
    mut payload: Multipart,
    limit: usize,
) -> Result<Option<Vec<u8>>, ServiceError> {
    loop {
        let mut field = match payload.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(e) => {
                log::debug!("Multipart stream ended with error: {}", e);
                return Ok(None);
            }
        };
        let has_filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .is_some();
        if field.name() != Some(FILE_FIELD) || !has_filename {
            continue;
        }

        let mut image_data = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| ServiceError::MalformedUpload(e.to_string()))?
        {
            if image_data.len() + chunk.len() > limit {
                return Err(ServiceError::PayloadTooLarge);
            }
            image_data.extend_from_slice(&chunk);
        }
        return Ok(Some(image_data));
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        labels: Category::labels().into_iter().map(String::from).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{InferenceError, Prediction};
    use actix_web::http::{StatusCode, header};
    use actix_web::{App, test};
    use serde_json::{Value, json};

    const BOUNDARY: &str = "----skin-classifier-test";

    /// Answers by payload: empty bytes fail to decode, `boom` is a model
    /// fault, anything else is classified by its length.
    struct StubPredictor;

    impl Predictor for StubPredictor {
        fn predict(&self, image: &[u8]) -> Result<Prediction, InferenceError> {
            match image {
                [] => Err(InferenceError::EmptyImage),
                b"boom" => Err(InferenceError::ShapeMismatch {
                    expected: 12800,
                    actual: 3,
                }),
                _ => Ok(Prediction {
                    category: Category::from_index(image.len() % 5).unwrap(),
                    confidence: 87.5,
                    probabilities: vec![0.875, 0.05, 0.05, 0.0125, 0.0125],
                }),
            }
        }
    }

    fn state(max_upload_bytes: usize) -> web::Data<AppState> {
        web::Data::new(AppState::new(
            Arc::new(StubPredictor),
            2,
            Duration::from_secs(5),
            max_upload_bytes,
        ))
    }

    fn file_part(name: &str) -> String {
        format!(
            "Content-Disposition: form-data; name=\"{name}\"; filename=\"upload.jpg\"\r\nContent-Type: image/jpeg"
        )
    }

    fn text_part(name: &str) -> String {
        format!("Content-Disposition: form-data; name=\"{name}\"")
    }

    fn multipart_with(parts: &[(String, &[u8])]) -> (String, Vec<u8>) {
        let mut body = Vec::new();
        for (headers, data) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n{headers}\r\n\r\n").as_bytes());
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={BOUNDARY}"), body)
    }

    fn multipart(parts: &[(&str, &[u8])]) -> (String, Vec<u8>) {
        let parts: Vec<(String, &[u8])> =
            parts.iter().map(|(name, data)| (file_part(name), *data)).collect();
        multipart_with(&parts)
    }

    async fn post(parts: &[(&str, &[u8])], max_upload_bytes: usize) -> (StatusCode, Value) {
        post_body(multipart(parts), state(max_upload_bytes)).await
    }

    async fn post_body(
        (content_type, body): (String, Vec<u8>),
        state: web::Data<AppState>,
    ) -> (StatusCode, Value) {
        let app = test::init_service(App::new().app_data(state).configure(configure_routes)).await;
        let req = test::TestRequest::post()
            .uri("/predict")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        (status, test::read_body_json(resp).await)
    }

    #[actix_web::test]
    async fn predicts_uploaded_file() {
        let (status, body) = post(&[("file", b"abcdef")], 1024).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"disease": "Eczema", "confidence": 87.5}));
    }

    #[actix_web::test]
    async fn missing_file_field_is_bad_request() {
        let (status, body) = post(&[("image", b"abcdef")], 1024).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "No file uploaded"}));

        let (status, body) = post(&[], 1024).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "No file uploaded"}));
    }

    #[actix_web::test]
    async fn non_multipart_request_is_missing_file() {
        let app = test::init_service(App::new().app_data(state(1024)).configure(configure_routes))
            .await;
        let req = test::TestRequest::post()
            .uri("/predict")
            .set_json(json!({"file": "not an upload"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"error": "No file uploaded"}));
    }

    #[actix_web::test]
    async fn text_field_named_file_is_not_an_upload() {
        let (status, body) = post_body(
            multipart_with(&[(text_part("file"), b"hello")]),
            state(1024),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "No file uploaded"}));

        let (status, body) = post_body(
            multipart_with(&[(text_part("file"), b"hello"), (file_part("file"), b"abc")]),
            state(1024),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["disease"], "Nail Fungus");
    }

    #[actix_web::test]
    async fn request_waiting_for_a_free_slot_times_out() {
        let busy = web::Data::new(AppState::new(
            Arc::new(StubPredictor),
            0,
            Duration::from_millis(50),
            1024,
        ));
        let (status, body) = post_body(multipart(&[("file", b"abc")]), busy).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body, json!({"error": "Inference timed out"}));
    }

    #[actix_web::test]
    async fn file_field_is_found_after_other_parts() {
        let (status, body) = post(&[("note", b"left arm"), ("file", b"abc")], 1024).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["disease"], "Nail Fungus");
    }

    #[actix_web::test]
    async fn undecodable_image_is_bad_request() {
        let (status, body) = post(&[("file", b"")], 1024).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Could not decode image"}));
    }

    #[actix_web::test]
    async fn model_fault_is_internal_error() {
        let (status, body) = post(&[("file", b"boom")], 1024).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Internal server error"}));
    }

    #[actix_web::test]
    async fn oversized_upload_is_rejected() {
        let (status, body) = post(&[("file", &[7u8; 64])], 16).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body, json!({"error": "File too large"}));
    }

    #[actix_web::test]
    async fn repeated_upload_is_idempotent() {
        let first = post(&[("file", b"same bytes")], 1024).await;
        let second = post(&[("file", b"same bytes")], 1024).await;
        assert_eq!(first, second);
    }

    #[actix_web::test]
    async fn health_lists_labels_in_order() {
        let app = test::init_service(App::new().app_data(state(1024)).configure(configure_routes))
            .await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(
            body,
            json!({
                "status": "ok",
                "labels": ["Acne", "Eczema", "Hair Loss, Alopecia", "Nail Fungus", "Scabies"]
            })
        );
    }

    #[actix_web::test]
    async fn any_origin_is_allowed() {
        let app = test::init_service(
            App::new()
                .wrap(cors())
                .app_data(state(1024))
                .configure(configure_routes),
        )
        .await;
        let req = test::TestRequest::get()
            .uri("/health")
            .insert_header((header::ORIGIN, "http://localhost:3000"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }
}
